//! Hard caps that keep a single school's engine bounded. Exceeding any of
//! these yields `EngineError::LimitExceeded` rather than unbounded growth.

/// Maximum number of schools (tenants) loaded at once.
pub const MAX_SCHOOLS: usize = 1024;

/// Maximum length of a school (database) name.
pub const MAX_SCHOOL_NAME_LEN: usize = 256;

/// Maximum instructors + vehicles per school.
pub const MAX_RESOURCES_PER_SCHOOL: usize = 10_000;

/// Maximum entries (availability + lessons) on one resource schedule.
pub const MAX_ENTRIES_PER_SCHEDULE: usize = 100_000;

/// Maximum length of instructor/vehicle/category names.
pub const MAX_NAME_LEN: usize = 256;

/// Maximum length of an exam item description.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Maximum penalty items on one exam form.
pub const MAX_EXAM_ITEMS_PER_FORM: usize = 256;

/// Upper bound for a teaching category's session duration.
pub const MAX_SESSION_MINUTES: u16 = 480;

/// Minutes in a day; slot times are minutes since midnight below this.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Lesson dates outside this year range are rejected as out of range.
pub const MIN_LESSON_YEAR: i32 = 2000;
pub const MAX_LESSON_YEAR: i32 = 2100;

/// Maximum page size for session-form listings.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Maximum rows in one multi-row exam-item insert.
pub const MAX_BATCH_ITEMS: usize = 256;
