use ulid::Ulid;

/// Error taxonomy of the scheduling and evaluation core. Validation errors
/// are always raised before any mutation; conflict errors mean the caller
/// must pick a different slot; `Locked` is distinct from validation so
/// clients can tell "fix your input" from "this record is sealed".
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden,
    /// start >= end, or an otherwise nonsensical value.
    InvalidRange,
    /// Time-of-day string is not `HH:MM`.
    BadTimeFormat(String),
    /// The target date is already in the past.
    PastDate,
    /// The target date+time is not strictly in the future.
    PastDateTime,
    /// The appointment already ended; it can no longer be removed.
    PastAppointment,
    /// New availability overlaps an existing interval of the same instructor.
    Overlap(Ulid),
    /// Availability edit/removal rejected: an appointment sits in the window.
    HasBookings(Ulid),
    /// Slot length differs from the category's session duration.
    DurationMismatch { expected: u16, got: u16 },
    /// No availability interval covers the requested slot.
    NotAvailable,
    /// The instructor already has a lesson overlapping the slot.
    InstructorConflict(Ulid),
    /// The vehicle already has a lesson overlapping the slot.
    VehicleConflict(Ulid),
    /// The file has no instructor assigned.
    NoInstructor(Ulid),
    /// The file has no teaching category assigned.
    NoCategory(Ulid),
    /// The file's category has no exam form to score against.
    NoCategoryForm(Ulid),
    /// The exam item is not part of the form's penalty catalog.
    UnknownItem(Ulid),
    /// The session form is sealed; no further mutation is possible.
    Locked(Ulid),
    /// Zero page/page-size or a page size above the limit.
    BadPagination,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden => write!(f, "forbidden"),
            EngineError::InvalidRange => write!(f, "invalid range: start must be before end"),
            EngineError::BadTimeFormat(s) => write!(f, "bad time format: {s:?} (expected HH:MM)"),
            EngineError::PastDate => write!(f, "date is in the past"),
            EngineError::PastDateTime => write!(f, "date and time must be in the future"),
            EngineError::PastAppointment => write!(f, "appointment already ended"),
            EngineError::Overlap(id) => write!(f, "overlaps availability interval: {id}"),
            EngineError::HasBookings(id) => {
                write!(f, "appointment {id} falls inside the interval window")
            }
            EngineError::DurationMismatch { expected, got } => {
                write!(f, "slot is {got} minutes, category session is {expected}")
            }
            EngineError::NotAvailable => write!(f, "no availability covers the requested slot"),
            EngineError::InstructorConflict(id) => {
                write!(f, "instructor already booked: conflicts with appointment {id}")
            }
            EngineError::VehicleConflict(id) => {
                write!(f, "vehicle already booked: conflicts with appointment {id}")
            }
            EngineError::NoInstructor(id) => write!(f, "file {id} has no instructor"),
            EngineError::NoCategory(id) => write!(f, "file {id} has no teaching category"),
            EngineError::NoCategoryForm(id) => {
                write!(f, "no exam form for the teaching category of file {id}")
            }
            EngineError::UnknownItem(id) => write!(f, "exam item {id} is not on this form"),
            EngineError::Locked(id) => write!(f, "session form {id} is locked"),
            EngineError::BadPagination => write!(f, "bad pagination: page and per_page must be positive"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
