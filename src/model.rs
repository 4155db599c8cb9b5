use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only time-of-day type.
pub type Minute = u16;

/// Half-open time-of-day slot `[start, end)` at minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Minute,
    pub end: Minute,
}

impl TimeSlot {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn covers(&self, other: &TimeSlot) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// What a schedule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Instructor,
    Vehicle,
}

/// What a schedule entry represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Declared bookable window (instructors only).
    Availability,
    /// Committed lesson appointment.
    Lesson { file_id: Ulid },
}

/// A single dated entry on a resource schedule — availability windows and
/// lessons are both just entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub kind: EntryKind,
}

impl ScheduleEntry {
    pub fn is_lesson(&self) -> bool {
        matches!(self.kind, EntryKind::Lesson { .. })
    }

    pub fn is_availability(&self) -> bool {
        matches!(self.kind, EntryKind::Availability)
    }
}

/// Per-resource schedule: one instructor or one vehicle. All conflict
/// checking happens against this state while its lock is held.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub name: Option<String>,
    /// All entries, sorted by `(date, slot.start)`.
    pub entries: Vec<ScheduleEntry>,
}

impl ScheduleState {
    pub fn new(id: Ulid, kind: ResourceKind, name: Option<String>) -> Self {
        Self {
            id,
            kind,
            name,
            entries: Vec::new(),
        }
    }

    /// Insert an entry maintaining sort order by `(date, slot.start)`.
    pub fn insert_entry(&mut self, entry: ScheduleEntry) {
        let key = (entry.date, entry.slot.start);
        let pos = self
            .entries
            .binary_search_by(|e| (e.date, e.slot.start).cmp(&key))
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Remove an entry by id.
    pub fn remove_entry(&mut self, id: Ulid) -> Option<ScheduleEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    pub fn entry(&self, id: Ulid) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All entries on `date`, located by binary search on the sort key.
    pub fn on_date(&self, date: NaiveDate) -> &[ScheduleEntry] {
        let lo = self.entries.partition_point(|e| e.date < date);
        let hi = self.entries.partition_point(|e| e.date <= date);
        &self.entries[lo..hi]
    }

    /// Entries on `date` whose slot overlaps `slot` (half-open semantics).
    pub fn overlapping(&self, date: NaiveDate, slot: TimeSlot) -> impl Iterator<Item = &ScheduleEntry> {
        let day = self.on_date(date);
        // Everything at index >= right_bound starts at or after slot.end → can't overlap.
        let right_bound = day.partition_point(|e| e.slot.start < slot.end);
        day[..right_bound]
            .iter()
            .filter(move |e| e.slot.end > slot.start)
    }
}

// ── Collaborator-supplied records ────────────────────────────────

/// Enrollment record linking a student to an instructor, optional vehicle,
/// and a teaching category. Supplied by the enrollment collaborator; the
/// engine only resolves through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Ulid,
    pub student_id: Ulid,
    pub instructor_id: Option<Ulid>,
    pub vehicle_id: Option<Ulid>,
    pub category_id: Option<Ulid>,
}

/// License-type program: fixed lesson duration plus the exam form used to
/// score its driving sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeachingCategory {
    pub id: Ulid,
    pub name: Option<String>,
    pub session_minutes: Minute,
    pub exam_form_id: Option<Ulid>,
}

/// One scoreable infraction in the penalty catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamItem {
    pub id: Ulid,
    pub description: String,
    pub penalty_points: u32,
    pub order_index: u32,
}

/// Read-only penalty catalog for one teaching category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamForm {
    pub id: Ulid,
    pub max_points: u32,
    /// Items sorted by `order_index`.
    pub items: Vec<ExamItem>,
}

impl ExamForm {
    pub fn new(id: Ulid, max_points: u32) -> Self {
        Self {
            id,
            max_points,
            items: Vec::new(),
        }
    }

    pub fn contains_item(&self, item_id: Ulid) -> bool {
        self.items.iter().any(|i| i.id == item_id)
    }

    pub fn penalty_for(&self, item_id: Ulid) -> Option<u32> {
        self.items.iter().find(|i| i.id == item_id).map(|i| i.penalty_points)
    }

    /// Insert an item maintaining sort order by `order_index`.
    pub fn insert_item(&mut self, item: ExamItem) {
        let pos = self
            .items
            .binary_search_by_key(&item.order_index, |i| i.order_index)
            .unwrap_or_else(|e| e);
        self.items.insert(pos, item);
    }
}

// ── Session forms ────────────────────────────────────────────────

/// Mistake tally of one driving session: exam item id → count.
/// Counts never go below zero and zero entries are pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistakeMap {
    counts: BTreeMap<Ulid, u32>,
}

impl MistakeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, item_id: Ulid) -> u32 {
        self.counts.get(&item_id).copied().unwrap_or(0)
    }

    /// Bump an item by one, returning the new count.
    pub fn increment(&mut self, item_id: Ulid) -> u32 {
        let count = self.counts.entry(item_id).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop an item by one, flooring at zero. Zero entries are removed and
    /// decrementing an absent item creates nothing.
    pub fn decrement(&mut self, item_id: Ulid) -> u32 {
        match self.counts.get_mut(&item_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                self.counts.remove(&item_id);
                0
            }
            None => 0,
        }
    }

    /// Overwrite an item's count; zero removes the entry. WAL replay path.
    pub fn set(&mut self, item_id: Ulid, count: u32) {
        if count == 0 {
            self.counts.remove(&item_id);
        } else {
            self.counts.insert(item_id, count);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Ulid, u32)> + '_ {
        self.counts.iter().map(|(id, c)| (*id, *c))
    }

    /// Penalty score against a catalog: `Σ count × penalty`.
    pub fn total_points(&self, form: &ExamForm) -> u32 {
        self.counts
            .iter()
            .map(|(id, count)| count * form.penalty_for(*id).unwrap_or(0))
            .sum()
    }
}

/// Outcome of a finalized session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResult {
    Ok,
    Failed,
}

impl SessionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionResult::Ok => "OK",
            SessionResult::Failed => "FAILED",
        }
    }
}

/// Per-appointment evaluation record. `total_points`/`result` are present
/// iff `locked`; once locked the record never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionForm {
    pub id: Ulid,
    pub appointment_id: Ulid,
    pub exam_form_id: Ulid,
    pub mistakes: MistakeMap,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub total_points: Option<u32>,
    pub result: Option<SessionResult>,
}

impl SessionForm {
    pub fn open(id: Ulid, appointment_id: Ulid, exam_form_id: Ulid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            appointment_id,
            exam_form_id,
            mistakes: MistakeMap::new(),
            locked: false,
            created_at,
            finalized_at: None,
            total_points: None,
            result: None,
        }
    }
}

// ── Appointments ─────────────────────────────────────────────────

/// Resource identity of a booking, resolved once from the file and passed
/// to every conflict check instead of re-deriving the join chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub instructor_id: Ulid,
    pub vehicle_id: Option<Ulid>,
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

impl AppointmentSlot {
    /// Resource ids this booking occupies, deduplicated and sorted — the
    /// lock acquisition order.
    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids = vec![self.instructor_id];
        if let Some(vid) = self.vehicle_id {
            ids.push(vid);
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

/// A committed lesson appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRecord {
    pub id: Ulid,
    pub file_id: Ulid,
    pub slot: AppointmentSlot,
}

// ── Events ───────────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    InstructorRegistered {
        id: Ulid,
        name: Option<String>,
    },
    VehicleRegistered {
        id: Ulid,
        name: Option<String>,
    },
    CategoryDefined {
        id: Ulid,
        name: Option<String>,
        session_minutes: Minute,
        exam_form_id: Option<Ulid>,
    },
    ExamFormDefined {
        id: Ulid,
        max_points: u32,
    },
    ExamItemsAdded {
        form_id: Ulid,
        items: Vec<ExamItem>,
    },
    FileOpened {
        id: Ulid,
        student_id: Ulid,
        instructor_id: Option<Ulid>,
        vehicle_id: Option<Ulid>,
        category_id: Option<Ulid>,
    },
    AvailabilityAdded {
        id: Ulid,
        instructor_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
    },
    AvailabilityUpdated {
        id: Ulid,
        instructor_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
    },
    AvailabilityRemoved {
        id: Ulid,
        instructor_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        file_id: Ulid,
        slot: AppointmentSlot,
    },
    AppointmentRescheduled {
        id: Ulid,
        file_id: Ulid,
        slot: AppointmentSlot,
    },
    AppointmentCancelled {
        id: Ulid,
    },
    FormStarted {
        id: Ulid,
        appointment_id: Ulid,
        exam_form_id: Ulid,
        created_at: DateTime<Utc>,
    },
    FormItemSet {
        form_id: Ulid,
        item_id: Ulid,
        count: u32,
    },
    FormFinalized {
        form_id: Ulid,
        total_points: u32,
        result: SessionResult,
        finalized_at: DateTime<Utc>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityInfo {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub file_id: Ulid,
    pub instructor_id: Ulid,
    pub vehicle_id: Option<Ulid>,
    pub date: NaiveDate,
    pub slot: TimeSlot,
}

/// Read-side snapshot of a session form plus its appointment context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormView {
    pub id: Ulid,
    pub appointment_id: Ulid,
    pub exam_form_id: Ulid,
    pub student_id: Ulid,
    pub date: NaiveDate,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub total_points: Option<u32>,
    pub result: Option<SessionResult>,
    pub mistakes: Vec<(Ulid, u32)>,
}

/// One point of the chronological score series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total_points: u32,
    pub top_item: Option<Ulid>,
}

/// One cell of the session × item mistake matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatmapCell {
    pub session_index: usize,
    pub item_id: Ulid,
    pub count: u32,
}

/// One point of the running moving average over session scores.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragePoint {
    pub session_index: usize,
    pub date: NaiveDate,
    pub average: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn slot_basics() {
        let s = TimeSlot::new(540, 630);
        assert_eq!(s.duration_minutes(), 90);
    }

    #[test]
    fn slot_overlap() {
        let a = TimeSlot::new(600, 660);
        let b = TimeSlot::new(630, 690);
        let c = TimeSlot::new(660, 720);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not overlapping
    }

    #[test]
    fn slot_covers() {
        let outer = TimeSlot::new(540, 720);
        let inner = TimeSlot::new(600, 660);
        let partial = TimeSlot::new(500, 600);
        assert!(outer.covers(&inner));
        assert!(outer.covers(&outer)); // self-containment
        assert!(!outer.covers(&partial));
    }

    #[test]
    fn entry_ordering() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-16"),
            slot: TimeSlot::new(540, 630),
            kind: EntryKind::Availability,
        });
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-15"),
            slot: TimeSlot::new(600, 660),
            kind: EntryKind::Availability,
        });
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-15"),
            slot: TimeSlot::new(540, 600),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        });
        assert_eq!(rs.entries[0].date, d("2025-05-15"));
        assert_eq!(rs.entries[0].slot.start, 540);
        assert_eq!(rs.entries[1].slot.start, 600);
        assert_eq!(rs.entries[2].date, d("2025-05-16"));
    }

    #[test]
    fn on_date_slices_one_day() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        for (day, start) in [("2025-05-14", 540u16), ("2025-05-15", 540), ("2025-05-15", 660), ("2025-05-16", 540)] {
            rs.insert_entry(ScheduleEntry {
                id: Ulid::new(),
                date: d(day),
                slot: TimeSlot::new(start, start + 60),
                kind: EntryKind::Availability,
            });
        }
        let day = rs.on_date(d("2025-05-15"));
        assert_eq!(day.len(), 2);
        assert!(day.iter().all(|e| e.date == d("2025-05-15")));
    }

    #[test]
    fn overlapping_skips_other_dates_and_adjacent() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Vehicle, None);
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-14"),
            slot: TimeSlot::new(600, 660),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        });
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-15"),
            slot: TimeSlot::new(600, 660),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        });
        // Ends exactly at the query start — not a hit (half-open).
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date: d("2025-05-15"),
            slot: TimeSlot::new(540, 600),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        });

        let hits: Vec<_> = rs.overlapping(d("2025-05-15"), TimeSlot::new(600, 720)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slot, TimeSlot::new(600, 660));
    }

    #[test]
    fn overlapping_empty_schedule() {
        let rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        assert_eq!(rs.overlapping(d("2025-05-15"), TimeSlot::new(0, 1440)).count(), 0);
    }

    #[test]
    fn remove_entry_preserves_order() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        for (i, &id) in ids.iter().enumerate() {
            rs.insert_entry(ScheduleEntry {
                id,
                date: d("2025-05-15"),
                slot: TimeSlot::new(540 + (i as Minute) * 60, 540 + (i as Minute) * 60 + 45),
                kind: EntryKind::Availability,
            });
        }
        rs.remove_entry(ids[1]);
        assert_eq!(rs.entries.len(), 2);
        assert_eq!(rs.entries[0].id, ids[0]);
        assert_eq!(rs.entries[1].id, ids[2]);
        assert!(rs.remove_entry(Ulid::new()).is_none());
    }

    #[test]
    fn mistake_map_increment_decrement() {
        let item = Ulid::new();
        let mut map = MistakeMap::new();
        assert_eq!(map.increment(item), 1);
        assert_eq!(map.increment(item), 2);
        assert_eq!(map.decrement(item), 1);
        assert_eq!(map.decrement(item), 0);
        assert!(map.is_empty()); // zero entries are pruned
    }

    #[test]
    fn mistake_map_decrement_absent_is_idempotent() {
        let mut map = MistakeMap::new();
        let item = Ulid::new();
        assert_eq!(map.decrement(item), 0);
        assert!(map.is_empty());
        assert_eq!(map.count(item), 0);
    }

    #[test]
    fn mistake_map_total_points() {
        let mut form = ExamForm::new(Ulid::new(), 21);
        let a = Ulid::new();
        let b = Ulid::new();
        form.insert_item(ExamItem {
            id: a,
            description: "rolling stop".into(),
            penalty_points: 3,
            order_index: 1,
        });
        form.insert_item(ExamItem {
            id: b,
            description: "missed mirror check".into(),
            penalty_points: 2,
            order_index: 2,
        });

        let mut map = MistakeMap::new();
        map.increment(a);
        map.increment(a);
        map.increment(b);
        assert_eq!(map.total_points(&form), 8);
    }

    #[test]
    fn exam_form_item_order() {
        let mut form = ExamForm::new(Ulid::new(), 21);
        for idx in [3u32, 1, 2] {
            form.insert_item(ExamItem {
                id: Ulid::new(),
                description: format!("item {idx}"),
                penalty_points: 1,
                order_index: idx,
            });
        }
        let order: Vec<u32> = form.items.iter().map(|i| i.order_index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn appointment_slot_resource_ids_sorted() {
        let instructor = Ulid::new();
        let vehicle = Ulid::new();
        let slot = AppointmentSlot {
            instructor_id: instructor,
            vehicle_id: Some(vehicle),
            date: d("2025-05-15"),
            slot: TimeSlot::new(600, 660),
        };
        let ids = slot.resource_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let walk_in = AppointmentSlot {
            instructor_id: instructor,
            vehicle_id: None,
            ..slot
        };
        assert_eq!(walk_in.resource_ids(), vec![instructor]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            id: Ulid::new(),
            file_id: Ulid::new(),
            slot: AppointmentSlot {
                instructor_id: Ulid::new(),
                vehicle_id: None,
                date: d("2025-05-15"),
                slot: TimeSlot::new(600, 660),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
