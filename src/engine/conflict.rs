use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Parse an `HH:MM` time of day into minutes since midnight.
pub(crate) fn parse_minute(s: &str) -> Result<Minute, EngineError> {
    let t = NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| EngineError::BadTimeFormat(s.to_string()))?;
    Ok((t.hour() * 60 + t.minute()) as Minute)
}

/// Parse a `[start, end)` pair, rejecting empty or inverted ranges.
pub(crate) fn parse_slot(start: &str, end: &str) -> Result<TimeSlot, EngineError> {
    let start = parse_minute(start)?;
    let end = parse_minute(end)?;
    if start >= end {
        return Err(EngineError::InvalidRange);
    }
    Ok(TimeSlot::new(start, end))
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if date.year() < MIN_LESSON_YEAR || date.year() > MAX_LESSON_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Wall-clock instant of a minute-of-day on a date. Slot minutes are
/// always below `MINUTES_PER_DAY`, so the conversion cannot fail.
pub(crate) fn slot_datetime(date: NaiveDate, minute: Minute) -> NaiveDateTime {
    let t = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minute) * 60, 0)
        .unwrap_or(NaiveTime::MIN);
    date.and_time(t)
}

/// Reject a candidate slot that overlaps any committed lesson on this
/// schedule, skipping `exclude` when an appointment validates against
/// itself during reschedule. The error names the schedule's resource kind.
pub(crate) fn check_no_conflict(
    rs: &ScheduleState,
    date: NaiveDate,
    slot: TimeSlot,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for entry in rs.overlapping(date, slot) {
        if !entry.is_lesson() || Some(entry.id) == exclude {
            continue;
        }
        return Err(match rs.kind {
            ResourceKind::Instructor => EngineError::InstructorConflict(entry.id),
            ResourceKind::Vehicle => EngineError::VehicleConflict(entry.id),
        });
    }
    Ok(())
}

/// First committed lesson intersecting the window, if any. This is the
/// coarse "has bookings" guard on availability edits: it looks at the
/// whole window, not at which interval the lesson was booked through.
pub(crate) fn booking_in_window(rs: &ScheduleState, date: NaiveDate, slot: TimeSlot) -> Option<Ulid> {
    rs.overlapping(date, slot)
        .find(|e| e.is_lesson())
        .map(|e| e.id)
}

/// True when some availability window on `date` fully contains `slot`.
pub(crate) fn covered_by_availability(rs: &ScheduleState, date: NaiveDate, slot: TimeSlot) -> bool {
    rs.on_date(date)
        .iter()
        .any(|e| e.is_availability() && e.slot.covers(&slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn lesson(date: NaiveDate, start: Minute, end: Minute) -> ScheduleEntry {
        ScheduleEntry {
            id: Ulid::new(),
            date,
            slot: TimeSlot::new(start, end),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        }
    }

    #[test]
    fn parse_minute_valid() {
        assert_eq!(parse_minute("00:00").unwrap(), 0);
        assert_eq!(parse_minute("09:00").unwrap(), 540);
        assert_eq!(parse_minute("23:59").unwrap(), 1439);
        assert_eq!(parse_minute(" 10:30 ").unwrap(), 630);
    }

    #[test]
    fn parse_minute_rejects_garbage() {
        for bad in ["", "9", "24:00", "12:60", "noon", "12.30", "12:30:00"] {
            assert!(
                matches!(parse_minute(bad), Err(EngineError::BadTimeFormat(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_slot_rejects_inverted() {
        assert!(matches!(parse_slot("10:00", "10:00"), Err(EngineError::InvalidRange)));
        assert!(matches!(parse_slot("11:00", "10:00"), Err(EngineError::InvalidRange)));
        assert_eq!(parse_slot("10:00", "11:00").unwrap(), TimeSlot::new(600, 660));
    }

    #[test]
    fn conflict_detected_and_excluded() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        let date = d("2025-05-15");
        let booked = lesson(date, 600, 660);
        let booked_id = booked.id;
        rs.insert_entry(booked);

        // 10:30–11:30 against an existing 10:00–11:00 lesson.
        let err = check_no_conflict(&rs, date, TimeSlot::new(630, 690), None).unwrap_err();
        assert!(matches!(err, EngineError::InstructorConflict(id) if id == booked_id));

        // Excluding the lesson itself (reschedule) passes.
        check_no_conflict(&rs, date, TimeSlot::new(630, 690), Some(booked_id)).unwrap();
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Vehicle, None);
        let date = d("2025-05-15");
        rs.insert_entry(lesson(date, 600, 660));
        check_no_conflict(&rs, date, TimeSlot::new(660, 720), None).unwrap();
        check_no_conflict(&rs, date, TimeSlot::new(540, 600), None).unwrap();
    }

    #[test]
    fn vehicle_conflict_uses_vehicle_variant() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Vehicle, None);
        let date = d("2025-05-15");
        rs.insert_entry(lesson(date, 600, 660));
        let err = check_no_conflict(&rs, date, TimeSlot::new(630, 690), None).unwrap_err();
        assert!(matches!(err, EngineError::VehicleConflict(_)));
    }

    #[test]
    fn availability_entries_do_not_conflict() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        let date = d("2025-05-15");
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date,
            slot: TimeSlot::new(540, 720),
            kind: EntryKind::Availability,
        });
        check_no_conflict(&rs, date, TimeSlot::new(600, 660), None).unwrap();
    }

    #[test]
    fn booking_in_window_is_coarse() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        let date = d("2025-05-15");
        let booked = lesson(date, 600, 660);
        let booked_id = booked.id;
        rs.insert_entry(booked);

        assert_eq!(booking_in_window(&rs, date, TimeSlot::new(540, 720)), Some(booked_id));
        assert_eq!(booking_in_window(&rs, date, TimeSlot::new(660, 720)), None);
        assert_eq!(booking_in_window(&rs, d("2025-05-16"), TimeSlot::new(540, 720)), None);
    }

    #[test]
    fn covered_by_availability_requires_full_containment() {
        let mut rs = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        let date = d("2025-05-15");
        rs.insert_entry(ScheduleEntry {
            id: Ulid::new(),
            date,
            slot: TimeSlot::new(540, 720),
            kind: EntryKind::Availability,
        });

        assert!(covered_by_availability(&rs, date, TimeSlot::new(540, 630)));
        assert!(covered_by_availability(&rs, date, TimeSlot::new(630, 720)));
        assert!(!covered_by_availability(&rs, date, TimeSlot::new(700, 750)));
        assert!(!covered_by_availability(&rs, d("2025-05-16"), TimeSlot::new(540, 630)));
    }

    #[test]
    fn slot_datetime_conversion() {
        let dt = slot_datetime(d("2025-05-15"), 630);
        assert_eq!(dt, d("2025-05-15").and_hms_opt(10, 30, 0).unwrap());
    }
}
