use chrono::NaiveDate;

use crate::model::*;

use super::conflict::check_no_conflict;

// ── Slot planning ─────────────────────────────────────────────────

/// Fixed booking grid anchored at the window's start: candidates sit at
/// offsets that are whole multiples of `session_minutes`, never sliding
/// minute-by-minute. Lazy and finite; recomputed fresh per request.
pub fn slot_grid(window: TimeSlot, session_minutes: Minute) -> impl Iterator<Item = TimeSlot> {
    let mut cursor = window.start;
    std::iter::from_fn(move || {
        if session_minutes == 0 {
            return None;
        }
        let end = cursor.checked_add(session_minutes)?;
        if end > window.end {
            return None;
        }
        let slot = TimeSlot::new(cursor, end);
        cursor = end;
        Some(slot)
    })
}

/// Enumerate bookable slots on `date`: walk the grid of every availability
/// window of the instructor and keep candidates free on the instructor's
/// schedule and (when a vehicle is assigned) on the vehicle's schedule.
/// Pure over schedule snapshots — callers hold the read locks.
pub fn open_slots(
    instructor: &ScheduleState,
    vehicle: Option<&ScheduleState>,
    date: NaiveDate,
    session_minutes: Minute,
) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    for window in instructor.on_date(date).iter().filter(|e| e.is_availability()) {
        for candidate in slot_grid(window.slot, session_minutes) {
            if check_no_conflict(instructor, date, candidate, None).is_err() {
                continue;
            }
            if let Some(v) = vehicle
                && check_no_conflict(v, date, candidate, None).is_err() {
                    continue;
                }
            slots.push(candidate);
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn schedule(kind: ResourceKind, entries: Vec<ScheduleEntry>) -> ScheduleState {
        let mut rs = ScheduleState::new(Ulid::new(), kind, None);
        for e in entries {
            rs.insert_entry(e);
        }
        rs
    }

    fn window(date: NaiveDate, start: Minute, end: Minute) -> ScheduleEntry {
        ScheduleEntry {
            id: Ulid::new(),
            date,
            slot: TimeSlot::new(start, end),
            kind: EntryKind::Availability,
        }
    }

    fn lesson(date: NaiveDate, start: Minute, end: Minute) -> ScheduleEntry {
        ScheduleEntry {
            id: Ulid::new(),
            date,
            slot: TimeSlot::new(start, end),
            kind: EntryKind::Lesson { file_id: Ulid::new() },
        }
    }

    // ── slot_grid ─────────────────────────────────────────

    #[test]
    fn grid_fills_window_exactly() {
        // 09:00–12:00 at 90 minutes → 09:00–10:30, 10:30–12:00.
        let slots: Vec<_> = slot_grid(TimeSlot::new(540, 720), 90).collect();
        assert_eq!(slots, vec![TimeSlot::new(540, 630), TimeSlot::new(630, 720)]);
    }

    #[test]
    fn grid_drops_trailing_remainder() {
        // 09:00–11:00 at 45 minutes → two slots, 30-minute tail unused.
        let slots: Vec<_> = slot_grid(TimeSlot::new(540, 660), 45).collect();
        assert_eq!(slots, vec![TimeSlot::new(540, 585), TimeSlot::new(585, 630)]);
    }

    #[test]
    fn grid_window_shorter_than_session() {
        assert_eq!(slot_grid(TimeSlot::new(540, 600), 90).count(), 0);
    }

    #[test]
    fn grid_zero_duration_is_empty() {
        assert_eq!(slot_grid(TimeSlot::new(540, 720), 0).count(), 0);
    }

    #[test]
    fn grid_slots_are_contiguous() {
        let slots: Vec<_> = slot_grid(TimeSlot::new(480, 960), 60).collect();
        assert_eq!(slots.len(), 8);
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    // ── open_slots ────────────────────────────────────────

    #[test]
    fn open_slots_basic() {
        let date = d("2025-05-15");
        let instructor = schedule(ResourceKind::Instructor, vec![window(date, 540, 720)]);
        let slots = open_slots(&instructor, None, date, 90);
        assert_eq!(slots, vec![TimeSlot::new(540, 630), TimeSlot::new(630, 720)]);
    }

    #[test]
    fn open_slots_filters_booked() {
        let date = d("2025-05-15");
        let instructor = schedule(
            ResourceKind::Instructor,
            vec![window(date, 540, 720), lesson(date, 540, 630)],
        );
        let slots = open_slots(&instructor, None, date, 90);
        assert_eq!(slots, vec![TimeSlot::new(630, 720)]);
    }

    #[test]
    fn open_slots_off_grid_conflict_masks_rest_of_window() {
        // A 10:00–10:30 lesson kills the whole 09:00–10:30 grid slot; the
        // grid is anchored at the window start and never slides around a
        // conflict, so 10:30–12:00 is the only slot left.
        let date = d("2025-05-15");
        let instructor = schedule(
            ResourceKind::Instructor,
            vec![window(date, 540, 720), lesson(date, 600, 630)],
        );
        let slots = open_slots(&instructor, None, date, 90);
        assert_eq!(slots, vec![TimeSlot::new(630, 720)]);
    }

    #[test]
    fn open_slots_vehicle_filters_too() {
        let date = d("2025-05-15");
        let instructor = schedule(ResourceKind::Instructor, vec![window(date, 540, 720)]);
        let vehicle = schedule(ResourceKind::Vehicle, vec![lesson(date, 630, 690)]);
        let slots = open_slots(&instructor, Some(&vehicle), date, 90);
        assert_eq!(slots, vec![TimeSlot::new(540, 630)]);
    }

    #[test]
    fn open_slots_no_vehicle_skips_vehicle_check() {
        let date = d("2025-05-15");
        let instructor = schedule(ResourceKind::Instructor, vec![window(date, 540, 720)]);
        let slots = open_slots(&instructor, None, date, 90);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn open_slots_multiple_windows() {
        let date = d("2025-05-15");
        let instructor = schedule(
            ResourceKind::Instructor,
            vec![window(date, 480, 570), window(date, 780, 960)],
        );
        let slots = open_slots(&instructor, None, date, 90);
        assert_eq!(
            slots,
            vec![
                TimeSlot::new(480, 570),
                TimeSlot::new(780, 870),
                TimeSlot::new(870, 960),
            ]
        );
    }

    #[test]
    fn open_slots_other_dates_ignored() {
        let date = d("2025-05-15");
        let instructor = schedule(
            ResourceKind::Instructor,
            vec![window(d("2025-05-16"), 540, 720)],
        );
        assert!(open_slots(&instructor, None, date, 90).is_empty());
    }

    #[test]
    fn open_slots_empty_schedule() {
        let instructor = ScheduleState::new(Ulid::new(), ResourceKind::Instructor, None);
        assert!(open_slots(&instructor, None, d("2025-05-15"), 90).is_empty());
    }
}
