use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::auth::Caller;
use crate::limits::*;
use crate::model::*;

use super::conflict::{
    booking_in_window, check_no_conflict, covered_by_availability, now, parse_slot, slot_datetime,
    today, validate_date,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Collaborator registries ──────────────────────────────

    pub async fn register_instructor(
        &self,
        caller: &Caller,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        self.register_resource(caller, id, ResourceKind::Instructor, name).await
    }

    pub async fn register_vehicle(
        &self,
        caller: &Caller,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        self.register_resource(caller, id, ResourceKind::Vehicle, name).await
    }

    async fn register_resource(
        &self,
        caller: &Caller,
        id: Ulid,
        kind: ResourceKind,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if !caller.can_register() {
            return Err(EngineError::Forbidden);
        }
        if self.schedules.len() >= MAX_RESOURCES_PER_SCHOOL {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("name too long"));
            }
        if self.schedules.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = match kind {
            ResourceKind::Instructor => Event::InstructorRegistered { id, name: name.clone() },
            ResourceKind::Vehicle => Event::VehicleRegistered { id, name: name.clone() },
        };
        self.wal_append(&event).await?;
        let rs = ScheduleState::new(id, kind, name);
        self.schedules.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn define_category(
        &self,
        caller: &Caller,
        id: Ulid,
        name: Option<String>,
        session_minutes: Minute,
        exam_form_id: Option<Ulid>,
    ) -> Result<(), EngineError> {
        if !caller.can_register() {
            return Err(EngineError::Forbidden);
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("name too long"));
            }
        if session_minutes == 0 {
            return Err(EngineError::InvalidRange);
        }
        if session_minutes > MAX_SESSION_MINUTES {
            return Err(EngineError::LimitExceeded("session too long"));
        }
        if let Some(fid) = exam_form_id
            && !self.exam_forms.contains_key(&fid) {
                return Err(EngineError::NotFound(fid));
            }
        if self.categories.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CategoryDefined {
            id,
            name: name.clone(),
            session_minutes,
            exam_form_id,
        };
        self.wal_append(&event).await?;
        self.categories.insert(
            id,
            TeachingCategory { id, name, session_minutes, exam_form_id },
        );
        Ok(())
    }

    pub async fn define_exam_form(
        &self,
        caller: &Caller,
        id: Ulid,
        max_points: u32,
    ) -> Result<(), EngineError> {
        if !caller.can_register() {
            return Err(EngineError::Forbidden);
        }
        if self.exam_forms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ExamFormDefined { id, max_points };
        self.wal_append(&event).await?;
        self.exam_forms.insert(id, ExamForm::new(id, max_points));
        Ok(())
    }

    pub async fn add_exam_items(
        &self,
        caller: &Caller,
        form_id: Ulid,
        items: Vec<ExamItem>,
    ) -> Result<(), EngineError> {
        if !caller.can_register() {
            return Err(EngineError::Forbidden);
        }
        if items.len() > MAX_BATCH_ITEMS {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for item in &items {
            if item.description.len() > MAX_DESCRIPTION_LEN {
                return Err(EngineError::LimitExceeded("description too long"));
            }
        }
        {
            // Guard scope: never hold a map entry across the WAL await.
            let form = self
                .exam_forms
                .get(&form_id)
                .ok_or(EngineError::NotFound(form_id))?;
            if form.items.len() + items.len() > MAX_EXAM_ITEMS_PER_FORM {
                return Err(EngineError::LimitExceeded("too many exam items"));
            }
            for (i, item) in items.iter().enumerate() {
                if form.contains_item(item.id) || items[..i].iter().any(|p| p.id == item.id) {
                    return Err(EngineError::AlreadyExists(item.id));
                }
            }
        }

        let event = Event::ExamItemsAdded { form_id, items: items.clone() };
        self.wal_append(&event).await?;
        if let Some(mut form) = self.exam_forms.get_mut(&form_id) {
            for item in items {
                form.insert_item(item);
            }
        }
        Ok(())
    }

    pub async fn open_file(&self, caller: &Caller, file: FileRecord) -> Result<(), EngineError> {
        if !caller.can_register() {
            return Err(EngineError::Forbidden);
        }
        if self.files.contains_key(&file.id) {
            return Err(EngineError::AlreadyExists(file.id));
        }
        if let Some(iid) = file.instructor_id {
            self.require_resource_kind(iid, ResourceKind::Instructor).await?;
        }
        if let Some(vid) = file.vehicle_id {
            self.require_resource_kind(vid, ResourceKind::Vehicle).await?;
        }
        if let Some(cid) = file.category_id
            && !self.categories.contains_key(&cid) {
                return Err(EngineError::NotFound(cid));
            }

        let event = Event::FileOpened {
            id: file.id,
            student_id: file.student_id,
            instructor_id: file.instructor_id,
            vehicle_id: file.vehicle_id,
            category_id: file.category_id,
        };
        self.wal_append(&event).await?;
        self.files.insert(file.id, file);
        Ok(())
    }

    async fn require_resource_kind(&self, id: Ulid, kind: ResourceKind) -> Result<(), EngineError> {
        let rs = self.get_schedule(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard.kind != kind {
            return Err(EngineError::NotFound(id));
        }
        Ok(())
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn add_availability(
        &self,
        caller: &Caller,
        id: Ulid,
        instructor_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<AvailabilityInfo, EngineError> {
        if !caller.can_manage_availability(instructor_id) {
            return Err(EngineError::Forbidden);
        }
        let slot = parse_slot(start, end)?;
        validate_date(date)?;
        if date < today() {
            return Err(EngineError::PastDate);
        }
        if self.availability_owner.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_schedule(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let mut guard = rs.write().await;
        if guard.kind != ResourceKind::Instructor {
            return Err(EngineError::NotFound(instructor_id));
        }
        if guard.entries.len() >= MAX_ENTRIES_PER_SCHEDULE {
            return Err(EngineError::LimitExceeded("too many schedule entries"));
        }
        if let Some(hit) = guard.overlapping(date, slot).find(|e| e.is_availability()) {
            return Err(EngineError::Overlap(hit.id));
        }

        let event = Event::AvailabilityAdded { id, instructor_id, date, slot };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        self.availability_owner.insert(id, instructor_id);
        Ok(AvailabilityInfo { id, instructor_id, date, slot })
    }

    pub async fn update_availability(
        &self,
        caller: &Caller,
        id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<AvailabilityInfo, EngineError> {
        let slot = parse_slot(start, end)?;
        validate_date(date)?;
        if date < today() {
            return Err(EngineError::PastDate);
        }

        let (instructor_id, mut guard) = self.resolve_availability_write(&id).await?;
        if !caller.can_manage_availability(instructor_id) {
            return Err(EngineError::Forbidden);
        }
        let original = guard.entry(id).cloned().ok_or(EngineError::NotFound(id))?;
        // Coarse guard: any lesson of this instructor inside the ORIGINAL
        // window blocks the edit, whether or not it was booked through
        // this interval.
        if let Some(booked) = booking_in_window(&guard, original.date, original.slot) {
            return Err(EngineError::HasBookings(booked));
        }
        if let Some(hit) = guard
            .overlapping(date, slot)
            .find(|e| e.is_availability() && e.id != id)
        {
            return Err(EngineError::Overlap(hit.id));
        }

        let event = Event::AvailabilityUpdated { id, instructor_id, date, slot };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        Ok(AvailabilityInfo { id, instructor_id, date, slot })
    }

    pub async fn remove_availability(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        let (instructor_id, mut guard) = self.resolve_availability_write(&id).await?;
        if !caller.can_manage_availability(instructor_id) {
            return Err(EngineError::Forbidden);
        }
        let original = guard.entry(id).cloned().ok_or(EngineError::NotFound(id))?;
        if original.date < today() {
            return Err(EngineError::PastDate);
        }
        if let Some(booked) = booking_in_window(&guard, original.date, original.slot) {
            return Err(EngineError::HasBookings(booked));
        }

        let event = Event::AvailabilityRemoved { id, instructor_id };
        self.persist_and_apply(instructor_id, &mut guard, &event).await?;
        self.availability_owner.remove(&id);
        Ok(())
    }

    // ── Appointments ─────────────────────────────────────────

    /// Resolve the file's join chain once: instructor, optional vehicle,
    /// and the category session duration.
    fn resolve_booking(&self, file_id: Ulid) -> Result<(FileRecord, Ulid, Minute), EngineError> {
        let file = self.get_file(&file_id).ok_or(EngineError::NotFound(file_id))?;
        let instructor_id = file.instructor_id.ok_or(EngineError::NoInstructor(file_id))?;
        let category_id = file.category_id.ok_or(EngineError::NoCategory(file_id))?;
        let category = self
            .get_category(&category_id)
            .ok_or(EngineError::NotFound(category_id))?;
        Ok((file, instructor_id, category.session_minutes))
    }

    pub async fn book_appointment(
        &self,
        caller: &Caller,
        id: Ulid,
        file_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<AppointmentInfo, EngineError> {
        let (file, instructor_id, session_minutes) = self.resolve_booking(file_id)?;
        if !caller.can_book(&file) {
            return Err(EngineError::Forbidden);
        }
        let slot = parse_slot(start, end)?;
        validate_date(date)?;
        if slot_datetime(date, slot.start) <= now() {
            return Err(EngineError::PastDateTime);
        }
        if slot.duration_minutes() != session_minutes {
            return Err(EngineError::DurationMismatch {
                expected: session_minutes,
                got: slot.duration_minutes(),
            });
        }
        if self.appointments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let booking = AppointmentSlot {
            instructor_id,
            vehicle_id: file.vehicle_id,
            date,
            slot,
        };
        let mut guards = self.lock_resources(&booking.resource_ids()).await?;
        for guard in &guards {
            if guard.entries.len() >= MAX_ENTRIES_PER_SCHEDULE {
                return Err(EngineError::LimitExceeded("too many schedule entries"));
            }
        }
        let instructor_guard = guards
            .iter()
            .find(|g| g.id == instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        if !covered_by_availability(instructor_guard, date, slot) {
            return Err(EngineError::NotAvailable);
        }
        for guard in &guards {
            check_no_conflict(guard, date, slot, None)?;
        }

        let event = Event::AppointmentBooked { id, file_id, slot: booking };
        self.persist_and_apply_all(&mut guards, &event).await?;
        self.appointments.insert(id, AppointmentRecord { id, file_id, slot: booking });
        Ok(AppointmentInfo {
            id,
            file_id,
            instructor_id,
            vehicle_id: file.vehicle_id,
            date,
            slot,
        })
    }

    pub async fn reschedule_appointment(
        &self,
        caller: &Caller,
        id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<AppointmentInfo, EngineError> {
        let record = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let (file, instructor_id, session_minutes) = self.resolve_booking(record.file_id)?;
        if !caller.can_book(&file) {
            return Err(EngineError::Forbidden);
        }
        let slot = parse_slot(start, end)?;
        validate_date(date)?;
        if slot_datetime(date, slot.start) <= now() {
            return Err(EngineError::PastDateTime);
        }
        if slot.duration_minutes() != session_minutes {
            return Err(EngineError::DurationMismatch {
                expected: session_minutes,
                got: slot.duration_minutes(),
            });
        }

        let booking = AppointmentSlot {
            instructor_id,
            vehicle_id: file.vehicle_id,
            date,
            slot,
        };
        let mut guards = self.lock_resources(&booking.resource_ids()).await?;
        let instructor_guard = guards
            .iter()
            .find(|g| g.id == instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        if !covered_by_availability(instructor_guard, date, slot) {
            return Err(EngineError::NotAvailable);
        }
        for guard in &guards {
            check_no_conflict(guard, date, slot, Some(id))?;
        }

        let event = Event::AppointmentRescheduled { id, file_id: record.file_id, slot: booking };
        self.persist_and_apply_all(&mut guards, &event).await?;
        self.appointments
            .insert(id, AppointmentRecord { id, file_id: record.file_id, slot: booking });
        Ok(AppointmentInfo {
            id,
            file_id: record.file_id,
            instructor_id,
            vehicle_id: file.vehicle_id,
            date,
            slot,
        })
    }

    pub async fn cancel_appointment(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        let record = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let file = self
            .get_file(&record.file_id)
            .ok_or(EngineError::NotFound(record.file_id))?;
        if !caller.can_book(&file) {
            return Err(EngineError::Forbidden);
        }
        if slot_datetime(record.slot.date, record.slot.slot.end) <= now() {
            return Err(EngineError::PastAppointment);
        }

        let mut guards = self.lock_resources(&record.slot.resource_ids()).await?;
        let event = Event::AppointmentCancelled { id };
        self.persist_and_apply_all(&mut guards, &event).await?;
        self.appointments.remove(&id);
        Ok(())
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.exam_forms.iter() {
            let form = entry.value();
            events.push(Event::ExamFormDefined { id: form.id, max_points: form.max_points });
            if !form.items.is_empty() {
                events.push(Event::ExamItemsAdded {
                    form_id: form.id,
                    items: form.items.clone(),
                });
            }
        }
        for entry in self.categories.iter() {
            let cat = entry.value();
            events.push(Event::CategoryDefined {
                id: cat.id,
                name: cat.name.clone(),
                session_minutes: cat.session_minutes,
                exam_form_id: cat.exam_form_id,
            });
        }

        let schedule_ids: Vec<Ulid> = self.schedules.iter().map(|e| *e.key()).collect();
        for id in schedule_ids {
            let Some(rs) = self.get_schedule(&id) else { continue };
            let guard = rs.read().await;
            events.push(match guard.kind {
                ResourceKind::Instructor => Event::InstructorRegistered {
                    id: guard.id,
                    name: guard.name.clone(),
                },
                ResourceKind::Vehicle => Event::VehicleRegistered {
                    id: guard.id,
                    name: guard.name.clone(),
                },
            });
            for entry in guard.entries.iter().filter(|e| e.is_availability()) {
                events.push(Event::AvailabilityAdded {
                    id: entry.id,
                    instructor_id: guard.id,
                    date: entry.date,
                    slot: entry.slot,
                });
            }
        }

        for entry in self.files.iter() {
            let file = entry.value();
            events.push(Event::FileOpened {
                id: file.id,
                student_id: file.student_id,
                instructor_id: file.instructor_id,
                vehicle_id: file.vehicle_id,
                category_id: file.category_id,
            });
        }

        // Appointments come from the record map, once each — not from the
        // (up to two) schedules they occupy.
        for entry in self.appointments.iter() {
            let record = entry.value();
            events.push(Event::AppointmentBooked {
                id: record.id,
                file_id: record.file_id,
                slot: record.slot,
            });
        }

        let form_ids: Vec<Ulid> = self.session_forms.iter().map(|e| *e.key()).collect();
        for id in form_ids {
            let Some(form) = self.get_session_form(&id) else { continue };
            let guard = form.read().await;
            events.push(Event::FormStarted {
                id: guard.id,
                appointment_id: guard.appointment_id,
                exam_form_id: guard.exam_form_id,
                created_at: guard.created_at,
            });
            for (item_id, count) in guard.mistakes.iter() {
                events.push(Event::FormItemSet { form_id: guard.id, item_id, count });
            }
            if let (true, Some(total), Some(result), Some(at)) = (
                guard.locked,
                guard.total_points,
                guard.result,
                guard.finalized_at,
            ) {
                events.push(Event::FormFinalized {
                    form_id: guard.id,
                    total_points: total,
                    result,
                    finalized_at: at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
