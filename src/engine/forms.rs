use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::auth::Caller;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn make_view(form: &SessionForm, record: &AppointmentRecord, file: &FileRecord) -> FormView {
    FormView {
        id: form.id,
        appointment_id: form.appointment_id,
        exam_form_id: form.exam_form_id,
        student_id: file.student_id,
        date: record.slot.date,
        locked: form.locked,
        created_at: form.created_at,
        finalized_at: form.finalized_at,
        total_points: form.total_points,
        result: form.result,
        mistakes: form.mistakes.iter().collect(),
    }
}

impl Engine {
    fn appointment_context(
        &self,
        appointment_id: Ulid,
    ) -> Result<(AppointmentRecord, FileRecord), EngineError> {
        let record = self
            .get_appointment(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;
        let file = self
            .get_file(&record.file_id)
            .ok_or(EngineError::NotFound(record.file_id))?;
        Ok((record, file))
    }

    /// NotStarted → Open. One form per appointment, reserved atomically on
    /// the appointment index before the WAL write.
    pub async fn start_form(
        &self,
        caller: &Caller,
        id: Ulid,
        appointment_id: Ulid,
    ) -> Result<FormView, EngineError> {
        let (record, file) = self.appointment_context(appointment_id)?;
        if !caller.can_drive_form(&file) {
            return Err(EngineError::Forbidden);
        }
        let exam_form_id = file
            .category_id
            .and_then(|cid| self.get_category(&cid))
            .and_then(|c| c.exam_form_id)
            .filter(|fid| self.exam_forms.contains_key(fid))
            .ok_or(EngineError::NoCategoryForm(file.id))?;
        if self.session_forms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        match self.form_by_appointment.entry(appointment_id) {
            Entry::Occupied(existing) => return Err(EngineError::AlreadyExists(*existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let created_at = Utc::now();
        let event = Event::FormStarted { id, appointment_id, exam_form_id, created_at };
        if let Err(e) = self.wal_append(&event).await {
            // Release the reservation so a retry can claim it.
            self.form_by_appointment.remove(&appointment_id);
            return Err(e);
        }
        let form = SessionForm::open(id, appointment_id, exam_form_id, created_at);
        self.session_forms.insert(id, Arc::new(RwLock::new(form.clone())));
        self.notify.send(id, &event);
        Ok(make_view(&form, &record, &file))
    }

    /// Open → Open. `delta` must be +1 or −1; the count floors at zero,
    /// zero entries are pruned, and decrementing an absent item is a no-op
    /// that reports 0. Serialized per form by the row lock.
    pub async fn mark_mistake(
        &self,
        caller: &Caller,
        form_id: Ulid,
        item_id: Ulid,
        delta: i32,
    ) -> Result<u32, EngineError> {
        let form = self
            .get_session_form(&form_id)
            .ok_or(EngineError::NotFound(form_id))?;
        let mut guard = form.write().await;
        if guard.locked {
            return Err(EngineError::Locked(form_id));
        }
        let (_, file) = self.appointment_context(guard.appointment_id)?;
        if !caller.can_drive_form(&file) {
            return Err(EngineError::Forbidden);
        }
        let exam_form = self
            .get_exam_form(&guard.exam_form_id)
            .ok_or(EngineError::NotFound(guard.exam_form_id))?;
        if !exam_form.contains_item(item_id) {
            return Err(EngineError::UnknownItem(item_id));
        }

        let current = guard.mistakes.count(item_id);
        let count = match delta {
            1 => current + 1,
            -1 => current.saturating_sub(1),
            _ => return Err(EngineError::InvalidRange),
        };
        if count == current {
            // Decrement of an absent item — nothing to persist.
            return Ok(count);
        }

        let event = Event::FormItemSet { form_id, item_id, count };
        self.wal_append(&event).await?;
        guard.mistakes.set(item_id, count);
        self.notify.send(form_id, &event);
        Ok(count)
    }

    /// Open → Locked, exactly once. Computes the penalty total and the
    /// pass/fail result, stamps `finalized_at`, then seals the record.
    pub async fn finalize_form(&self, caller: &Caller, form_id: Ulid) -> Result<FormView, EngineError> {
        let form = self
            .get_session_form(&form_id)
            .ok_or(EngineError::NotFound(form_id))?;
        let mut guard = form.write().await;
        if guard.locked {
            return Err(EngineError::Locked(form_id));
        }
        let (record, file) = self.appointment_context(guard.appointment_id)?;
        if !caller.can_drive_form(&file) {
            return Err(EngineError::Forbidden);
        }
        let exam_form = self
            .get_exam_form(&guard.exam_form_id)
            .ok_or(EngineError::NotFound(guard.exam_form_id))?;

        let total_points = guard.mistakes.total_points(&exam_form);
        let result = if total_points > exam_form.max_points {
            SessionResult::Failed
        } else {
            SessionResult::Ok
        };
        let finalized_at = Utc::now();

        let event = Event::FormFinalized { form_id, total_points, result, finalized_at };
        self.wal_append(&event).await?;
        guard.locked = true;
        guard.total_points = Some(total_points);
        guard.result = Some(result);
        guard.finalized_at = Some(finalized_at);
        self.notify.send(form_id, &event);
        Ok(make_view(&guard, &record, &file))
    }

    pub async fn get_form(&self, caller: &Caller, form_id: Ulid) -> Result<FormView, EngineError> {
        let form = self
            .get_session_form(&form_id)
            .ok_or(EngineError::NotFound(form_id))?;
        let guard = form.read().await;
        let (record, file) = self.appointment_context(guard.appointment_id)?;
        if !caller.can_view_file(&file) {
            return Err(EngineError::Forbidden);
        }
        Ok(make_view(&guard, &record, &file))
    }

    /// All of a student's session forms, date-filtered and paginated,
    /// ordered by appointment (date, start). Pages are 1-based.
    pub async fn list_forms_by_student(
        &self,
        caller: &Caller,
        student_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<FormView>, EngineError> {
        if page == 0 || per_page == 0 || per_page > MAX_PAGE_SIZE {
            return Err(EngineError::BadPagination);
        }
        if let (Some(from), Some(to)) = (from, to)
            && from > to {
                return Err(EngineError::InvalidRange);
            }
        if !caller.can_view_student(student_id) {
            return Err(EngineError::Forbidden);
        }

        let form_ids: Vec<Ulid> = self.session_forms.iter().map(|e| *e.key()).collect();
        let mut views: Vec<(TimeSlot, FormView)> = Vec::new();
        for id in form_ids {
            let Some(form) = self.get_session_form(&id) else { continue };
            let guard = form.read().await;
            let Ok((record, file)) = self.appointment_context(guard.appointment_id) else {
                continue;
            };
            if file.student_id != student_id {
                continue;
            }
            if from.is_some_and(|f| record.slot.date < f) || to.is_some_and(|t| record.slot.date > t) {
                continue;
            }
            views.push((record.slot.slot, make_view(&guard, &record, &file)));
        }
        views.sort_by(|a, b| (a.1.date, a.0.start).cmp(&(b.1.date, b.0.start)));

        let offset = (page as usize - 1) * per_page as usize;
        Ok(views
            .into_iter()
            .map(|(_, v)| v)
            .skip(offset)
            .take(per_page as usize)
            .collect())
    }
}
