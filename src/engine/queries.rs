use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::Caller;
use crate::model::*;

use super::availability::open_slots;
use super::conflict::{today, validate_date};
use super::stats::{self, FinalizedSession};
use super::{Engine, EngineError};

impl Engine {
    /// Future availability of one instructor, ordered by (date, start).
    pub async fn list_future_availability(
        &self,
        instructor_id: Ulid,
    ) -> Result<Vec<AvailabilityInfo>, EngineError> {
        let rs = self
            .get_schedule(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = rs.read().await;
        let cutoff = today();
        Ok(guard
            .entries
            .iter()
            .filter(|e| e.is_availability() && e.date >= cutoff)
            .map(|e| AvailabilityInfo {
                id: e.id,
                instructor_id,
                date: e.date,
                slot: e.slot,
            })
            .collect())
    }

    /// Bookable slots for a file on a date, plus the session duration the
    /// grid was walked with. Recomputed fresh on every call.
    pub async fn list_open_slots(
        &self,
        file_id: Ulid,
        date: NaiveDate,
    ) -> Result<(Minute, Vec<TimeSlot>), EngineError> {
        let file = self.get_file(&file_id).ok_or(EngineError::NotFound(file_id))?;
        let instructor_id = file.instructor_id.ok_or(EngineError::NoInstructor(file_id))?;
        let category_id = file.category_id.ok_or(EngineError::NoCategory(file_id))?;
        let category = self
            .get_category(&category_id)
            .ok_or(EngineError::NotFound(category_id))?;
        validate_date(date)?;
        if date < today() {
            return Err(EngineError::PastDate);
        }

        let instructor_rs = self
            .get_schedule(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let instructor_guard = instructor_rs.read_owned().await;
        let vehicle_guard = match file.vehicle_id {
            Some(vid) => {
                let rs = self.get_schedule(&vid).ok_or(EngineError::NotFound(vid))?;
                Some(rs.read_owned().await)
            }
            None => None,
        };

        let slots = open_slots(
            &instructor_guard,
            vehicle_guard.as_deref(),
            date,
            category.session_minutes,
        );
        Ok((category.session_minutes, slots))
    }

    /// Committed appointments of one file, ordered by (date, start).
    pub fn list_appointments(&self, file_id: Ulid) -> Result<Vec<AppointmentInfo>, EngineError> {
        if !self.files.contains_key(&file_id) {
            return Err(EngineError::NotFound(file_id));
        }
        let mut infos: Vec<AppointmentInfo> = self
            .appointments
            .iter()
            .filter(|e| e.value().file_id == file_id)
            .map(|e| {
                let r = e.value();
                AppointmentInfo {
                    id: r.id,
                    file_id: r.file_id,
                    instructor_id: r.slot.instructor_id,
                    vehicle_id: r.slot.vehicle_id,
                    date: r.slot.date,
                    slot: r.slot.slot,
                }
            })
            .collect();
        infos.sort_by_key(|i| (i.date, i.slot.start));
        Ok(infos)
    }

    // ── Mistake statistics ───────────────────────────────────

    /// Finalized sessions of a file in chronological order, mistakes in
    /// catalog order. Forms whose appointment has since been cancelled
    /// are skipped.
    async fn finalized_sessions(&self, file_id: Ulid) -> Vec<FinalizedSession> {
        let form_ids: Vec<Ulid> = self.session_forms.iter().map(|e| *e.key()).collect();
        let mut sessions: Vec<(Minute, FinalizedSession)> = Vec::new();
        for id in form_ids {
            let Some(form) = self.get_session_form(&id) else { continue };
            let guard = form.read().await;
            if !guard.locked {
                continue;
            }
            let Some(record) = self.get_appointment(&guard.appointment_id) else { continue };
            if record.file_id != file_id {
                continue;
            }
            let Some(total_points) = guard.total_points else { continue };
            let mistakes = match self.get_exam_form(&guard.exam_form_id) {
                Some(catalog) => catalog
                    .items
                    .iter()
                    .filter_map(|i| {
                        let count = guard.mistakes.count(i.id);
                        (count > 0).then_some((i.id, count))
                    })
                    .collect(),
                None => guard.mistakes.iter().collect(),
            };
            sessions.push((
                record.slot.slot.start,
                FinalizedSession {
                    date: record.slot.date,
                    total_points,
                    mistakes,
                },
            ));
        }
        sessions.sort_by_key(|(start, s)| (s.date, *start));
        sessions.into_iter().map(|(_, s)| s).collect()
    }

    fn viewable_file(&self, caller: &Caller, file_id: Ulid) -> Result<FileRecord, EngineError> {
        let file = self.get_file(&file_id).ok_or(EngineError::NotFound(file_id))?;
        if !caller.can_view_file(&file) {
            return Err(EngineError::Forbidden);
        }
        Ok(file)
    }

    /// Item ids of the file's penalty catalog in display order; falls back
    /// to first-appearance order across the sessions when no catalog is
    /// attached to the file any more.
    fn heatmap_items(&self, file: &FileRecord, sessions: &[FinalizedSession]) -> Vec<Ulid> {
        let catalog = file
            .category_id
            .and_then(|cid| self.get_category(&cid))
            .and_then(|c| c.exam_form_id)
            .and_then(|fid| self.get_exam_form(&fid));
        if let Some(catalog) = catalog {
            return catalog.items.iter().map(|i| i.id).collect();
        }
        let mut items = Vec::new();
        for session in sessions {
            for &(id, _) in &session.mistakes {
                if !items.contains(&id) {
                    items.push(id);
                }
            }
        }
        items
    }

    pub async fn mistake_trend(
        &self,
        caller: &Caller,
        file_id: Ulid,
    ) -> Result<Vec<TrendPoint>, EngineError> {
        self.viewable_file(caller, file_id)?;
        let sessions = self.finalized_sessions(file_id).await;
        Ok(stats::trend_series(&sessions))
    }

    pub async fn mistake_heatmap(
        &self,
        caller: &Caller,
        file_id: Ulid,
    ) -> Result<Vec<HeatmapCell>, EngineError> {
        let file = self.viewable_file(caller, file_id)?;
        let sessions = self.finalized_sessions(file_id).await;
        let items = self.heatmap_items(&file, &sessions);
        Ok(stats::heatmap(&sessions, &items))
    }

    pub async fn score_average(
        &self,
        caller: &Caller,
        file_id: Ulid,
        window: u32,
    ) -> Result<Vec<AveragePoint>, EngineError> {
        if window == 0 {
            return Err(EngineError::InvalidRange);
        }
        self.viewable_file(caller, file_id)?;
        let sessions = self.finalized_sessions(file_id).await;
        Ok(stats::moving_average(&sessions, window as usize))
    }
}
