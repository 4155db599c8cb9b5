mod availability;
mod conflict;
mod error;
mod forms;
mod mutations;
mod queries;
mod stats;

pub use availability::{open_slots, slot_grid};
pub use error::EngineError;
pub use stats::{heatmap, moving_average, trend_series, FinalizedSession};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedScheduleState = Arc<RwLock<ScheduleState>>;
pub type SharedSessionForm = Arc<RwLock<SessionForm>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One driving school's scheduling and evaluation state. Every mutation is
/// WAL-appended before it is applied, and conflict-check-and-commit runs
/// under the write lock of every resource schedule it books.
pub struct Engine {
    pub schedules: DashMap<Ulid, SharedScheduleState>,
    pub(super) files: DashMap<Ulid, FileRecord>,
    pub(super) categories: DashMap<Ulid, TeachingCategory>,
    pub(super) exam_forms: DashMap<Ulid, ExamForm>,
    pub(super) appointments: DashMap<Ulid, AppointmentRecord>,
    pub(super) session_forms: DashMap<Ulid, SharedSessionForm>,
    pub(super) form_by_appointment: DashMap<Ulid, Ulid>,
    /// Reverse lookup: availability interval id → instructor id.
    pub(super) availability_owner: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a schedule-level event to one ScheduleState (no locking — caller
/// holds the lock). Appointment events touch up to two schedules; the
/// entry is only inserted on the schedule the slot actually occupies.
fn apply_to_schedule(rs: &mut ScheduleState, event: &Event) {
    match event {
        Event::AvailabilityAdded { id, date, slot, .. } => {
            rs.insert_entry(ScheduleEntry {
                id: *id,
                date: *date,
                slot: *slot,
                kind: EntryKind::Availability,
            });
        }
        Event::AvailabilityUpdated { id, date, slot, .. } => {
            rs.remove_entry(*id);
            rs.insert_entry(ScheduleEntry {
                id: *id,
                date: *date,
                slot: *slot,
                kind: EntryKind::Availability,
            });
        }
        Event::AvailabilityRemoved { id, .. } => {
            rs.remove_entry(*id);
        }
        Event::AppointmentBooked { id, file_id, slot } => {
            if slot.instructor_id == rs.id || slot.vehicle_id == Some(rs.id) {
                rs.insert_entry(ScheduleEntry {
                    id: *id,
                    date: slot.date,
                    slot: slot.slot,
                    kind: EntryKind::Lesson { file_id: *file_id },
                });
            }
        }
        Event::AppointmentRescheduled { id, file_id, slot } => {
            rs.remove_entry(*id);
            if slot.instructor_id == rs.id || slot.vehicle_id == Some(rs.id) {
                rs.insert_entry(ScheduleEntry {
                    id: *id,
                    date: slot.date,
                    slot: slot.slot,
                    kind: EntryKind::Lesson { file_id: *file_id },
                });
            }
        }
        Event::AppointmentCancelled { id } => {
            rs.remove_entry(*id);
        }
        // Registry and form events are applied at the map level, not here.
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            schedules: DashMap::new(),
            files: DashMap::new(),
            categories: DashMap::new(),
            exam_forms: DashMap::new(),
            appointments: DashMap::new(),
            session_forms: DashMap::new(),
            form_by_appointment: DashMap::new(),
            availability_owner: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this may run inside an async context (lazy school creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::InstructorRegistered { id, name } => {
                let rs = ScheduleState::new(*id, ResourceKind::Instructor, name.clone());
                self.schedules.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::VehicleRegistered { id, name } => {
                let rs = ScheduleState::new(*id, ResourceKind::Vehicle, name.clone());
                self.schedules.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::CategoryDefined { id, name, session_minutes, exam_form_id } => {
                self.categories.insert(
                    *id,
                    TeachingCategory {
                        id: *id,
                        name: name.clone(),
                        session_minutes: *session_minutes,
                        exam_form_id: *exam_form_id,
                    },
                );
            }
            Event::ExamFormDefined { id, max_points } => {
                self.exam_forms.insert(*id, ExamForm::new(*id, *max_points));
            }
            Event::ExamItemsAdded { form_id, items } => {
                if let Some(mut form) = self.exam_forms.get_mut(form_id) {
                    for item in items {
                        form.insert_item(item.clone());
                    }
                }
            }
            Event::FileOpened { id, student_id, instructor_id, vehicle_id, category_id } => {
                self.files.insert(
                    *id,
                    FileRecord {
                        id: *id,
                        student_id: *student_id,
                        instructor_id: *instructor_id,
                        vehicle_id: *vehicle_id,
                        category_id: *category_id,
                    },
                );
            }
            Event::AvailabilityAdded { id, instructor_id, .. }
            | Event::AvailabilityUpdated { id, instructor_id, .. } => {
                self.availability_owner.insert(*id, *instructor_id);
                self.replay_to_schedule(*instructor_id, event);
            }
            Event::AvailabilityRemoved { id, instructor_id } => {
                self.availability_owner.remove(id);
                self.replay_to_schedule(*instructor_id, event);
            }
            Event::AppointmentBooked { id, file_id, slot }
            | Event::AppointmentRescheduled { id, file_id, slot } => {
                self.appointments.insert(
                    *id,
                    AppointmentRecord {
                        id: *id,
                        file_id: *file_id,
                        slot: *slot,
                    },
                );
                for rid in slot.resource_ids() {
                    self.replay_to_schedule(rid, event);
                }
            }
            Event::AppointmentCancelled { id } => {
                if let Some((_, record)) = self.appointments.remove(id) {
                    for rid in record.slot.resource_ids() {
                        self.replay_to_schedule(rid, event);
                    }
                }
            }
            Event::FormStarted { id, appointment_id, exam_form_id, created_at } => {
                let form = SessionForm::open(*id, *appointment_id, *exam_form_id, *created_at);
                self.session_forms.insert(*id, Arc::new(RwLock::new(form)));
                self.form_by_appointment.insert(*appointment_id, *id);
            }
            Event::FormItemSet { form_id, item_id, count } => {
                if let Some(entry) = self.session_forms.get(form_id) {
                    let form = entry.value().clone();
                    let mut guard = form.try_write().expect("replay: uncontended write");
                    guard.mistakes.set(*item_id, *count);
                }
            }
            Event::FormFinalized { form_id, total_points, result, finalized_at } => {
                if let Some(entry) = self.session_forms.get(form_id) {
                    let form = entry.value().clone();
                    let mut guard = form.try_write().expect("replay: uncontended write");
                    guard.locked = true;
                    guard.total_points = Some(*total_points);
                    guard.result = Some(*result);
                    guard.finalized_at = Some(*finalized_at);
                }
            }
        }
    }

    fn replay_to_schedule(&self, resource_id: Ulid, event: &Event) {
        if let Some(entry) = self.schedules.get(&resource_id) {
            let rs_arc = entry.value().clone();
            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
            apply_to_schedule(&mut guard, event);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, id: &Ulid) -> Option<SharedScheduleState> {
        self.schedules.get(id).map(|e| e.value().clone())
    }

    pub fn get_file(&self, id: &Ulid) -> Option<FileRecord> {
        self.files.get(id).map(|e| e.value().clone())
    }

    pub fn get_category(&self, id: &Ulid) -> Option<TeachingCategory> {
        self.categories.get(id).map(|e| e.value().clone())
    }

    pub fn get_exam_form(&self, id: &Ulid) -> Option<ExamForm> {
        self.exam_forms.get(id).map(|e| e.value().clone())
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<AppointmentRecord> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_session_form(&self, id: &Ulid) -> Option<SharedSessionForm> {
        self.session_forms.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call for a single schedule.
    pub(super) async fn persist_and_apply(
        &self,
        resource_id: Ulid,
        rs: &mut ScheduleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_schedule(rs, event);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// WAL-append once, then apply to every held schedule guard. Used by
    /// appointment mutations, which occupy instructor + vehicle at once.
    pub(super) async fn persist_and_apply_all(
        &self,
        guards: &mut [OwnedRwLockWriteGuard<ScheduleState>],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for guard in guards.iter_mut() {
            apply_to_schedule(guard, event);
            self.notify.send(guard.id, event);
        }
        Ok(())
    }

    /// Lookup availability interval → owning instructor, acquire write lock.
    pub(super) async fn resolve_availability_write(
        &self,
        interval_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<ScheduleState>), EngineError> {
        let instructor_id = self
            .availability_owner
            .get(interval_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*interval_id))?;
        let rs = self
            .get_schedule(&instructor_id)
            .ok_or(EngineError::NotFound(instructor_id))?;
        let guard = rs.write_owned().await;
        Ok((instructor_id, guard))
    }

    /// Acquire write locks for a set of resource ids in sorted order (the
    /// caller passes `AppointmentSlot::resource_ids`) to prevent deadlocks.
    pub(super) async fn lock_resources(
        &self,
        resource_ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<ScheduleState>>, EngineError> {
        let mut guards = Vec::with_capacity(resource_ids.len());
        for rid in resource_ids {
            let rs = self
                .get_schedule(rid)
                .ok_or(EngineError::NotFound(*rid))?;
            guards.push(rs.write_owned().await);
        }
        Ok(guards)
    }
}
