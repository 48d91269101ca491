mod availability;
mod bookings;
mod conflict;
mod credentials;
mod error;
mod lifecycle;
mod occupancy;
mod queries;
mod rules;
mod snapshot;
mod violations;

pub use availability::find_conflicts;
pub use bookings::{ApprovalDecision, BookingPatch, NewBooking};
pub use conflict::now_ms;
pub use credentials::{EntryOutcome, EntryRequest, IssueRequest, ScanRequest};
pub use error::EngineError;
pub use occupancy::{AtomicCounter, OccupancyLedger};
pub use queries::BookingFilter;
pub use rules::{resolve_rule, AccessDecision, DecisionReason, NewRule, NewZone};
pub use violations::{NewViolation, ViolationFilter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::config::Policy;
use crate::model::*;
use crate::notify::AuditHub;
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;
pub type SharedCredential = Arc<Mutex<QrCode>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
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
/// 4. Single commit (fsync) for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.stage(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.commit().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            // Every earlier append has been flushed, so the file is the full history.
            let result = Wal::read(wal.path())
                .map(|recovered| snapshot::compact_events(recovered.events))
                .and_then(|events| wal.rewrite(&events));
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Cloneable sender side of the WAL writer task.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
    /// Appends left before the next one fails; negative means never.
    #[cfg(test)]
    fail_after: Arc<std::sync::atomic::AtomicI64>,
}

impl WalHandle {
    /// Write event to WAL via the background group-commit writer.
    pub async fn append(&self, event: &Event) -> Result<(), EngineError> {
        #[cfg(test)]
        if self.fail_after.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            return Err(EngineError::WalError("injected append failure".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.tx
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

    async fn compact(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// One tenant's booking and access-control state.
pub struct Engine {
    pub(super) spaces: DashMap<Ulid, SharedSpaceState>,
    /// Reverse lookup: booking id → space id
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    pub(super) check_ins: DashMap<Ulid, CheckIn>,
    pub(super) zones: DashMap<Ulid, AccessZone>,
    pub(super) rules: DashMap<Ulid, AccessRule>,
    pub(super) credentials: DashMap<Ulid, SharedCredential>,
    /// Reverse lookup: credential payload → credential id
    pub(super) payload_index: DashMap<String, Ulid>,
    pub(super) scans: RwLock<Vec<QrCodeScan>>,
    pub(super) violations: DashMap<Ulid, AccessViolation>,
    pub(super) violation_lock: Mutex<()>,
    pub(super) occupancy: Arc<OccupancyLedger>,
    pub(super) wal: WalHandle,
    pub audit: Arc<AuditHub>,
    pub policy: Policy,
}

/// Apply a booking-scoped event to a space (no locking; caller holds the lock).
fn apply_to_space(ss: &mut SpaceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            ss.upsert_booking(booking.clone());
            index.insert(booking.id, booking.space_id);
        }
        Event::BookingTransitioned {
            id,
            action,
            to,
            at,
            actor,
            note,
            ..
        } => {
            if let Some(b) = ss.booking_mut(id) {
                b.record_transition(*action, *to, *at, *actor, note.as_deref());
            }
        }
        Event::CheckInRecorded { check_in, .. } => {
            // A compacted log restores the booking snapshot first; its check-in is already applied.
            if let Some(b) = ss.booking_mut(&check_in.booking_id)
                && b.check_in_id != Some(check_in.id)
            {
                b.check_in_id = Some(check_in.id);
                b.record_transition(
                    BookingAction::CheckIn,
                    BookingStatus::CheckedIn,
                    check_in.checked_in_at,
                    check_in.actor_id,
                    None,
                );
            }
        }
        Event::CheckOutRecorded {
            booking_id,
            actor,
            at,
            ..
        } => {
            if let Some(b) = ss.booking_mut(booking_id) {
                b.record_transition(BookingAction::CheckOut, BookingStatus::Completed, *at, *actor, None);
            }
        }
        _ => {}
    }
}

/// Check-in records live outside the space lock; kept in step with the booking events.
fn apply_to_check_ins(check_ins: &DashMap<Ulid, CheckIn>, event: &Event) {
    match event {
        Event::CheckInRecorded { check_in, .. } => {
            check_ins.insert(check_in.id, check_in.clone());
        }
        Event::CheckOutRecorded { id, at, .. } => {
            if let Some(mut ci) = check_ins.get_mut(id) {
                ci.checked_out_at = Some(*at);
            }
        }
        _ => {}
    }
}

/// Apply a credential-scoped event (caller holds the credential lock).
pub(super) fn apply_to_credential(qr: &mut QrCode, event: &Event) {
    match event {
        Event::CredentialScanned { scan_count, .. } => qr.scan_count = *scan_count,
        Event::CredentialRevoked { revoked_by, at, .. } => {
            if !qr.revoked {
                qr.revoked = true;
                qr.revoked_by = Some(*revoked_by);
                qr.revoked_at = Some(*at);
            }
        }
        _ => {}
    }
}

pub(super) fn apply_to_violation(v: &mut AccessViolation, resolved_by: Ulid, at: Ms) {
    // First resolver wins.
    if !v.resolved {
        v.resolved = true;
        v.resolved_by = Some(resolved_by);
        v.resolved_at = Some(at);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, audit: Arc<AuditHub>, policy: Policy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        let wal = WalHandle {
            tx: wal_tx,
            #[cfg(test)]
            fail_after: Arc::new(std::sync::atomic::AtomicI64::new(-1)),
        };

        let engine = Self {
            spaces: DashMap::new(),
            booking_index: DashMap::new(),
            check_ins: DashMap::new(),
            zones: DashMap::new(),
            rules: DashMap::new(),
            credentials: DashMap::new(),
            payload_index: DashMap::new(),
            scans: RwLock::new(Vec::new()),
            violations: DashMap::new(),
            violation_lock: Mutex::new(()),
            occupancy: Arc::new(OccupancyLedger::new(wal.clone(), audit.clone())),
            wal,
            audit,
            policy,
        };

        // Replay events. We're the sole owner of these locks, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                events = events.len(),
                spaces = engine.spaces.len(),
                credentials = engine.credentials.len(),
                "replayed WAL"
            );
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::SpaceUpserted { space } => self.install_space(space.clone()),
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                if let Some(ss) = self.get_space(&booking.space_id) {
                    let mut guard = ss.try_write().expect("replay: uncontended write");
                    apply_to_space(&mut guard, event, &self.booking_index);
                }
            }
            Event::BookingTransitioned { space_id, .. } => {
                if let Some(ss) = self.get_space(space_id) {
                    let mut guard = ss.try_write().expect("replay: uncontended write");
                    apply_to_space(&mut guard, event, &self.booking_index);
                }
            }
            Event::CheckInRecorded {
                check_in:
                    CheckIn {
                        space_id,
                        checked_in_at: at,
                        ..
                    },
                occupancy,
            }
            | Event::CheckOutRecorded {
                space_id,
                at,
                occupancy,
                ..
            } => {
                if let Some(ss) = self.get_space(space_id) {
                    let mut guard = ss.try_write().expect("replay: uncontended write");
                    apply_to_space(&mut guard, event, &self.booking_index);
                }
                apply_to_check_ins(&self.check_ins, event);
                self.occupancy.restore(*space_id, *occupancy, *at);
            }
            Event::ZoneUpserted { zone } => {
                self.zones.insert(zone.id, zone.clone());
            }
            Event::RuleAdded { rule } => {
                self.rules.insert(rule.id, rule.clone());
            }
            Event::RuleRemoved { id } => {
                self.rules.remove(id);
            }
            Event::CredentialIssued { credential } => self.install_credential(credential.clone()),
            Event::CredentialScanned { scan, .. } => {
                if let Some(id) = scan.qr_code_id
                    && let Some(qr) = self.get_credential(&id)
                {
                    let mut guard = qr.try_lock().expect("replay: uncontended lock");
                    apply_to_credential(&mut guard, event);
                }
                self.scans
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(scan.clone());
            }
            Event::CredentialRevoked { id, .. } => {
                if let Some(qr) = self.get_credential(id) {
                    let mut guard = qr.try_lock().expect("replay: uncontended lock");
                    apply_to_credential(&mut guard, event);
                }
            }
            Event::OccupancyChanged { key, count, at } => self.occupancy.restore(*key, *count, *at),
            Event::ViolationRaised { violation } => {
                self.violations.insert(violation.id, violation.clone());
            }
            Event::ViolationResolved { id, resolved_by, at } => {
                if let Some(mut v) = self.violations.get_mut(id) {
                    apply_to_violation(&mut v, *resolved_by, *at);
                }
            }
        }
    }

    fn install_space(&self, space: Space) {
        match self.get_space(&space.id) {
            Some(ss) => {
                let mut guard = ss.try_write().expect("install_space: uncontended write");
                guard.space = space;
            }
            None => {
                self.spaces
                    .insert(space.id, Arc::new(RwLock::new(SpaceState::new(space))));
            }
        }
    }

    fn install_credential(&self, credential: QrCode) {
        self.payload_index
            .insert(credential.payload.clone(), credential.id);
        self.credentials
            .insert(credential.id, Arc::new(Mutex::new(credential)));
    }

    pub fn get_space(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub fn get_credential(&self, id: &Ulid) -> Option<SharedCredential> {
        self.credentials.get(id).map(|e| e.value().clone())
    }

    pub fn space_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call for booking-scoped events.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal.append(event).await?;
        apply_to_space(ss, event, &self.booking_index);
        apply_to_check_ins(&self.check_ins, event);
        self.audit.send(event);
        Ok(())
    }

    /// Lookup booking → space, acquire the space write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        let space_id = self
            .space_for_booking(booking_id)
            .ok_or(EngineError::not_found("booking", *booking_id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::not_found("space", space_id))?;
        Ok(ss.write_owned().await)
    }

    /// Create or replace a space's attributes. Bookings on the space are kept.
    pub async fn upsert_space(&self, space: Space) -> Result<(), EngineError> {
        use crate::limits::*;
        if space.name.trim().is_empty() || space.name.len() > MAX_NAME_LEN {
            return Err(EngineError::invalid("space name must be 1..=256 characters"));
        }
        if space.capacity == 0 {
            return Err(EngineError::invalid("space capacity must be at least 1"));
        }
        if space.hourly_rate_cents.is_some_and(|r| r < 0) {
            return Err(EngineError::invalid("hourly rate cannot be negative"));
        }
        let event = Event::SpaceUpserted {
            space: space.clone(),
        };
        match self.get_space(&space.id) {
            Some(ss) => {
                let mut guard = ss.write().await;
                self.wal.append(&event).await?;
                guard.space = space;
            }
            None => {
                if self.spaces.len() >= MAX_SPACES_PER_TENANT {
                    return Err(EngineError::LimitExceeded("too many spaces"));
                }
                self.wal.append(&event).await?;
                let ss = self
                    .spaces
                    .entry(space.id)
                    .or_insert_with(|| Arc::new(RwLock::new(SpaceState::new(space.clone()))))
                    .clone();
                // A concurrent upsert of the same new id may have won the insert; last write wins.
                ss.write().await.space = space;
            }
        }
        self.audit.send(&event);
        Ok(())
    }

    pub async fn get_space_info(&self, id: Ulid) -> Result<Space, EngineError> {
        let ss = self
            .get_space(&id)
            .ok_or(EngineError::not_found("space", id))?;
        let guard = ss.read().await;
        Ok(guard.space.clone())
    }

    /// Compact the WAL down to the events needed to recreate the current state.
    /// The fold runs inside the writer task, so appends racing with it are never lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.wal.compact().await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    /// Let `n` more appends through, then fail exactly one.
    #[cfg(test)]
    pub(super) fn fail_wal_append_after(&self, n: i64) {
        self.wal.fail_after.store(n, std::sync::atomic::Ordering::SeqCst);
    }
}
