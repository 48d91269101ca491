use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;
use crate::notify::AuditHub;

use super::{Engine, EngineError, WalHandle};

/// Per-key counter whose check-then-modify steps are atomic.
#[async_trait]
pub trait AtomicCounter: Send + Sync {
    /// +1, refused with `CapacityExceeded` if the count is already at `limit`.
    async fn increment(&self, key: Ulid, limit: Option<u32>, at: Ms) -> Result<u32, EngineError>;
    /// −1, floored at zero.
    async fn decrement(&self, key: Ulid, at: Ms) -> Result<u32, EngineError>;
    async fn get(&self, key: Ulid) -> u32;
}

/// Live occupancy per zone or space. Each key has its own mutex, held across the
/// read, the WAL append and the write, so concurrent ENTRY/EXIT never lose an update.
pub struct OccupancyLedger {
    records: DashMap<Ulid, Arc<Mutex<OccupancyRecord>>>,
    wal: WalHandle,
    audit: Arc<AuditHub>,
}

impl OccupancyLedger {
    pub(super) fn new(wal: WalHandle, audit: Arc<AuditHub>) -> Self {
        Self {
            records: DashMap::new(),
            wal,
            audit,
        }
    }

    /// Replay path: sole owner, no locking needed.
    pub(super) fn restore(&self, key: Ulid, count: u32, at: Ms) {
        self.records.insert(
            key,
            Arc::new(Mutex::new(OccupancyRecord {
                key,
                count,
                updated_at: at,
            })),
        );
    }

    fn slot(&self, key: Ulid) -> Arc<Mutex<OccupancyRecord>> {
        self.records
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(OccupancyRecord {
                    key,
                    count: 0,
                    updated_at: 0,
                }))
            })
            .clone()
    }

    /// Lock one key for a caller that persists its own event carrying the new count
    /// (check-in, check-out). The caller writes the record only after that event commits.
    pub(super) async fn lock_key(&self, key: Ulid) -> OwnedMutexGuard<OccupancyRecord> {
        self.slot(key).lock_owned().await
    }

    async fn commit(&self, record: &mut OccupancyRecord, count: u32, at: Ms) -> Result<u32, EngineError> {
        let event = Event::OccupancyChanged {
            key: record.key,
            count,
            at,
        };
        self.wal.append(&event).await?;
        record.count = count;
        record.updated_at = at;
        self.audit.send(&event);
        Ok(count)
    }

    pub async fn list(&self) -> Vec<OccupancyRecord> {
        let slots: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(*slot.lock().await);
        }
        out.sort_by_key(|r| r.key);
        out
    }
}

#[async_trait]
impl AtomicCounter for OccupancyLedger {
    async fn increment(&self, key: Ulid, limit: Option<u32>, at: Ms) -> Result<u32, EngineError> {
        let slot = self.slot(key);
        let mut record = slot.lock().await;
        if let Some(limit) = limit
            && record.count >= limit
        {
            return Err(EngineError::CapacityExceeded(limit));
        }
        let count = record.count.saturating_add(1);
        self.commit(&mut record, count, at).await
    }

    async fn decrement(&self, key: Ulid, at: Ms) -> Result<u32, EngineError> {
        let slot = self.slot(key);
        let mut record = slot.lock().await;
        if record.count == 0 {
            // Entry/exit sensing is lossy; an unmatched EXIT is clamped, not an error.
            tracing::warn!(%key, "occupancy EXIT below zero clamped");
            metrics::counter!(crate::observability::OCCUPANCY_UNDERFLOW_TOTAL).increment(1);
            return Ok(0);
        }
        let count = record.count - 1;
        self.commit(&mut record, count, at).await
    }

    async fn get(&self, key: Ulid) -> u32 {
        let Some(slot) = self.records.get(&key).map(|e| e.value().clone()) else {
            return 0;
        };
        slot.lock().await.count
    }
}

impl Engine {
    fn check_occupancy_key(&self, key: Ulid) -> Result<(), EngineError> {
        if self.zones.contains_key(&key) || self.spaces.contains_key(&key) {
            Ok(())
        } else {
            Err(EngineError::not_found("zone or space", key))
        }
    }

    /// Record a physical ENTRY or EXIT and return the new count.
    pub async fn update_occupancy(
        &self,
        key: Ulid,
        action: OccupancyAction,
        now: Ms,
    ) -> Result<u32, EngineError> {
        self.check_occupancy_key(key)?;
        let count = match action {
            OccupancyAction::Entry => self.occupancy.increment(key, None, now).await?,
            OccupancyAction::Exit => self.occupancy.decrement(key, now).await?,
        };
        tracing::debug!(%key, ?action, count, "occupancy updated");
        Ok(count)
    }

    pub async fn get_occupancy(&self, key: Ulid) -> Result<u32, EngineError> {
        self.check_occupancy_key(key)?;
        Ok(self.occupancy.get(key).await)
    }

    pub async fn list_occupancy(&self) -> Vec<OccupancyRecord> {
        self.occupancy.list().await
    }
}
