use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::Policy;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::AuditHub;
use crate::reaper;

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant name too long")]
    NameTooLong,
    #[error("tenant name has no usable characters")]
    InvalidName,
    #[error("too many tenants")]
    TooMany,
    #[error("cannot open tenant log: {0}")]
    Io(#[from] io::Error),
}

impl TenantError {
    /// The caller sent a bad tenant id, as opposed to the server being unable to serve it.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TenantError::NameTooLong | TenantError::InvalidName)
    }
}

/// A tenant id is used verbatim as its WAL file stem, so it must be non-empty
/// `[A-Za-z0-9_-]`. Ids are rejected rather than cleaned: two ids must never map to one file.
fn validate_tenant(tenant: &str) -> Result<(), TenantError> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(TenantError::NameTooLong);
    }
    let valid = !tenant.is_empty()
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TenantError::InvalidName)
    }
}

/// One engine per tenant, created on first use.
///
/// A tenant's engine owns its WAL file `<data_dir>/<stem>.wal`, a no-show sweeper and a
/// compactor. Nothing is shared between tenants except this map.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    /// Reserved tenant slots; taken before an engine opens, returned if it fails to.
    live: AtomicUsize,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: Policy,
    sweep_every: Duration,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: Policy, sweep_every: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            live: AtomicUsize::new(0),
            data_dir,
            compact_threshold,
            policy,
            sweep_every,
        }
    }

    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, TenantError> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        validate_tenant(tenant)?;

        // Holding the entry guard means two first requests cannot both open the WAL.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                // The shard guard does not cover other shards, so the cap is an atomic reservation.
                let reserved = self
                    .live
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < MAX_TENANTS).then_some(n + 1));
                if reserved.is_err() {
                    tracing::warn!(tenant, "tenant limit reached");
                    return Err(TenantError::TooMany);
                }
                let wal_path = self.data_dir.join(format!("{tenant}.wal"));
                let engine = match Engine::new(wal_path, Arc::new(AuditHub::new()), self.policy) {
                    Ok(engine) => Arc::new(engine),
                    Err(e) => {
                        self.live.fetch_sub(1, Ordering::SeqCst);
                        return Err(e.into());
                    }
                };
                tokio::spawn(reaper::run_no_show_sweeper(engine.clone(), self.sweep_every));
                tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));
                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenant_count() as f64);
        tracing::info!(tenant, "tenant engine started");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
