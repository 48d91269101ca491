use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{apply_to_violation, Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewViolation {
    pub subject: SubjectRef,
    pub zone_id: Option<Ulid>,
    pub rule_id: Option<Ulid>,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub resolved: Option<bool>,
    pub severity: Option<Severity>,
    pub zone_id: Option<Ulid>,
    pub page: usize,
    pub limit: usize,
}

impl Engine {
    pub async fn raise_violation(&self, req: NewViolation, now: Ms) -> Result<AccessViolation, EngineError> {
        if req.reason.trim().is_empty() || req.reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::invalid("violation reason must be 1..=4000 characters"));
        }
        let violation = AccessViolation {
            id: Ulid::new(),
            subject: req.subject,
            zone_id: req.zone_id,
            rule_id: req.rule_id,
            kind: req.kind,
            severity: req.severity,
            reason: req.reason,
            raised_at: now,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        };
        let event = Event::ViolationRaised {
            violation: violation.clone(),
        };
        self.wal.append(&event).await?;
        self.violations.insert(violation.id, violation.clone());
        self.audit.send(&event);
        metrics::counter!(crate::observability::VIOLATIONS_RAISED_TOTAL, "kind" => kind_label(violation.kind))
            .increment(1);
        tracing::warn!(
            violation = %violation.id,
            kind = kind_label(violation.kind),
            severity = ?violation.severity,
            reason = %violation.reason,
            "access violation raised"
        );
        Ok(violation)
    }

    /// Mark resolved. Resolving twice is a no-op that keeps the first resolver.
    pub async fn resolve_violation(&self, id: Ulid, resolved_by: Ulid, now: Ms) -> Result<AccessViolation, EngineError> {
        // Serializes resolvers across the WAL append; the map guard must not live across an await.
        let _resolving = self.violation_lock.lock().await;
        let current = self.get_violation(id)?;
        if current.resolved {
            return Ok(current);
        }
        let event = Event::ViolationResolved { id, resolved_by, at: now };
        self.wal.append(&event).await?;
        let resolved = {
            let mut entry = self
                .violations
                .get_mut(&id)
                .ok_or(EngineError::not_found("violation", id))?;
            apply_to_violation(entry.value_mut(), resolved_by, now);
            entry.clone()
        };
        self.audit.send(&event);
        tracing::info!(violation = %id, %resolved_by, "access violation resolved");
        Ok(resolved)
    }

    pub fn get_violation(&self, id: Ulid) -> Result<AccessViolation, EngineError> {
        self.violations
            .get(&id)
            .map(|v| v.clone())
            .ok_or(EngineError::not_found("violation", id))
    }

    /// Newest first.
    pub fn list_violations(&self, filter: &ViolationFilter) -> Page<AccessViolation> {
        let mut items: Vec<_> = self
            .violations
            .iter()
            .filter(|v| filter.resolved.is_none_or(|r| v.resolved == r))
            .filter(|v| filter.severity.is_none_or(|s| v.severity == s))
            .filter(|v| filter.zone_id.is_none() || v.zone_id == filter.zone_id)
            .map(|v| v.value().clone())
            .collect();
        items.sort_by(|a, b| b.raised_at.cmp(&a.raised_at).then(b.id.cmp(&a.id)));
        paginate(items, filter.page, filter.limit)
    }
}

pub(crate) fn kind_label(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::CapacityExceeded => "capacity_exceeded",
        ViolationKind::RuleMismatch => "rule_mismatch",
        ViolationKind::CredentialRevoked => "credential_revoked",
        ViolationKind::CredentialExpired => "credential_expired",
        ViolationKind::ScanLimitExceeded => "scan_limit_exceeded",
    }
}

/// 1-based page; `limit` 0 means the default, capped at the maximum page size.
pub(crate) fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let limit = match limit {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    let page = page.max(1);
    let total = items.len();
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();
    Page {
        items,
        total,
        page,
        limit,
    }
}
