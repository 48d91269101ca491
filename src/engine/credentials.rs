use rand::RngCore;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::DecisionReason;
use super::violations::NewViolation;
use super::{apply_to_credential, AtomicCounter, Engine, EngineError};

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub credential_type: CredentialType,
    pub subject: SubjectRef,
    pub valid_for_hours: u32,
    pub permissions: Vec<Permission>,
    pub max_scans: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub payload: String,
    pub location: Option<String>,
    pub device_info: Option<String>,
    pub scanned_by: Option<Ulid>,
}

/// A credential presented at a zone's door.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub zone_id: Ulid,
    pub scan: ScanRequest,
    pub attributes: SubjectAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub granted: bool,
    pub reason: String,
    pub qr_code_id: Option<Ulid>,
    pub matched_rule: Option<Ulid>,
    pub occupancy: Option<u32>,
    pub violation_id: Option<Ulid>,
}

impl EntryOutcome {
    fn denied(reason: impl Into<String>, qr_code_id: Option<Ulid>) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
            qr_code_id,
            matched_rule: None,
            occupancy: None,
            violation_id: None,
        }
    }
}

fn new_payload() -> String {
    let mut bytes = [0u8; PAYLOAD_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Scan-time verdict for a credential. Pure; the caller holds the credential lock.
fn judge(qr: &QrCode, now: Ms) -> Option<DenialReason> {
    if qr.revoked {
        Some(DenialReason::Revoked)
    } else if now > qr.expires_at {
        Some(DenialReason::Expired)
    } else if qr.max_scans.is_some_and(|max| qr.scan_count >= max) {
        Some(DenialReason::ScanLimitReached)
    } else {
        None
    }
}

fn check_optional_text(field: &str, text: Option<&str>) -> Result<(), EngineError> {
    if text.is_some_and(|t| t.len() > MAX_NAME_LEN) {
        return Err(EngineError::invalid(format!("{field} is too long")));
    }
    Ok(())
}

impl Engine {
    pub async fn issue_credential(&self, actor: Actor, req: IssueRequest, now: Ms) -> Result<QrCode, EngineError> {
        if !(MIN_VALID_FOR_HOURS..=MAX_VALID_FOR_HOURS).contains(&req.valid_for_hours) {
            return Err(EngineError::invalid(format!(
                "validFor must be between {MIN_VALID_FOR_HOURS} and {MAX_VALID_FOR_HOURS} hours"
            )));
        }
        if req.max_scans == Some(0) {
            return Err(EngineError::invalid("maxScans must be at least 1"));
        }
        if req.permissions.is_empty() {
            return Err(EngineError::invalid("at least one permission is required"));
        }
        if req.permissions.len() > MAX_PERMISSIONS {
            return Err(EngineError::invalid("too many permissions"));
        }
        for permission in &req.permissions {
            match permission {
                Permission::Zone(id) if !self.zones.contains_key(id) => {
                    return Err(EngineError::not_found("zone", *id));
                }
                Permission::Space(id) if !self.spaces.contains_key(id) => {
                    return Err(EngineError::not_found("space", *id));
                }
                _ => {}
            }
        }
        if !actor.role.is_operator() {
            let privileged = matches!(
                req.credential_type,
                CredentialType::Service | CredentialType::Emergency | CredentialType::Admin
            );
            let for_someone_else = matches!(req.subject, SubjectRef::User(id) if id != actor.user_id);
            if privileged || for_someone_else {
                return Err(EngineError::Forbidden("staff role required for this credential"));
            }
        }

        let credential = QrCode {
            id: Ulid::new(),
            credential_type: req.credential_type,
            subject: req.subject,
            payload: new_payload(),
            permissions: req.permissions,
            issued_by: actor.user_id,
            issued_at: now,
            expires_at: now + req.valid_for_hours as Ms * HOUR_MS,
            max_scans: req.max_scans,
            scan_count: 0,
            revoked: false,
            revoked_by: None,
            revoked_at: None,
        };
        let event = Event::CredentialIssued {
            credential: credential.clone(),
        };
        self.wal.append(&event).await?;
        self.install_credential(credential.clone());
        self.audit.send(&event);
        metrics::counter!(crate::observability::CREDENTIALS_ISSUED_TOTAL).increment(1);
        tracing::info!(credential = %credential.id, kind = ?credential.credential_type, "credential issued");
        Ok(credential)
    }

    /// Validate a presented payload. Every attempt is logged, granted or not.
    pub async fn scan_credential(&self, req: ScanRequest, now: Ms) -> Result<ScanResult, EngineError> {
        self.scan_inner(req, now).await.map(|(result, _)| result)
    }

    /// Scan and also hand back the credential as it stood after the scan.
    async fn scan_inner(&self, req: ScanRequest, now: Ms) -> Result<(ScanResult, Option<QrCode>), EngineError> {
        if req.payload.is_empty() || req.payload.len() > MAX_TEXT_LEN {
            return Err(EngineError::invalid("qrCodeData must be 1..=4000 characters"));
        }
        check_optional_text("location", req.location.as_deref())?;
        check_optional_text("deviceInfo", req.device_info.as_deref())?;

        let mut scan = QrCodeScan {
            id: Ulid::new(),
            qr_code_id: None,
            scanned_by: req.scanned_by,
            location: req.location,
            device_info: req.device_info,
            at: now,
            granted: false,
            denial: Some(DenialReason::NotFound),
        };

        let found = self
            .payload_index
            .get(&req.payload)
            .map(|e| *e.value())
            .and_then(|id| self.get_credential(&id));
        let Some(shared) = found else {
            self.log_scan(scan, 0).await?;
            return Ok((
                ScanResult {
                    granted: false,
                    qr_code_id: None,
                    reason: Some(DenialReason::NotFound),
                },
                None,
            ));
        };

        // Held across the limit check, the WAL append and the increment.
        let mut qr = shared.lock().await;
        scan.qr_code_id = Some(qr.id);
        scan.denial = judge(&qr, now);
        scan.granted = scan.denial.is_none();
        let scan_count = if scan.granted {
            qr.scan_count + 1
        } else {
            qr.scan_count
        };
        let event = self.log_scan(scan.clone(), scan_count).await?;
        apply_to_credential(&mut qr, &event);

        let result = ScanResult {
            granted: scan.granted,
            qr_code_id: Some(qr.id),
            reason: scan.denial,
        };
        Ok((result, Some(qr.clone())))
    }

    async fn log_scan(&self, scan: QrCodeScan, scan_count: u32) -> Result<Event, EngineError> {
        let outcome = if scan.granted { "granted" } else { "denied" };
        if let Some(reason) = scan.denial {
            tracing::info!(credential = ?scan.qr_code_id, %reason, "scan denied");
        }
        let event = Event::CredentialScanned {
            scan: scan.clone(),
            scan_count,
        };
        self.wal.append(&event).await?;
        self.scans.write().await.push(scan);
        self.audit.send(&event);
        metrics::counter!(crate::observability::SCANS_TOTAL, "outcome" => outcome).increment(1);
        Ok(event)
    }

    /// Revoke a credential. Revoking twice is a no-op.
    pub async fn revoke_credential(&self, actor: Actor, id: Ulid, now: Ms) -> Result<QrCode, EngineError> {
        let shared = self
            .get_credential(&id)
            .ok_or(EngineError::not_found("credential", id))?;
        let mut qr = shared.lock().await;
        if !actor.role.is_operator() && qr.issued_by != actor.user_id {
            return Err(EngineError::Forbidden("only staff or the issuer may revoke a credential"));
        }
        if qr.revoked {
            return Ok(qr.clone());
        }
        let event = Event::CredentialRevoked {
            id,
            revoked_by: actor.user_id,
            at: now,
        };
        self.wal.append(&event).await?;
        apply_to_credential(&mut qr, &event);
        self.audit.send(&event);
        tracing::info!(credential = %id, revoked_by = %actor.user_id, "credential revoked");
        Ok(qr.clone())
    }

    pub async fn get_credential_info(&self, id: Ulid) -> Result<QrCode, EngineError> {
        let shared = self
            .get_credential(&id)
            .ok_or(EngineError::not_found("credential", id))?;
        let qr = shared.lock().await;
        Ok(qr.clone())
    }

    /// Scan log for one credential, oldest first.
    pub async fn list_scans(&self, id: Ulid) -> Result<Vec<QrCodeScan>, EngineError> {
        if !self.credentials.contains_key(&id) {
            return Err(EngineError::not_found("credential", id));
        }
        let scans = self.scans.read().await;
        Ok(scans
            .iter()
            .filter(|s| s.qr_code_id == Some(id))
            .cloned()
            .collect())
    }

    /// Physical entry: scan, permission, zone rules, then occupancy ENTRY.
    /// Rule breaches along the way are recorded as violations.
    pub async fn request_entry(&self, req: EntryRequest, now: Ms) -> Result<EntryOutcome, EngineError> {
        let zone_id = req.zone_id;
        self.get_zone(zone_id)?;

        let (scan, credential) = self.scan_inner(req.scan, now).await?;
        let Some(qr) = credential else {
            return Ok(EntryOutcome::denied(DenialReason::NotFound.to_string(), None));
        };
        let breach = |kind, severity, reason: String| NewViolation {
            subject: qr.subject,
            zone_id: Some(zone_id),
            rule_id: None,
            kind,
            severity,
            reason,
        };

        if let Some(denial) = scan.reason {
            let (kind, severity) = match denial {
                DenialReason::Revoked => (ViolationKind::CredentialRevoked, Severity::High),
                DenialReason::Expired => (ViolationKind::CredentialExpired, Severity::Low),
                DenialReason::ScanLimitReached => (ViolationKind::ScanLimitExceeded, Severity::Medium),
                DenialReason::NotFound => {
                    return Ok(EntryOutcome::denied(denial.to_string(), Some(qr.id)));
                }
            };
            let violation = self
                .raise_violation(breach(kind, severity, denial.to_string()), now)
                .await?;
            return Ok(EntryOutcome {
                violation_id: Some(violation.id),
                ..EntryOutcome::denied(denial.to_string(), Some(qr.id))
            });
        }

        if !qr.permissions.iter().any(|p| p.covers_zone(zone_id)) {
            let reason = "credential does not cover this zone";
            let violation = self
                .raise_violation(breach(ViolationKind::RuleMismatch, Severity::Medium, reason.into()), now)
                .await?;
            return Ok(EntryOutcome {
                violation_id: Some(violation.id),
                ..EntryOutcome::denied(reason, Some(qr.id))
            });
        }

        let (decision, limit) = self.decide(zone_id, &req.attributes, now).await?;
        let mut outcome = EntryOutcome {
            matched_rule: decision.matched_rule,
            ..EntryOutcome::denied(decision.reason.to_string(), Some(qr.id))
        };
        match decision.reason {
            DecisionReason::Granted => {}
            DecisionReason::PendingApproval | DecisionReason::ZoneInactive => return Ok(outcome),
            DecisionReason::NoMatchingRule | DecisionReason::OutsideZoneHours => {
                let violation = self
                    .raise_violation(
                        NewViolation {
                            rule_id: decision.matched_rule,
                            ..breach(ViolationKind::RuleMismatch, Severity::Medium, decision.reason.to_string())
                        },
                        now,
                    )
                    .await?;
                outcome.violation_id = Some(violation.id);
                return Ok(outcome);
            }
            DecisionReason::AtCapacity => {
                let violation = self
                    .raise_capacity_violation(qr.subject, zone_id, decision.matched_rule, limit, now)
                    .await?;
                outcome.violation_id = Some(violation.id);
                return Ok(outcome);
            }
        }

        // The pre-check above can race with other entries; the counter has the final say.
        match self.occupancy.increment(zone_id, limit, now).await {
            Ok(count) => {
                tracing::info!(zone = %zone_id, credential = %qr.id, occupancy = count, "entry granted");
                Ok(EntryOutcome {
                    granted: true,
                    reason: DecisionReason::Granted.to_string(),
                    occupancy: Some(count),
                    ..outcome
                })
            }
            Err(EngineError::CapacityExceeded(_)) => {
                let violation = self
                    .raise_capacity_violation(qr.subject, zone_id, decision.matched_rule, limit, now)
                    .await?;
                outcome.reason = DecisionReason::AtCapacity.to_string();
                outcome.violation_id = Some(violation.id);
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }
}
