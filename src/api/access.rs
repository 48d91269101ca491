use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use ulid::Ulid;

use crate::auth::Caller;
use crate::engine::{
    now_ms, EngineError, EntryRequest, IssueRequest, NewRule, NewZone, ScanRequest, ViolationFilter,
};
use crate::model::*;

use super::views::*;
use super::{parse_optional_instant, ApiError};

fn default_true() -> bool {
    true
}

fn require_operator(caller: &Caller) -> Result<(), ApiError> {
    if caller.actor.role.is_operator() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("staff role required").into())
    }
}

fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.actor.role.can_approve() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("manager or admin role required").into())
    }
}

/// Exactly one of a user or a visitor; a missing subject means the caller.
fn subject_from(caller: &Caller, user_id: Option<Ulid>, visitor_id: Option<Ulid>) -> Result<SubjectRef, ApiError> {
    match (user_id, visitor_id) {
        (Some(_), Some(_)) => Err(ApiError::bad_request("give either userId or visitorId, not both")),
        (Some(id), None) => Ok(SubjectRef::User(id)),
        (None, Some(id)) => Ok(SubjectRef::Visitor(id)),
        (None, None) => Ok(SubjectRef::User(caller.actor.user_id)),
    }
}

// ── Credentials ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueBody {
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    pub user_id: Option<Ulid>,
    pub visitor_id: Option<Ulid>,
    /// Hours.
    pub valid_for: u32,
    pub permissions: Vec<Permission>,
    pub max_scans: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBody {
    pub qr_code_data: String,
    pub location: Option<String>,
    pub device_info: Option<String>,
}

pub async fn issue(caller: Caller, Json(body): Json<IssueBody>) -> Result<impl IntoResponse, ApiError> {
    let req = IssueRequest {
        credential_type: body.credential_type,
        subject: subject_from(&caller, body.user_id, body.visitor_id)?,
        valid_for_hours: body.valid_for,
        permissions: body.permissions,
        max_scans: body.max_scans,
    };
    let qr = caller.engine.issue_credential(caller.actor, req, now_ms()).await?;
    Ok((StatusCode::CREATED, Json(QrCodeView::from(&qr))))
}

/// Issuer or staff only; the payload is a bearer secret.
pub async fn get_credential(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let qr = caller.engine.get_credential_info(id).await?;
    let own = qr.issued_by == caller.actor.user_id || qr.subject == SubjectRef::User(caller.actor.user_id);
    if !own && !caller.actor.role.is_operator() {
        return Err(EngineError::Forbidden("cannot view another user's credential").into());
    }
    Ok(Json(QrCodeView::from(&qr)))
}

pub async fn revoke(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let qr = caller.engine.revoke_credential(caller.actor, id, now_ms()).await?;
    Ok(Json(QrCodeView::from(&qr)))
}

pub async fn scans(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let scans = caller.engine.list_scans(id).await?;
    Ok(Json(scans.iter().map(ScanView::from).collect::<Vec<_>>()))
}

pub async fn scan(caller: Caller, Json(body): Json<ScanBody>) -> Result<impl IntoResponse, ApiError> {
    let req = ScanRequest {
        payload: body.qr_code_data,
        location: body.location,
        device_info: body.device_info,
        scanned_by: Some(caller.actor.user_id),
    };
    let result = caller.engine.scan_credential(req, now_ms()).await?;
    Ok(Json(ScanResultView::from(&result)))
}

// ── Entry & rule evaluation ──────────────────────────────────────

fn default_role() -> UserRole {
    UserRole::Member
}

/// Attributes of the person at the door, as vouched for by the door integration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributesBody {
    #[serde(default = "default_role")]
    pub role: UserRole,
    pub membership_type: Option<MembershipType>,
    pub plan_type: Option<PlanType>,
}

impl From<&AttributesBody> for SubjectAttributes {
    fn from(a: &AttributesBody) -> Self {
        SubjectAttributes {
            role: a.role,
            membership_type: a.membership_type,
            plan_type: a.plan_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBody {
    pub zone_id: Ulid,
    pub qr_code_data: String,
    pub location: Option<String>,
    pub device_info: Option<String>,
    #[serde(flatten)]
    pub attributes: AttributesBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
    pub zone_id: Ulid,
    pub user_id: Option<Ulid>,
    pub visitor_id: Option<Ulid>,
    /// Defaults to now.
    pub at: Option<String>,
    #[serde(flatten)]
    pub attributes: AttributesBody,
}

/// Only an operator (the door integration) may assert who is at the door; a member
/// could otherwise claim any role, membership or plan.
pub async fn entry(caller: Caller, Json(body): Json<EntryBody>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let req = EntryRequest {
        zone_id: body.zone_id,
        attributes: SubjectAttributes::from(&body.attributes),
        scan: ScanRequest {
            payload: body.qr_code_data,
            location: body.location,
            device_info: body.device_info,
            scanned_by: Some(caller.actor.user_id),
        },
    };
    let outcome = caller.engine.request_entry(req, now_ms()).await?;
    Ok(Json(EntryView::from(&outcome)))
}

/// Operator only: evaluation takes asserted attributes and may raise a violation against the subject.
pub async fn evaluate(caller: Caller, Json(body): Json<EvaluateBody>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let subject = subject_from(&caller, body.user_id, body.visitor_id)?;
    let at = parse_optional_instant("at", body.at.as_deref())?.unwrap_or_else(now_ms);
    let decision = caller
        .engine
        .evaluate(body.zone_id, subject, SubjectAttributes::from(&body.attributes), at)
        .await?;
    Ok(Json(DecisionView::from(&decision)))
}

// ── Occupancy ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyBody {
    pub zone_id: Option<Ulid>,
    pub space_id: Option<Ulid>,
    pub action: OccupancyAction,
}

pub async fn occupancy(caller: Caller) -> Result<impl IntoResponse, ApiError> {
    let records = caller.engine.list_occupancy().await;
    Ok(Json(records.iter().map(OccupancyView::from).collect::<Vec<_>>()))
}

pub async fn update_occupancy(caller: Caller, Json(body): Json<OccupancyBody>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let key = match (body.zone_id, body.space_id) {
        (Some(id), None) | (None, Some(id)) => id,
        _ => return Err(ApiError::bad_request("give exactly one of zoneId or spaceId")),
    };
    let now = now_ms();
    let count = caller.engine.update_occupancy(key, body.action, now).await?;
    Ok(Json(OccupancyView::from(&OccupancyRecord {
        key,
        count,
        updated_at: now,
    })))
}

// ── Zones & rules ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneBody {
    pub name: String,
    pub zone_type: ZoneType,
    pub allowed_hours: Option<TimeWindow>,
    pub max_capacity: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBody {
    pub zone_id: Option<Ulid>,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub user_roles: Vec<UserRole>,
    #[serde(default)]
    pub membership_types: Vec<MembershipType>,
    #[serde(default)]
    pub plan_types: Vec<PlanType>,
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub days: Vec<DayOfWeek>,
    pub max_occupancy: Option<u32>,
    #[serde(default)]
    pub requires_approval: bool,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleQuery {
    pub zone_id: Option<Ulid>,
}

pub async fn create_zone(caller: Caller, Json(body): Json<ZoneBody>) -> Result<impl IntoResponse, ApiError> {
    require_admin(&caller)?;
    let zone = caller
        .engine
        .create_zone(NewZone {
            name: body.name,
            zone_type: body.zone_type,
            restrictions: ZoneRestrictions {
                allowed_hours: body.allowed_hours,
                max_capacity: body.max_capacity,
            },
            active: body.active,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ZoneView::from(&zone))))
}

pub async fn list_zones(caller: Caller) -> Result<impl IntoResponse, ApiError> {
    let zones = caller.engine.list_zones();
    Ok(Json(zones.iter().map(ZoneView::from).collect::<Vec<_>>()))
}

pub async fn get_zone(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let zone = caller.engine.get_zone(id)?;
    Ok(Json(ZoneView::from(&zone)))
}

pub async fn add_rule(caller: Caller, Json(body): Json<RuleBody>) -> Result<impl IntoResponse, ApiError> {
    require_admin(&caller)?;
    let rule = caller
        .engine
        .add_rule(NewRule {
            zone_id: body.zone_id,
            name: body.name,
            priority: body.priority,
            active: body.active,
            user_roles: body.user_roles,
            membership_types: body.membership_types,
            plan_types: body.plan_types,
            time_window: body.time_window,
            days: body.days,
            max_occupancy: body.max_occupancy,
            requires_approval: body.requires_approval,
            valid_from: parse_optional_instant("validFrom", body.valid_from.as_deref())?,
            valid_to: parse_optional_instant("validTo", body.valid_to.as_deref())?,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(RuleView::from(&rule))))
}

pub async fn list_rules(caller: Caller, Query(q): Query<RuleQuery>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let rules = caller.engine.list_rules(q.zone_id);
    Ok(Json(rules.iter().map(RuleView::from).collect::<Vec<_>>()))
}

pub async fn remove_rule(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    require_admin(&caller)?;
    caller.engine.remove_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Violations ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationQuery {
    pub resolved: Option<bool>,
    pub severity: Option<Severity>,
    pub zone_id: Option<Ulid>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

pub async fn violations(caller: Caller, Query(q): Query<ViolationQuery>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let page = caller.engine.list_violations(&ViolationFilter {
        resolved: q.resolved,
        severity: q.severity,
        zone_id: q.zone_id,
        page: q.page.unwrap_or(0),
        limit: q.limit.unwrap_or(0),
    });
    Ok(Json(PageView::from_page(page, |v| ViolationView::from(v))))
}

pub async fn resolve_violation(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let violation = caller
        .engine
        .resolve_violation(id, caller.actor.user_id, now_ms())
        .await?;
    Ok(Json(ViolationView::from(&violation)))
}
