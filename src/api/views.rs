//! JSON renderings of engine types. Field names are camelCase and instants are RFC 3339.

use std::collections::BTreeMap;

use serde::Serialize;
use ulid::Ulid;

use crate::engine::{AccessDecision, EntryOutcome};
use crate::model::*;

use super::rfc3339;

fn opt_time(ms: Option<Ms>) -> Option<String> {
    ms.map(rfc3339)
}

fn subject_ids(subject: SubjectRef) -> (Option<Ulid>, Option<Ulid>) {
    match subject {
        SubjectRef::User(id) => (Some(id), None),
        SubjectRef::Visitor(id) => (None, Some(id)),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T> PageView<T> {
    pub fn from_page<U>(page: Page<U>, f: impl Fn(&U) -> T) -> Self {
        Self {
            items: page.items.iter().map(f).collect(),
            total: page.total,
            page: page.page,
            limit: page.limit,
        }
    }
}

// ── Spaces & bookings ────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceView {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub hourly_rate_cents: Option<i64>,
    pub active: bool,
    pub requires_approval: bool,
}

impl From<&Space> for SpaceView {
    fn from(s: &Space) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            capacity: s.capacity,
            hourly_rate_cents: s.hourly_rate_cents,
            active: s.active,
            requires_approval: s.requires_approval,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalView {
    pub decided_by: Ulid,
    pub decided_at: String,
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub status: BookingStatus,
    pub cost_cents: Option<i64>,
    pub attendees: Vec<String>,
    pub equipment: Vec<String>,
    pub approval: Option<ApprovalView>,
    pub check_in_id: Option<Ulid>,
    pub checked_in_at: Option<String>,
    pub actual_end_time: Option<String>,
    pub cancelled_at: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Booking> for BookingView {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            space_id: b.space_id,
            user_id: b.user_id,
            title: b.title.clone(),
            description: b.description.clone(),
            start_time: rfc3339(b.span.start),
            end_time: rfc3339(b.span.end),
            status: b.status,
            cost_cents: b.cost_cents,
            attendees: b.attendees.clone(),
            equipment: b.equipment.clone(),
            approval: b.approval.as_ref().map(|a| ApprovalView {
                decided_by: a.decided_by,
                decided_at: rfc3339(a.decided_at),
                approved: a.approved,
                reason: a.reason.clone(),
            }),
            check_in_id: b.check_in_id,
            checked_in_at: opt_time(b.checked_in_at),
            actual_end_time: opt_time(b.actual_end),
            cancelled_at: opt_time(b.cancelled_at),
            notes: b.notes.clone(),
            created_at: rfc3339(b.created_at),
            updated_at: rfc3339(b.updated_at),
        }
    }
}

/// A booking standing in the way of a requested interval.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictView {
    pub id: Ulid,
    pub title: String,
    pub user_id: Ulid,
    pub start_time: String,
    pub end_time: String,
    pub status: BookingStatus,
}

impl From<&BookingSummary> for ConflictView {
    fn from(s: &BookingSummary) -> Self {
        Self {
            id: s.id,
            title: s.title.clone(),
            user_id: s.user_id,
            start_time: rfc3339(s.start),
            end_time: rfc3339(s.end),
            status: s.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub is_available: bool,
    pub conflicts: Vec<ConflictView>,
}

impl From<&Availability> for AvailabilityView {
    fn from(a: &Availability) -> Self {
        Self {
            is_available: a.is_available,
            conflicts: a.conflicts.iter().map(ConflictView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInView {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub checked_in_by: Ulid,
    pub method: CheckInMethod,
    pub checked_in_at: String,
    pub checked_out_at: Option<String>,
}

impl From<&CheckIn> for CheckInView {
    fn from(c: &CheckIn) -> Self {
        Self {
            id: c.id,
            booking_id: c.booking_id,
            space_id: c.space_id,
            user_id: c.user_id,
            checked_in_by: c.actor_id,
            method: c.method,
            checked_in_at: rfc3339(c.checked_in_at),
            checked_out_at: opt_time(c.checked_out_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceUsageView {
    pub space_id: Ulid,
    pub name: String,
    pub bookings: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsView {
    pub total_bookings: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub total_revenue_cents: i64,
    pub average_duration_minutes: f64,
    pub top_spaces: Vec<SpaceUsageView>,
}

impl From<&BookingStatistics> for StatisticsView {
    fn from(s: &BookingStatistics) -> Self {
        Self {
            total_bookings: s.total,
            by_status: s.by_status.iter().map(|(st, n)| (st.as_str(), *n)).collect(),
            total_revenue_cents: s.total_revenue_cents,
            average_duration_minutes: s.average_duration_minutes,
            top_spaces: s
                .top_spaces
                .iter()
                .map(|u| SpaceUsageView {
                    space_id: u.space_id,
                    name: u.name.clone(),
                    bookings: u.bookings,
                })
                .collect(),
        }
    }
}

// ── Credentials ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeView {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    pub user_id: Option<Ulid>,
    pub visitor_id: Option<Ulid>,
    pub qr_code_data: String,
    pub permissions: Vec<Permission>,
    pub issued_by: Ulid,
    pub issued_at: String,
    pub expires_at: String,
    pub max_scans: Option<u32>,
    pub scan_count: u32,
    pub revoked: bool,
    pub revoked_by: Option<Ulid>,
    pub revoked_at: Option<String>,
}

impl From<&QrCode> for QrCodeView {
    fn from(q: &QrCode) -> Self {
        let (user_id, visitor_id) = subject_ids(q.subject);
        Self {
            id: q.id,
            credential_type: q.credential_type,
            user_id,
            visitor_id,
            qr_code_data: q.payload.clone(),
            permissions: q.permissions.clone(),
            issued_by: q.issued_by,
            issued_at: rfc3339(q.issued_at),
            expires_at: rfc3339(q.expires_at),
            max_scans: q.max_scans,
            scan_count: q.scan_count,
            revoked: q.revoked,
            revoked_by: q.revoked_by,
            revoked_at: opt_time(q.revoked_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanView {
    pub id: Ulid,
    pub qr_code_id: Option<Ulid>,
    pub scanned_by: Option<Ulid>,
    pub location: Option<String>,
    pub device_info: Option<String>,
    pub scanned_at: String,
    pub granted: bool,
    pub reason: Option<String>,
}

impl From<&QrCodeScan> for ScanView {
    fn from(s: &QrCodeScan) -> Self {
        Self {
            id: s.id,
            qr_code_id: s.qr_code_id,
            scanned_by: s.scanned_by,
            location: s.location.clone(),
            device_info: s.device_info.clone(),
            scanned_at: rfc3339(s.at),
            granted: s.granted,
            reason: s.denial.map(|d| d.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultView {
    pub granted: bool,
    pub qr_code_id: Option<Ulid>,
    pub reason: Option<String>,
}

impl From<&ScanResult> for ScanResultView {
    fn from(r: &ScanResult) -> Self {
        Self {
            granted: r.granted,
            qr_code_id: r.qr_code_id,
            reason: r.reason.map(|d| d.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub granted: bool,
    pub reason: String,
    pub qr_code_id: Option<Ulid>,
    pub matched_rule_id: Option<Ulid>,
    pub current_occupancy: Option<u32>,
    pub violation_id: Option<Ulid>,
}

impl From<&EntryOutcome> for EntryView {
    fn from(o: &EntryOutcome) -> Self {
        Self {
            granted: o.granted,
            reason: o.reason.clone(),
            qr_code_id: o.qr_code_id,
            matched_rule_id: o.matched_rule,
            current_occupancy: o.occupancy,
            violation_id: o.violation_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    pub allowed: bool,
    pub matched_rule_id: Option<Ulid>,
    pub reason: String,
}

impl From<&AccessDecision> for DecisionView {
    fn from(d: &AccessDecision) -> Self {
        Self {
            allowed: d.allowed,
            matched_rule_id: d.matched_rule,
            reason: d.reason.to_string(),
        }
    }
}

// ── Zones, rules, occupancy, violations ──────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    pub id: Ulid,
    pub name: String,
    pub zone_type: ZoneType,
    pub allowed_hours: Option<TimeWindow>,
    pub max_capacity: Option<u32>,
    pub active: bool,
}

impl From<&AccessZone> for ZoneView {
    fn from(z: &AccessZone) -> Self {
        Self {
            id: z.id,
            name: z.name.clone(),
            zone_type: z.zone_type,
            allowed_hours: z.restrictions.allowed_hours,
            max_capacity: z.restrictions.max_capacity,
            active: z.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub id: Ulid,
    pub zone_id: Option<Ulid>,
    pub name: String,
    pub priority: i32,
    pub active: bool,
    pub user_roles: Vec<UserRole>,
    pub membership_types: Vec<MembershipType>,
    pub plan_types: Vec<PlanType>,
    pub time_window: Option<TimeWindow>,
    pub days: Vec<DayOfWeek>,
    pub max_occupancy: Option<u32>,
    pub requires_approval: bool,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

impl From<&AccessRule> for RuleView {
    fn from(r: &AccessRule) -> Self {
        Self {
            id: r.id,
            zone_id: r.zone_id,
            name: r.name.clone(),
            priority: r.priority,
            active: r.active,
            user_roles: r.user_roles.clone(),
            membership_types: r.membership_types.clone(),
            plan_types: r.plan_types.clone(),
            time_window: r.time_window,
            days: r.days.clone(),
            max_occupancy: r.max_occupancy,
            requires_approval: r.requires_approval,
            valid_from: opt_time(r.valid_from),
            valid_to: opt_time(r.valid_to),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyView {
    pub id: Ulid,
    pub current_count: u32,
    pub updated_at: String,
}

impl From<&OccupancyRecord> for OccupancyView {
    fn from(o: &OccupancyRecord) -> Self {
        Self {
            id: o.key,
            current_count: o.count,
            updated_at: rfc3339(o.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationView {
    pub id: Ulid,
    pub user_id: Option<Ulid>,
    pub visitor_id: Option<Ulid>,
    pub zone_id: Option<Ulid>,
    pub rule_id: Option<Ulid>,
    pub violation_type: ViolationKind,
    pub severity: Severity,
    pub reason: String,
    pub raised_at: String,
    pub resolved: bool,
    pub resolved_by: Option<Ulid>,
    pub resolved_at: Option<String>,
}

impl From<&AccessViolation> for ViolationView {
    fn from(v: &AccessViolation) -> Self {
        let (user_id, visitor_id) = subject_ids(v.subject);
        Self {
            id: v.id,
            user_id,
            visitor_id,
            zone_id: v.zone_id,
            rule_id: v.rule_id,
            violation_type: v.kind,
            severity: v.severity,
            reason: v.reason.clone(),
            raised_at: rfc3339(v.raised_at),
            resolved: v.resolved,
            resolved_by: v.resolved_by,
            resolved_at: opt_time(v.resolved_at),
        }
    }
}
