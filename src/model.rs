use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Spaces ───────────────────────────────────────────────────────

/// A bookable physical unit. Written by space administration only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub hourly_rate_cents: Option<i64>,
    pub active: bool,
    pub requires_approval: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
    ];

    /// Statuses that hold their interval on the space.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::CheckedIn => "CHECKED_IN",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle move requested on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Approve,
    Reject,
    CheckIn,
    CheckOut,
    Cancel,
    MarkNoShow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub decided_by: Ulid,
    pub decided_at: Ms,
    pub approved: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub status: BookingStatus,
    pub cost_cents: Option<i64>,
    pub attendees: Vec<String>,
    pub equipment: Vec<String>,
    pub approval: Option<Approval>,
    pub check_in_id: Option<Ulid>,
    pub checked_in_at: Option<Ms>,
    pub actual_end: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A space plus every booking ever made on it.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space: Space,
    /// All bookings (any status), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl SpaceState {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            bookings: Vec::new(),
        }
    }

    /// Insert or replace a booking, keeping sort order by span.start.
    pub fn upsert_booking(&mut self, booking: Booking) {
        self.remove_booking(&booking.id);
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: &Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == *id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInMethod {
    Manual,
    Qr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub actor_id: Ulid,
    pub method: CheckInMethod,
    pub checked_in_at: Ms,
    pub checked_out_at: Option<Ms>,
}

// ── Callers & subjects ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Member,
    Staff,
    Manager,
    Admin,
}

impl UserRole {
    pub fn can_approve(self) -> bool {
        matches!(self, UserRole::Manager | UserRole::Admin)
    }

    /// May act on other users' bookings at the front desk.
    pub fn is_operator(self) -> bool {
        !matches!(self, UserRole::Member)
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(UserRole::Member),
            "staff" => Ok(UserRole::Staff),
            "manager" => Ok(UserRole::Manager),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipType {
    HotDesk,
    DedicatedDesk,
    PrivateOffice,
    DayPass,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

/// Attributes of whoever is asking to enter a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttributes {
    pub role: UserRole,
    pub membership_type: Option<MembershipType>,
    pub plan_type: Option<PlanType>,
}

/// A credential or violation is tied to exactly one of a user or a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRef {
    User(Ulid),
    Visitor(Ulid),
}

// ── Zones & rules ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Entrance,
    MeetingRoom,
    Desk,
    Office,
    Common,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

/// Daily window in minutes since UTC midnight, `[start, end)`.
/// `start > end` wraps past midnight (e.g. 22:00–06:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeWindowRepr", into = "TimeWindowRepr")]
pub struct TimeWindow {
    start_minute: u16,
    end_minute: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimeWindowRepr {
    start: String,
    end: String,
}

const MINUTES_PER_DAY: u16 = 24 * 60;

fn parse_hhmm(s: &str) -> Result<u16, String> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
    let h: u16 = h.parse().map_err(|_| format!("bad hour in {s:?}"))?;
    let m: u16 = m.parse().map_err(|_| format!("bad minute in {s:?}"))?;
    // 24:00 is accepted as an end-of-day marker.
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return Err(format!("time out of range: {s:?}"));
    }
    Ok(h * 60 + m)
}

impl TimeWindow {
    pub fn new(start_minute: u16, end_minute: u16) -> Result<Self, String> {
        if start_minute > MINUTES_PER_DAY || end_minute > MINUTES_PER_DAY {
            return Err("minute of day out of range".into());
        }
        if start_minute == end_minute {
            return Err("time window is empty".into());
        }
        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn contains_minute(&self, minute: u16) -> bool {
        if self.start_minute < self.end_minute {
            self.start_minute <= minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }

    pub fn contains(&self, at: Ms) -> bool {
        let (_, minute) = day_and_minute(at);
        self.contains_minute(minute)
    }
}

impl TryFrom<TimeWindowRepr> for TimeWindow {
    type Error = String;

    fn try_from(repr: TimeWindowRepr) -> Result<Self, Self::Error> {
        TimeWindow::new(parse_hhmm(&repr.start)?, parse_hhmm(&repr.end)?)
    }
}

impl From<TimeWindow> for TimeWindowRepr {
    fn from(w: TimeWindow) -> Self {
        let fmt = |m: u16| format!("{:02}:{:02}", m / 60, m % 60);
        TimeWindowRepr {
            start: fmt(w.start_minute),
            end: fmt(w.end_minute),
        }
    }
}

/// Day of week and minute of day (UTC) for an instant.
pub fn day_and_minute(at: Ms) -> (DayOfWeek, u16) {
    let dt = DateTime::<Utc>::from_timestamp_millis(at).unwrap_or_default();
    let minute = (dt.hour() * 60 + dt.minute()) as u16;
    (dt.weekday().into(), minute)
}

/// Zone-level restriction policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRestrictions {
    #[serde(default)]
    pub allowed_hours: Option<TimeWindow>,
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessZone {
    pub id: Ulid,
    pub name: String,
    pub zone_type: ZoneType,
    pub restrictions: ZoneRestrictions,
    pub active: bool,
}

/// Access policy. Empty attribute lists match any subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub id: Ulid,
    /// `None` applies the rule to every zone.
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
    pub valid_from: Option<Ms>,
    pub valid_to: Option<Ms>,
}

// ── Credentials ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialType {
    Member,
    Visitor,
    Temporary,
    Service,
    Emergency,
    Admin,
}

/// What a credential opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Zone(Ulid),
    Space(Ulid),
    AllZones,
    AllSpaces,
}

impl Permission {
    pub fn covers_zone(&self, zone_id: Ulid) -> bool {
        match self {
            Permission::Zone(id) => *id == zone_id,
            Permission::AllZones => true,
            Permission::Space(_) | Permission::AllSpaces => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    pub id: Ulid,
    pub credential_type: CredentialType,
    pub subject: SubjectRef,
    pub payload: String,
    pub permissions: Vec<Permission>,
    pub issued_by: Ulid,
    pub issued_at: Ms,
    pub expires_at: Ms,
    pub max_scans: Option<u32>,
    pub scan_count: u32,
    pub revoked: bool,
    pub revoked_by: Option<Ulid>,
    pub revoked_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NotFound,
    Revoked,
    Expired,
    ScanLimitReached,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DenialReason::NotFound => "credential not found",
            DenialReason::Revoked => "credential revoked",
            DenialReason::Expired => "credential expired",
            DenialReason::ScanLimitReached => "scan limit reached",
        })
    }
}

/// One scan attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodeScan {
    pub id: Ulid,
    pub qr_code_id: Option<Ulid>,
    pub scanned_by: Option<Ulid>,
    pub location: Option<String>,
    pub device_info: Option<String>,
    pub at: Ms,
    pub granted: bool,
    pub denial: Option<DenialReason>,
}

// ── Occupancy & violations ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyAction {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    /// Zone or space id.
    pub key: Ulid,
    pub count: u32,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    CapacityExceeded,
    RuleMismatch,
    CredentialRevoked,
    CredentialExpired,
    ScanLimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessViolation {
    pub id: Ulid,
    pub subject: SubjectRef,
    pub zone_id: Option<Ulid>,
    pub rule_id: Option<Ulid>,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub reason: String,
    pub raised_at: Ms,
    pub resolved: bool,
    pub resolved_by: Option<Ulid>,
    pub resolved_at: Option<Ms>,
}

/// The event types: flat, no nesting beyond entity snapshots. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceUpserted {
        space: Space,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
    },
    BookingTransitioned {
        id: Ulid,
        space_id: Ulid,
        action: BookingAction,
        to: BookingStatus,
        at: Ms,
        actor: Ulid,
        note: Option<String>,
    },
    /// Opens a check-in, moves its booking to CHECKED_IN and sets the space's occupancy.
    CheckInRecorded {
        check_in: CheckIn,
        occupancy: u32,
    },
    /// Closes a check-in, completes its booking and sets the space's occupancy.
    CheckOutRecorded {
        id: Ulid,
        booking_id: Ulid,
        space_id: Ulid,
        actor: Ulid,
        at: Ms,
        occupancy: u32,
    },
    ZoneUpserted {
        zone: AccessZone,
    },
    RuleAdded {
        rule: AccessRule,
    },
    RuleRemoved {
        id: Ulid,
    },
    CredentialIssued {
        credential: QrCode,
    },
    CredentialScanned {
        scan: QrCodeScan,
        scan_count: u32,
    },
    CredentialRevoked {
        id: Ulid,
        revoked_by: Ulid,
        at: Ms,
    },
    OccupancyChanged {
        key: Ulid,
        count: u32,
        at: Ms,
    },
    ViolationRaised {
        violation: AccessViolation,
    },
    ViolationResolved {
        id: Ulid,
        resolved_by: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Slim view of a booking, used in conflict reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingSummary {
    pub id: Ulid,
    pub title: String,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl From<&Booking> for BookingSummary {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            title: b.title.clone(),
            user_id: b.user_id,
            start: b.span.start,
            end: b.span.end,
            status: b.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub is_available: bool,
    pub conflicts: Vec<BookingSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceUsage {
    pub space_id: Ulid,
    pub name: String,
    pub bookings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingStatistics {
    pub total: usize,
    pub by_status: Vec<(BookingStatus, usize)>,
    pub total_revenue_cents: i64,
    pub average_duration_minutes: f64,
    pub top_spaces: Vec<SpaceUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub granted: bool,
    pub qr_code_id: Option<Ulid>,
    pub reason: Option<DenialReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_try_new_rejects_empty() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    fn booking_at(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            space_id: Ulid::nil(),
            user_id: Ulid::nil(),
            title: "t".into(),
            description: None,
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            cost_cents: None,
            attendees: vec![],
            equipment: vec![],
            approval: None,
            check_in_id: None,
            checked_in_at: None,
            actual_end: None,
            cancelled_at: None,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn empty_space() -> SpaceState {
        SpaceState::new(Space {
            id: Ulid::new(),
            name: "Room".into(),
            capacity: 4,
            hourly_rate_cents: None,
            active: true,
            requires_approval: false,
        })
    }

    #[test]
    fn booking_ordering() {
        let mut ss = empty_space();
        ss.upsert_booking(booking_at(300, 400));
        ss.upsert_booking(booking_at(100, 200));
        ss.upsert_booking(booking_at(200, 300));
        assert_eq!(ss.bookings[0].span.start, 100);
        assert_eq!(ss.bookings[1].span.start, 200);
        assert_eq!(ss.bookings[2].span.start, 300);
    }

    #[test]
    fn upsert_moves_rescheduled_booking() {
        let mut ss = empty_space();
        let mut b = booking_at(100, 200);
        ss.upsert_booking(b.clone());
        ss.upsert_booking(booking_at(300, 400));
        b.span = Span::new(500, 600);
        ss.upsert_booking(b.clone());
        assert_eq!(ss.bookings.len(), 2);
        assert_eq!(ss.bookings[1].id, b.id);
        assert_eq!(ss.booking(&b.id).unwrap().span, Span::new(500, 600));
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ss = empty_space();
        ss.upsert_booking(booking_at(100, 200));
        ss.upsert_booking(booking_at(450, 600));
        ss.upsert_booking(booking_at(1000, 1100));

        let query = Span::new(500, 800);
        let hits: Vec<_> = ss.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // Booking ending exactly at query.start is NOT overlapping (half-open)
        let mut ss = empty_space();
        ss.upsert_booking(booking_at(100, 200));
        let hits: Vec<_> = ss.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut ss = empty_space();
        ss.upsert_booking(booking_at(100, 201));
        let hits: Vec<_> = ss.overlapping(&Span::new(200, 300)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut ss = empty_space();
        ss.upsert_booking(booking_at(100, 200));
        assert!(ss.remove_booking(&Ulid::new()).is_none());
        assert_eq!(ss.bookings.len(), 1);
    }

    #[test]
    fn status_slot_holding() {
        assert!(BookingStatus::Pending.holds_slot());
        assert!(BookingStatus::Confirmed.holds_slot());
        assert!(BookingStatus::CheckedIn.holds_slot());
        assert!(!BookingStatus::Cancelled.holds_slot());
        assert!(!BookingStatus::Completed.holds_slot());
        assert!(!BookingStatus::NoShow.holds_slot());
    }

    #[test]
    fn time_window_parses_and_contains() {
        let w: TimeWindow =
            serde_json::from_str(r#"{"start":"09:00","end":"17:30"}"#).unwrap();
        assert!(w.contains_minute(9 * 60));
        assert!(w.contains_minute(17 * 60 + 29));
        assert!(!w.contains_minute(17 * 60 + 30));
        assert!(!w.contains_minute(8 * 60 + 59));
    }

    #[test]
    fn time_window_wraps_midnight() {
        let w = TimeWindow::new(22 * 60, 6 * 60).unwrap();
        assert!(w.contains_minute(23 * 60));
        assert!(w.contains_minute(0));
        assert!(w.contains_minute(5 * 60 + 59));
        assert!(!w.contains_minute(6 * 60));
        assert!(!w.contains_minute(12 * 60));
    }

    #[test]
    fn time_window_bad_shapes_rejected_at_deserialization() {
        for bad in [
            r#"{"start":"9","end":"17:00"}"#,
            r#"{"start":"25:00","end":"26:00"}"#,
            r#"{"start":"09:60","end":"10:00"}"#,
            r#"{"start":"10:00","end":"10:00"}"#,
            r#"{"from":"09:00","to":"10:00"}"#,
        ] {
            assert!(serde_json::from_str::<TimeWindow>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn time_window_serializes_as_hhmm() {
        let w = TimeWindow::new(8 * 60 + 5, 24 * 60).unwrap();
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"start":"08:05","end":"24:00"}"#);
    }

    #[test]
    fn day_and_minute_utc() {
        // 2024-01-01T10:30:00Z was a Monday.
        let at = 1_704_105_000_000;
        assert_eq!(day_and_minute(at), (DayOfWeek::Mon, 10 * 60 + 30));
    }

    #[test]
    fn permission_json_shape() {
        let zone = Ulid::new();
        let perms: Vec<Permission> =
            serde_json::from_str(&format!(r#"[{{"zone":"{zone}"}},"all_spaces"]"#)).unwrap();
        assert_eq!(perms, vec![Permission::Zone(zone), Permission::AllSpaces]);
        assert!(perms[0].covers_zone(zone));
        assert!(!perms[1].covers_zone(zone));
        assert!(serde_json::from_str::<Permission>(r#"{"floor":3}"#).is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ZoneUpserted {
            zone: AccessZone {
                id: Ulid::new(),
                name: "Meeting Room A".into(),
                zone_type: ZoneType::MeetingRoom,
                restrictions: ZoneRestrictions {
                    allowed_hours: Some(TimeWindow::new(8 * 60, 20 * 60).unwrap()),
                    max_capacity: Some(8),
                },
                active: true,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
