use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::violations::NewViolation;
use super::{AtomicCounter, Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewZone {
    pub name: String,
    pub zone_type: ZoneType,
    pub restrictions: ZoneRestrictions,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewRule {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Granted,
    NoMatchingRule,
    PendingApproval,
    AtCapacity,
    OutsideZoneHours,
    ZoneInactive,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DecisionReason::Granted => "granted",
            DecisionReason::NoMatchingRule => "no matching rule",
            DecisionReason::PendingApproval => "pending approval",
            DecisionReason::AtCapacity => "zone at capacity",
            DecisionReason::OutsideZoneHours => "outside zone hours",
            DecisionReason::ZoneInactive => "zone inactive",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub matched_rule: Option<Ulid>,
    pub reason: DecisionReason,
}

impl AccessDecision {
    fn deny(reason: DecisionReason, matched_rule: Option<Ulid>) -> Self {
        Self {
            allowed: false,
            matched_rule,
            reason,
        }
    }
}

/// Empty list = any value.
fn admits<T: PartialEq>(allowed: &[T], value: Option<&T>) -> bool {
    allowed.is_empty() || value.is_some_and(|v| allowed.contains(v))
}

fn in_validity(rule: &AccessRule, at: Ms) -> bool {
    rule.valid_from.is_none_or(|from| from <= at) && rule.valid_to.is_none_or(|to| at <= to)
}

fn matches_subject(rule: &AccessRule, subject: &SubjectAttributes) -> bool {
    admits(&rule.user_roles, Some(&subject.role))
        && admits(&rule.membership_types, subject.membership_type.as_ref())
        && admits(&rule.plan_types, subject.plan_type.as_ref())
}

fn matches_time(rule: &AccessRule, at: Ms) -> bool {
    let (day, minute) = day_and_minute(at);
    (rule.days.is_empty() || rule.days.contains(&day))
        && rule.time_window.is_none_or(|w| w.contains_minute(minute))
}

/// Highest-priority active rule for the zone that admits `subject` at `at`.
/// Equal priorities resolve by rule id (oldest first), so the answer never depends on map order.
pub fn resolve_rule<'a>(
    rules: &'a [AccessRule],
    zone_id: Ulid,
    subject: &SubjectAttributes,
    at: Ms,
) -> Option<&'a AccessRule> {
    let mut candidates: Vec<&AccessRule> = rules
        .iter()
        .filter(|r| r.active)
        .filter(|r| r.zone_id.is_none_or(|z| z == zone_id))
        .filter(|r| in_validity(r, at))
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    candidates
        .into_iter()
        .find(|r| matches_subject(r, subject) && matches_time(r, at))
}

impl Engine {
    pub async fn create_zone(&self, req: NewZone) -> Result<AccessZone, EngineError> {
        if req.name.trim().is_empty() || req.name.len() > MAX_NAME_LEN {
            return Err(EngineError::invalid("zone name must be 1..=256 characters"));
        }
        if req.restrictions.max_capacity == Some(0) {
            return Err(EngineError::invalid("zone capacity must be at least 1"));
        }
        if self.zones.len() >= MAX_ZONES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many zones"));
        }
        let zone = AccessZone {
            id: Ulid::new(),
            name: req.name.trim().to_owned(),
            zone_type: req.zone_type,
            restrictions: req.restrictions,
            active: req.active,
        };
        let event = Event::ZoneUpserted { zone: zone.clone() };
        self.wal.append(&event).await?;
        self.zones.insert(zone.id, zone.clone());
        self.audit.send(&event);
        tracing::info!(zone = %zone.id, name = %zone.name, "zone created");
        Ok(zone)
    }

    pub fn get_zone(&self, id: Ulid) -> Result<AccessZone, EngineError> {
        self.zones
            .get(&id)
            .map(|z| z.clone())
            .ok_or(EngineError::not_found("zone", id))
    }

    pub fn list_zones(&self) -> Vec<AccessZone> {
        let mut zones: Vec<_> = self.zones.iter().map(|z| z.value().clone()).collect();
        zones.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        zones
    }

    pub async fn add_rule(&self, req: NewRule) -> Result<AccessRule, EngineError> {
        if req.name.trim().is_empty() || req.name.len() > MAX_NAME_LEN {
            return Err(EngineError::invalid("rule name must be 1..=256 characters"));
        }
        if let Some(zone_id) = req.zone_id
            && !self.zones.contains_key(&zone_id)
        {
            return Err(EngineError::not_found("zone", zone_id));
        }
        if let (Some(from), Some(to)) = (req.valid_from, req.valid_to)
            && from > to
        {
            return Err(EngineError::invalid("validFrom must not be after validTo"));
        }
        if req.max_occupancy == Some(0) {
            return Err(EngineError::invalid("maxOccupancy must be at least 1"));
        }
        if req.user_roles.len() + req.membership_types.len() + req.plan_types.len() + req.days.len()
            > MAX_LIST_ITEMS
        {
            return Err(EngineError::invalid("too many rule conditions"));
        }
        if self.rules.len() >= MAX_RULES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rules"));
        }

        let rule = AccessRule {
            id: Ulid::new(),
            zone_id: req.zone_id,
            name: req.name.trim().to_owned(),
            priority: req.priority,
            active: req.active,
            user_roles: req.user_roles,
            membership_types: req.membership_types,
            plan_types: req.plan_types,
            time_window: req.time_window,
            days: req.days,
            max_occupancy: req.max_occupancy,
            requires_approval: req.requires_approval,
            valid_from: req.valid_from,
            valid_to: req.valid_to,
        };
        let event = Event::RuleAdded { rule: rule.clone() };
        self.wal.append(&event).await?;
        self.rules.insert(rule.id, rule.clone());
        self.audit.send(&event);
        tracing::info!(rule = %rule.id, priority = rule.priority, "access rule added");
        Ok(rule)
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.rules.contains_key(&id) {
            return Err(EngineError::not_found("rule", id));
        }
        let event = Event::RuleRemoved { id };
        self.wal.append(&event).await?;
        self.rules.remove(&id);
        self.audit.send(&event);
        Ok(())
    }

    /// Rules in evaluation order, optionally limited to those that can govern one zone.
    pub fn list_rules(&self, zone_id: Option<Ulid>) -> Vec<AccessRule> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .filter(|r| zone_id.is_none() || r.zone_id.is_none() || r.zone_id == zone_id)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        rules
    }

    /// Decision plus the occupancy cap an admitted subject must still fit under.
    pub(super) async fn decide(
        &self,
        zone_id: Ulid,
        attrs: &SubjectAttributes,
        at: Ms,
    ) -> Result<(AccessDecision, Option<u32>), EngineError> {
        let zone = self.get_zone(zone_id)?;
        if !zone.active {
            return Ok((AccessDecision::deny(DecisionReason::ZoneInactive, None), None));
        }
        if let Some(hours) = zone.restrictions.allowed_hours
            && !hours.contains(at)
        {
            return Ok((AccessDecision::deny(DecisionReason::OutsideZoneHours, None), None));
        }

        let rules = self.list_rules(Some(zone_id));
        let Some(rule) = resolve_rule(&rules, zone_id, attrs, at) else {
            return Ok((AccessDecision::deny(DecisionReason::NoMatchingRule, None), None));
        };
        if rule.requires_approval {
            return Ok((
                AccessDecision::deny(DecisionReason::PendingApproval, Some(rule.id)),
                None,
            ));
        }

        let limit = match (rule.max_occupancy, zone.restrictions.max_capacity) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(limit) = limit
            && self.occupancy.get(zone_id).await >= limit
        {
            return Ok((
                AccessDecision::deny(DecisionReason::AtCapacity, Some(rule.id)),
                Some(limit),
            ));
        }
        Ok((
            AccessDecision {
                allowed: true,
                matched_rule: Some(rule.id),
                reason: DecisionReason::Granted,
            },
            limit,
        ))
    }

    /// Is `subject` allowed into the zone at `at`? A full zone raises a capacity violation.
    pub async fn evaluate(
        &self,
        zone_id: Ulid,
        subject: SubjectRef,
        attrs: SubjectAttributes,
        at: Ms,
    ) -> Result<AccessDecision, EngineError> {
        let (decision, limit) = self.decide(zone_id, &attrs, at).await?;
        if decision.reason == DecisionReason::AtCapacity {
            self.raise_capacity_violation(subject, zone_id, decision.matched_rule, limit, at)
                .await?;
        }
        Ok(decision)
    }

    pub(super) async fn raise_capacity_violation(
        &self,
        subject: SubjectRef,
        zone_id: Ulid,
        rule_id: Option<Ulid>,
        limit: Option<u32>,
        at: Ms,
    ) -> Result<AccessViolation, EngineError> {
        let reason = match limit {
            Some(limit) => format!("zone at capacity ({limit})"),
            None => "zone at capacity".to_owned(),
        };
        self.raise_violation(
            NewViolation {
                subject,
                zone_id: Some(zone_id),
                rule_id,
                kind: ViolationKind::CapacityExceeded,
                severity: Severity::Medium,
                reason,
            },
            at,
        )
        .await
    }
}
