use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::{apply_to_credential, apply_to_violation};

/// Fold a full event history into the minimal event list that replays to the same state.
///
/// Entity snapshots replace their deltas. Scan records are the audit trail and are kept
/// verbatim; because the last scan of a credential carries its final count, replaying them
/// after the credential snapshot converges on the same `scan_count`.
/// Occupancy records are emitted after check-ins, so the latest count wins on replay.
pub(super) fn compact_events(history: Vec<Event>) -> Vec<Event> {
    let mut spaces: Vec<Space> = Vec::new();
    let mut space_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut bookings: Vec<Booking> = Vec::new();
    let mut booking_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut check_ins: Vec<(CheckIn, u32)> = Vec::new();
    let mut check_in_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut zones: Vec<AccessZone> = Vec::new();
    let mut zone_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut rules: Vec<Option<AccessRule>> = Vec::new();
    let mut rule_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut credentials: Vec<QrCode> = Vec::new();
    let mut credential_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut scans: Vec<Event> = Vec::new();
    let mut occupancy: Vec<(Ulid, u32, Ms)> = Vec::new();
    let mut occupancy_pos: HashMap<Ulid, usize> = HashMap::new();
    let mut violations: Vec<AccessViolation> = Vec::new();
    let mut violation_pos: HashMap<Ulid, usize> = HashMap::new();

    fn upsert<T>(items: &mut Vec<T>, pos: &mut HashMap<Ulid, usize>, id: Ulid, item: T) {
        match pos.get(&id) {
            Some(&i) => items[i] = item,
            None => {
                pos.insert(id, items.len());
                items.push(item);
            }
        }
    }

    for event in history {
        match event {
            Event::SpaceUpserted { space } => {
                let id = space.id;
                upsert(&mut spaces, &mut space_pos, id, space);
            }
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                let id = booking.id;
                upsert(&mut bookings, &mut booking_pos, id, booking);
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
                if let Some(&i) = booking_pos.get(&id) {
                    bookings[i].record_transition(action, to, at, actor, note.as_deref());
                }
            }
            Event::CheckInRecorded { check_in, occupancy: count } => {
                if let Some(&i) = booking_pos.get(&check_in.booking_id) {
                    let b = &mut bookings[i];
                    b.check_in_id = Some(check_in.id);
                    b.record_transition(
                        BookingAction::CheckIn,
                        BookingStatus::CheckedIn,
                        check_in.checked_in_at,
                        check_in.actor_id,
                        None,
                    );
                }
                let (id, key, at) = (check_in.id, check_in.space_id, check_in.checked_in_at);
                upsert(&mut occupancy, &mut occupancy_pos, key, (key, count, at));
                upsert(&mut check_ins, &mut check_in_pos, id, (check_in, count));
            }
            Event::CheckOutRecorded {
                id,
                booking_id,
                space_id,
                actor,
                at,
                occupancy: count,
            } => {
                upsert(&mut occupancy, &mut occupancy_pos, space_id, (space_id, count, at));
                if let Some(&i) = booking_pos.get(&booking_id) {
                    bookings[i].record_transition(
                        BookingAction::CheckOut,
                        BookingStatus::Completed,
                        at,
                        actor,
                        None,
                    );
                }
                if let Some(&i) = check_in_pos.get(&id) {
                    check_ins[i].0.checked_out_at = Some(at);
                }
            }
            Event::ZoneUpserted { zone } => {
                let id = zone.id;
                upsert(&mut zones, &mut zone_pos, id, zone);
            }
            Event::RuleAdded { rule } => {
                let id = rule.id;
                upsert(&mut rules, &mut rule_pos, id, Some(rule));
            }
            Event::RuleRemoved { id } => {
                if let Some(&i) = rule_pos.get(&id) {
                    rules[i] = None;
                }
            }
            Event::CredentialIssued { credential } => {
                let id = credential.id;
                upsert(&mut credentials, &mut credential_pos, id, credential);
            }
            Event::CredentialScanned { scan, scan_count } => {
                if let Some(&i) = scan.qr_code_id.as_ref().and_then(|id| credential_pos.get(id)) {
                    credentials[i].scan_count = scan_count;
                }
                scans.push(Event::CredentialScanned { scan, scan_count });
            }
            Event::CredentialRevoked { id, revoked_by, at } => {
                if let Some(&i) = credential_pos.get(&id) {
                    let revoked = Event::CredentialRevoked { id, revoked_by, at };
                    apply_to_credential(&mut credentials[i], &revoked);
                }
            }
            Event::OccupancyChanged { key, count, at } => {
                upsert(&mut occupancy, &mut occupancy_pos, key, (key, count, at));
            }
            Event::ViolationRaised { violation } => {
                let id = violation.id;
                upsert(&mut violations, &mut violation_pos, id, violation);
            }
            Event::ViolationResolved { id, resolved_by, at } => {
                if let Some(&i) = violation_pos.get(&id) {
                    apply_to_violation(&mut violations[i], resolved_by, at);
                }
            }
        }
    }

    let mut out = Vec::new();
    out.extend(spaces.into_iter().map(|space| Event::SpaceUpserted { space }));
    out.extend(
        bookings
            .into_iter()
            .map(|booking| Event::BookingCreated { booking }),
    );
    out.extend(
        check_ins
            .into_iter()
            .map(|(check_in, occupancy)| Event::CheckInRecorded { check_in, occupancy }),
    );
    out.extend(zones.into_iter().map(|zone| Event::ZoneUpserted { zone }));
    out.extend(rules.into_iter().flatten().map(|rule| Event::RuleAdded { rule }));
    out.extend(
        credentials
            .into_iter()
            .map(|credential| Event::CredentialIssued { credential }),
    );
    out.extend(scans);
    out.extend(
        occupancy
            .into_iter()
            .map(|(key, count, at)| Event::OccupancyChanged { key, count, at }),
    );
    out.extend(
        violations
            .into_iter()
            .map(|violation| Event::ViolationRaised { violation }),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(id: Ulid, name: &str) -> Space {
        Space {
            id,
            name: name.into(),
            capacity: 4,
            hourly_rate_cents: Some(2_000),
            active: true,
            requires_approval: false,
        }
    }

    #[test]
    fn latest_space_snapshot_wins() {
        let id = Ulid::new();
        let out = compact_events(vec![
            Event::SpaceUpserted { space: space(id, "Old") },
            Event::SpaceUpserted { space: space(id, "New") },
        ]);
        assert_eq!(out, vec![Event::SpaceUpserted { space: space(id, "New") }]);
    }

    #[test]
    fn removed_rules_are_dropped() {
        let rule = AccessRule {
            id: Ulid::new(),
            zone_id: None,
            name: "members".into(),
            priority: 1,
            active: true,
            user_roles: vec![UserRole::Member],
            membership_types: vec![],
            plan_types: vec![],
            time_window: None,
            days: vec![],
            max_occupancy: None,
            requires_approval: false,
            valid_from: None,
            valid_to: None,
        };
        let out = compact_events(vec![
            Event::RuleAdded { rule: rule.clone() },
            Event::RuleRemoved { id: rule.id },
        ]);
        assert!(out.is_empty());
    }

    #[test]
    fn occupancy_keeps_last_count() {
        let key = Ulid::new();
        let out = compact_events(vec![
            Event::OccupancyChanged { key, count: 1, at: 10 },
            Event::OccupancyChanged { key, count: 2, at: 20 },
            Event::OccupancyChanged { key, count: 1, at: 30 },
        ]);
        assert_eq!(out, vec![Event::OccupancyChanged { key, count: 1, at: 30 }]);
    }

    #[test]
    fn check_in_count_yields_to_later_occupancy() {
        let space_id = Ulid::new();
        let check_in = CheckIn {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            space_id,
            user_id: Ulid::new(),
            actor_id: Ulid::new(),
            method: CheckInMethod::Manual,
            checked_in_at: 10,
            checked_out_at: None,
        };
        let out = compact_events(vec![
            Event::CheckInRecorded { check_in: check_in.clone(), occupancy: 1 },
            Event::OccupancyChanged { key: space_id, count: 2, at: 20 },
        ]);
        assert_eq!(
            out,
            vec![
                Event::CheckInRecorded { check_in, occupancy: 1 },
                Event::OccupancyChanged { key: space_id, count: 2, at: 20 },
            ]
        );
    }

    #[test]
    fn resolved_violation_is_folded_into_snapshot() {
        let v = AccessViolation {
            id: Ulid::new(),
            subject: SubjectRef::Visitor(Ulid::new()),
            zone_id: None,
            rule_id: None,
            kind: ViolationKind::RuleMismatch,
            severity: Severity::High,
            reason: "no matching rule".into(),
            raised_at: 100,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        };
        let resolver = Ulid::new();
        let out = compact_events(vec![
            Event::ViolationRaised { violation: v.clone() },
            Event::ViolationResolved { id: v.id, resolved_by: resolver, at: 200 },
        ]);
        match &out[..] {
            [Event::ViolationRaised { violation }] => {
                assert!(violation.resolved);
                assert_eq!(violation.resolved_by, Some(resolver));
                assert_eq!(violation.resolved_at, Some(200));
            }
            other => panic!("unexpected compaction: {other:?}"),
        }
    }
}
