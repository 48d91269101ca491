use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    booking_cost, check_no_conflict, check_space_accepts, validate_interval, validate_list,
    validate_text, validate_title,
};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub space_id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub attendees: Vec<String>,
    pub equipment: Vec<String>,
    pub notes: Option<String>,
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub attendees: Option<Vec<String>>,
    pub equipment: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approve: bool,
    pub reason: Option<String>,
}

/// Booking owner, or front-desk staff acting for them.
fn may_operate(actor: &Actor, booking: &Booking) -> bool {
    actor.user_id == booking.user_id || actor.role.is_operator()
}

fn parse_booking_payload(payload: &str) -> Result<Ulid, EngineError> {
    payload
        .strip_prefix("booking:")
        .and_then(|id| Ulid::from_string(id.trim()).ok())
        .ok_or_else(|| EngineError::invalid("QR payload must look like booking:<id>"))
}

impl Engine {
    pub async fn create_booking(
        &self,
        actor: Actor,
        req: NewBooking,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if req.user_id != actor.user_id && !actor.role.is_operator() {
            return Err(EngineError::Forbidden("cannot book on behalf of another user"));
        }
        validate_title(&req.title)?;
        validate_text("description", req.description.as_deref())?;
        validate_text("notes", req.notes.as_deref())?;
        validate_list("attendees", &req.attendees)?;
        validate_list("equipment", &req.equipment)?;
        let span = validate_interval(&self.policy, req.start, req.end, now)?;

        let ss = self
            .get_space(&req.space_id)
            .ok_or(EngineError::not_found("space", req.space_id))?;
        let mut guard = ss.write().await;
        check_space_accepts(&guard.space, req.attendees.len())?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many bookings on space"));
        }
        if let Err(e) = check_no_conflict(&guard, &span, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::info!(space = %req.space_id, start = span.start, end = span.end, "booking conflict");
            return Err(e);
        }

        let status = if guard.space.requires_approval {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let booking = Booking {
            id: Ulid::new(),
            space_id: req.space_id,
            user_id: req.user_id,
            title: req.title.trim().to_owned(),
            description: req.description,
            span,
            status,
            cost_cents: booking_cost(&guard.space, &span),
            attendees: req.attendees,
            equipment: req.equipment,
            approval: None,
            check_in_id: None,
            checked_in_at: None,
            actual_end: None,
            cancelled_at: None,
            notes: req.notes,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "status" => status.as_str())
            .increment(1);
        tracing::info!(booking = %booking.id, space = %booking.space_id, %status, "booking created");
        Ok(booking)
    }

    pub async fn update_booking(
        &self,
        actor: Actor,
        id: Ulid,
        patch: BookingPatch,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        validate_text("description", patch.description.as_deref())?;
        validate_text("notes", patch.notes.as_deref())?;
        if let Some(attendees) = &patch.attendees {
            validate_list("attendees", attendees)?;
        }
        if let Some(equipment) = &patch.equipment {
            validate_list("equipment", equipment)?;
        }

        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        if current.user_id != actor.user_id {
            return Err(EngineError::Forbidden("only the booking owner may update it"));
        }
        if !matches!(current.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidState {
                from: current.status,
                action: "update",
            });
        }

        let mut updated = current.clone();
        let rescheduled = patch.start.is_some() || patch.end.is_some();
        if rescheduled {
            let start = patch.start.unwrap_or(current.span.start);
            let end = patch.end.unwrap_or(current.span.end);
            let span = validate_interval(&self.policy, start, end, now)?;
            if !guard.space.active {
                return Err(EngineError::invalid("space is not active"));
            }
            check_no_conflict(&guard, &span, Some(id))?;
            updated.span = span;
            updated.cost_cents = booking_cost(&guard.space, &span);
        }
        if let Some(title) = patch.title {
            updated.title = title.trim().to_owned();
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(attendees) = patch.attendees {
            if attendees.len() > guard.space.capacity as usize {
                return Err(EngineError::invalid(format!(
                    "{} attendees exceed space capacity of {}",
                    attendees.len(),
                    guard.space.capacity
                )));
            }
            updated.attendees = attendees;
        }
        if let Some(equipment) = patch.equipment {
            updated.equipment = equipment;
        }
        if let Some(notes) = patch.notes {
            updated.notes = Some(notes);
        }
        updated.updated_at = now;

        let event = Event::BookingUpdated {
            booking: updated.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(booking = %id, rescheduled, "booking updated");
        Ok(updated)
    }

    /// Apply one lifecycle action under the space lock.
    async fn transition(
        &self,
        id: Ulid,
        action: BookingAction,
        actor: Ulid,
        note: Option<String>,
        now: Ms,
        authorize: impl FnOnce(&Booking) -> Result<(), EngineError>,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        authorize(booking)?;
        let to = booking.status.next(action)?;
        let space_id = booking.space_id;

        let event = Event::BookingTransitioned {
            id,
            space_id,
            action,
            to,
            at: now,
            actor,
            note,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str())
            .increment(1);
        tracing::info!(booking = %id, %to, "booking transitioned");
        guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))
    }

    pub async fn cancel_booking(
        &self,
        actor: Actor,
        id: Ulid,
        reason: Option<String>,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        validate_text("reason", reason.as_deref())?;
        self.transition(id, BookingAction::Cancel, actor.user_id, reason, now, |b| {
            if b.user_id == actor.user_id {
                Ok(())
            } else {
                Err(EngineError::Forbidden("only the booking owner may cancel it"))
            }
        })
        .await
    }

    pub async fn approve_booking(
        &self,
        actor: Actor,
        id: Ulid,
        decision: ApprovalDecision,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if !actor.role.can_approve() {
            return Err(EngineError::Forbidden("approval authority required"));
        }
        validate_text("reason", decision.reason.as_deref())?;
        let action = if decision.approve {
            BookingAction::Approve
        } else {
            BookingAction::Reject
        };
        self.transition(id, action, actor.user_id, decision.reason, now, |_| Ok(()))
            .await
    }

    pub async fn check_in(
        &self,
        actor: Actor,
        id: Ulid,
        method: CheckInMethod,
        now: Ms,
    ) -> Result<CheckIn, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        if !may_operate(&actor, booking) {
            return Err(EngineError::Forbidden("cannot check in another user's booking"));
        }
        booking.status.next(BookingAction::CheckIn)?;
        let grace = self.policy.check_in_grace_ms;
        if now < booking.span.start - grace || now > booking.span.start + grace {
            return Err(EngineError::invalid(format!(
                "check-in is only possible within {} minutes of the start time",
                grace / MINUTE_MS
            )));
        }

        let check_in = CheckIn {
            id: Ulid::new(),
            booking_id: id,
            space_id: booking.space_id,
            user_id: booking.user_id,
            actor_id: actor.user_id,
            method,
            checked_in_at: now,
            checked_out_at: None,
        };
        // Space lock, then occupancy key lock; no occupancy path takes a space lock.
        let mut record = self.occupancy.lock_key(check_in.space_id).await;
        let count = record.count.saturating_add(1);
        let event = Event::CheckInRecorded {
            check_in: check_in.clone(),
            occupancy: count,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        record.count = count;
        record.updated_at = now;
        drop(record);
        drop(guard);

        tracing::info!(booking = %id, check_in = %check_in.id, ?method, occupancy = count, "checked in");
        Ok(check_in)
    }

    /// Check in by scanning a `booking:<id>` payload.
    pub async fn check_in_by_qr(&self, actor: Actor, payload: &str, now: Ms) -> Result<CheckIn, EngineError> {
        let id = parse_booking_payload(payload)?;
        self.check_in(actor, id, CheckInMethod::Qr, now).await
    }

    pub async fn check_out(&self, actor: Actor, check_in_id: Ulid, now: Ms) -> Result<CheckIn, EngineError> {
        let (booking_id, space_id) = self
            .check_ins
            .get(&check_in_id)
            .map(|ci| (ci.booking_id, ci.space_id))
            .ok_or(EngineError::not_found("check-in", check_in_id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::not_found("space", space_id))?;
        let mut guard = ss.write().await;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::not_found("booking", booking_id))?;
        if !may_operate(&actor, booking) {
            return Err(EngineError::Forbidden("cannot check out another user's booking"));
        }
        booking.status.next(BookingAction::CheckOut)?;

        let mut record = self.occupancy.lock_key(space_id).await;
        if record.count == 0 {
            tracing::warn!(%space_id, "occupancy EXIT below zero clamped");
            metrics::counter!(crate::observability::OCCUPANCY_UNDERFLOW_TOTAL).increment(1);
        }
        let count = record.count.saturating_sub(1);
        let event = Event::CheckOutRecorded {
            id: check_in_id,
            booking_id,
            space_id,
            actor: actor.user_id,
            at: now,
            occupancy: count,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        record.count = count;
        record.updated_at = now;
        drop(record);
        drop(guard);

        tracing::info!(booking = %booking_id, check_in = %check_in_id, occupancy = count, "checked out");
        self.check_ins
            .get(&check_in_id)
            .map(|ci| ci.clone())
            .ok_or(EngineError::not_found("check-in", check_in_id))
    }

    /// CONFIRMED bookings whose end has passed without a check-in.
    pub fn collect_no_shows(&self, now: Ms) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.spaces.iter() {
            let ss = entry.value().clone();
            if let Ok(guard) = ss.try_read() {
                due.extend(
                    guard
                        .bookings
                        .iter()
                        .filter(|b| b.status == BookingStatus::Confirmed && b.span.end <= now)
                        .map(|b| b.id),
                );
            }
        }
        due
    }

    /// System transition run by the no-show sweeper.
    pub async fn mark_no_show(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        self.transition(id, BookingAction::MarkNoShow, Ulid::nil(), None, now, |b| {
            if b.span.end <= now {
                Ok(())
            } else {
                Err(EngineError::invalid("booking has not ended yet"))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_payload_parsing() {
        let id = Ulid::new();
        assert_eq!(parse_booking_payload(&format!("booking:{id}")).unwrap(), id);
        assert!(parse_booking_payload(&id.to_string()).is_err());
        assert!(parse_booking_payload("booking:not-a-ulid").is_err());
        assert!(parse_booking_payload("visitor:01ARZ3NDEKTSV4RRFFQ69G5FAV").is_err());
    }
}
