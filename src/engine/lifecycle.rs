use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Booking state machine ─────────────────────────────────────────
//
//   PENDING ──approve──▶ CONFIRMED ──check_in──▶ CHECKED_IN ──check_out──▶ COMPLETED
//      │                    │
//      ├──reject/cancel─────┴──cancel──▶ CANCELLED
//                           └──mark_no_show──▶ NO_SHOW

impl BookingAction {
    pub fn verb(self) -> &'static str {
        match self {
            BookingAction::Approve => "approve",
            BookingAction::Reject => "reject",
            BookingAction::CheckIn => "check in",
            BookingAction::CheckOut => "check out",
            BookingAction::Cancel => "cancel",
            BookingAction::MarkNoShow => "mark as no-show",
        }
    }
}

impl BookingStatus {
    /// The single authority on legal moves.
    pub fn next(self, action: BookingAction) -> Result<BookingStatus, EngineError> {
        use BookingAction as A;
        use BookingStatus as S;
        match (self, action) {
            (S::Pending, A::Approve) => Ok(S::Confirmed),
            (S::Pending, A::Reject) => Ok(S::Cancelled),
            (S::Pending | S::Confirmed, A::Cancel) => Ok(S::Cancelled),
            (S::Confirmed, A::CheckIn) => Ok(S::CheckedIn),
            (S::CheckedIn, A::CheckOut) => Ok(S::Completed),
            (S::Confirmed, A::MarkNoShow) => Ok(S::NoShow),
            (from, action) => Err(EngineError::InvalidState {
                from,
                action: action.verb(),
            }),
        }
    }
}

impl Booking {
    /// Apply an already-validated transition and its side fields.
    pub(crate) fn record_transition(
        &mut self,
        action: BookingAction,
        to: BookingStatus,
        at: Ms,
        actor: Ulid,
        note: Option<&str>,
    ) {
        match action {
            BookingAction::Approve | BookingAction::Reject => {
                self.approval = Some(Approval {
                    decided_by: actor,
                    decided_at: at,
                    approved: action == BookingAction::Approve,
                    reason: note.map(str::to_owned),
                });
                if action == BookingAction::Reject {
                    self.cancelled_at = Some(at);
                }
            }
            BookingAction::Cancel => {
                self.cancelled_at = Some(at);
                if let Some(reason) = note {
                    self.append_note(&format!("Cancelled: {reason}"));
                }
            }
            BookingAction::CheckIn => self.checked_in_at = Some(at),
            BookingAction::CheckOut => self.actual_end = Some(at),
            BookingAction::MarkNoShow => {}
        }
        self.status = to;
        self.updated_at = at;
    }

    fn append_note(&mut self, line: &str) {
        match &mut self.notes {
            Some(notes) if !notes.is_empty() => {
                notes.push('\n');
                notes.push_str(line);
            }
            _ => self.notes = Some(line.to_owned()),
        }
    }
}
