use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Availability check ────────────────────────────────────────────

/// Every slot-holding booking on the space that overlaps `query`, optionally ignoring one
/// booking (the one being edited). Pure; the caller decides what a hit means.
pub fn find_conflicts(ss: &SpaceState, query: &Span, exclude: Option<Ulid>) -> Vec<BookingSummary> {
    ss.overlapping(query)
        .filter(|b| b.status.holds_slot())
        .filter(|b| Some(b.id) != exclude)
        .map(BookingSummary::from)
        .collect()
}

impl Engine {
    /// Read-only availability check for `[start, end)`.
    pub async fn check_availability(
        &self,
        space_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let span = Span::try_new(start, end)
            .ok_or_else(|| EngineError::invalid("endTime must be after startTime"))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::not_found("space", space_id))?;
        let guard = ss.read().await;
        let conflicts = find_conflicts(&guard, &span, exclude);
        Ok(Availability {
            is_available: conflicts.is_empty(),
            conflicts,
        })
    }
}
