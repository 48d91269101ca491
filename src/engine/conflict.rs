use crate::config::Policy;
use crate::limits::*;
use crate::model::*;

use super::availability::find_conflicts;
use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Interval shape and policy bounds for a new or rescheduled booking.
pub(crate) fn validate_interval(policy: &Policy, start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end)
        .ok_or_else(|| EngineError::invalid("endTime must be after startTime"))?;
    let duration = span.duration_ms();
    if duration < policy.min_booking_ms {
        return Err(EngineError::invalid(format!(
            "booking must last at least {} minutes",
            policy.min_booking_ms / MINUTE_MS
        )));
    }
    if duration > policy.max_booking_ms {
        return Err(EngineError::invalid(format!(
            "booking may last at most {} hours",
            policy.max_booking_ms / HOUR_MS
        )));
    }
    if span.start < now {
        return Err(EngineError::invalid("startTime cannot be in the past"));
    }
    Ok(span)
}

pub(crate) fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::invalid("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(EngineError::invalid(format!(
            "title may be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &str, text: Option<&str>) -> Result<(), EngineError> {
    if text.is_some_and(|t| t.len() > MAX_TEXT_LEN) {
        return Err(EngineError::invalid(format!("{field} is too long")));
    }
    Ok(())
}

pub(crate) fn validate_list(field: &str, items: &[String]) -> Result<(), EngineError> {
    if items.len() > MAX_LIST_ITEMS {
        return Err(EngineError::invalid(format!("too many {field}")));
    }
    if items.iter().any(|i| i.trim().is_empty() || i.len() > MAX_NAME_LEN) {
        return Err(EngineError::invalid(format!("{field} entries must be 1..={MAX_NAME_LEN} characters")));
    }
    Ok(())
}

/// Space-level checks that don't depend on other bookings.
pub(crate) fn check_space_accepts(space: &Space, attendees: usize) -> Result<(), EngineError> {
    if !space.active {
        return Err(EngineError::invalid("space is not active"));
    }
    if attendees > space.capacity as usize {
        return Err(EngineError::invalid(format!(
            "{attendees} attendees exceed space capacity of {}",
            space.capacity
        )));
    }
    Ok(())
}

/// Fail with the full conflict list if anything holds the slot. Caller holds the write lock.
pub(crate) fn check_no_conflict(
    ss: &SpaceState,
    span: &Span,
    exclude: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(ss, span, exclude);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict { conflicts })
    }
}

/// `rate × hours`, in whole cents.
pub(crate) fn booking_cost(space: &Space, span: &Span) -> Option<i64> {
    space
        .hourly_rate_cents
        .map(|rate| ((rate as i128 * span.duration_ms() as i128) / HOUR_MS as i128) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Ms = 1_700_000_000_000;

    #[test]
    fn duration_bounds() {
        let p = Policy::default();
        let start = NOW + HOUR_MS;
        assert!(validate_interval(&p, start, start + 29 * MINUTE_MS, NOW).is_err());
        assert!(validate_interval(&p, start, start + 30 * MINUTE_MS, NOW).is_ok());
        assert!(validate_interval(&p, start, start + 8 * HOUR_MS, NOW).is_ok());
        assert!(validate_interval(&p, start, start + 8 * HOUR_MS + MINUTE_MS, NOW).is_err());
    }

    #[test]
    fn empty_and_inverted_intervals_rejected() {
        let p = Policy::default();
        let start = NOW + HOUR_MS;
        let err = validate_interval(&p, start, start, NOW).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(validate_interval(&p, start, start - HOUR_MS, NOW).is_err());
    }

    #[test]
    fn past_start_rejected() {
        let p = Policy::default();
        let err = validate_interval(&p, NOW - MINUTE_MS, NOW + HOUR_MS, NOW).unwrap_err();
        assert!(err.to_string().contains("past"));
    }

    #[test]
    fn title_rules() {
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
        assert!(validate_title("Board meeting").is_ok());
    }

    #[test]
    fn cost_is_rate_times_hours() {
        let space = Space {
            id: ulid::Ulid::new(),
            name: "Studio".into(),
            capacity: 2,
            hourly_rate_cents: Some(2_500),
            active: true,
            requires_approval: false,
        };
        assert_eq!(booking_cost(&space, &Span::new(0, 90 * MINUTE_MS)), Some(3_750));
        let free = Space { hourly_rate_cents: None, ..space };
        assert_eq!(booking_cost(&free, &Span::new(0, HOUR_MS)), None);
    }

    #[test]
    fn inactive_or_overfull_space_refused() {
        let mut space = Space {
            id: ulid::Ulid::new(),
            name: "Desk 4".into(),
            capacity: 1,
            hourly_rate_cents: None,
            active: true,
            requires_approval: false,
        };
        assert!(check_space_accepts(&space, 1).is_ok());
        assert!(check_space_accepts(&space, 2).is_err());
        space.active = false;
        assert!(check_space_accepts(&space, 0).is_err());
    }
}
