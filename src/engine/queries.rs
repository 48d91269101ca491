use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::violations::paginate;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub space_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Bookings ending after this instant.
    pub from: Option<Ms>,
    /// Bookings starting before this instant.
    pub to: Option<Ms>,
    pub page: usize,
    pub limit: usize,
}

impl BookingFilter {
    fn admits(&self, b: &Booking) -> bool {
        self.user_id.is_none_or(|u| b.user_id == u)
            && self.status.is_none_or(|s| b.status == s)
            && self.from.is_none_or(|from| b.span.end > from)
            && self.to.is_none_or(|to| b.span.start < to)
    }
}

/// Statuses whose cost counts as revenue.
fn earns_revenue(status: BookingStatus) -> bool {
    matches!(
        status,
        BookingStatus::Confirmed | BookingStatus::CheckedIn | BookingStatus::Completed
    )
}

impl Engine {
    /// Matching bookings as `(space name, booking)` pairs, ordered by start time.
    async fn collect_bookings(&self, filter: &BookingFilter) -> Vec<(String, Booking)> {
        let spaces: Vec<_> = match filter.space_id {
            Some(id) => self.get_space(&id).into_iter().collect(),
            None => self.spaces.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for ss in spaces {
            let guard = ss.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| filter.admits(b))
                    .map(|b| (guard.space.name.clone(), b.clone())),
            );
        }
        out.sort_by(|(_, a), (_, b)| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Page<Booking> {
        let items = self
            .collect_bookings(filter)
            .await
            .into_iter()
            .map(|(_, b)| b)
            .collect();
        paginate(items, filter.page, filter.limit)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let space_id = self
            .space_for_booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        let ss = self
            .get_space(&space_id)
            .ok_or(EngineError::not_found("space", space_id))?;
        let guard = ss.read().await;
        guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::not_found("booking", id))
    }

    /// Aggregates over every booking matching the filter (paging ignored).
    pub async fn booking_statistics(&self, filter: &BookingFilter) -> BookingStatistics {
        let bookings = self.collect_bookings(filter).await;

        let mut by_status: Vec<(BookingStatus, usize)> =
            BookingStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut per_space: HashMap<Ulid, SpaceUsage> = HashMap::new();
        let mut revenue = 0i64;
        let mut total_duration = 0i64;

        for (space_name, b) in &bookings {
            if let Some(slot) = by_status.iter_mut().find(|(s, _)| *s == b.status) {
                slot.1 += 1;
            }
            if earns_revenue(b.status) {
                revenue += b.cost_cents.unwrap_or(0);
            }
            total_duration += b.span.duration_ms();
            per_space
                .entry(b.space_id)
                .or_insert_with(|| SpaceUsage {
                    space_id: b.space_id,
                    name: space_name.clone(),
                    bookings: 0,
                })
                .bookings += 1;
        }

        let mut top_spaces: Vec<_> = per_space.into_values().collect();
        top_spaces.sort_by(|a, b| b.bookings.cmp(&a.bookings).then(a.name.cmp(&b.name)));
        top_spaces.truncate(TOP_SPACES);

        let average_duration_minutes = if bookings.is_empty() {
            0.0
        } else {
            total_duration as f64 / bookings.len() as f64 / MINUTE_MS as f64
        };

        BookingStatistics {
            total: bookings.len(),
            by_status,
            total_revenue_cents: revenue,
            average_duration_minutes,
            top_spaces,
        }
    }

    pub fn get_check_in(&self, id: Ulid) -> Result<CheckIn, EngineError> {
        self.check_ins
            .get(&id)
            .map(|ci| ci.clone())
            .ok_or(EngineError::not_found("check-in", id))
    }

    pub async fn list_spaces(&self) -> Vec<Space> {
        let spaces: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(spaces.len());
        for ss in spaces {
            out.push(ss.read().await.space.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}
