use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use ulid::Ulid;

use crate::auth::Caller;
use crate::engine::{now_ms, ApprovalDecision, BookingFilter, BookingPatch, EngineError, NewBooking};
use crate::model::*;

use super::views::*;
use super::{parse_instant, parse_optional_instant, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    pub space_id: Ulid,
    /// Defaults to the caller.
    pub user_id: Option<Ulid>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub attendees: Option<Vec<String>>,
    pub equipment: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingQuery {
    pub space_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "rejected")]
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub status: Verdict,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start_time: String,
    pub end_time: String,
    pub exclude_booking_id: Option<Ulid>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceBody {
    pub name: String,
    pub capacity: u32,
    pub hourly_rate_cents: Option<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub requires_approval: bool,
}

/// Members only ever see their own bookings.
fn filter_for(caller: &Caller, q: BookingQuery) -> Result<BookingFilter, ApiError> {
    let user_id = if caller.actor.role.is_operator() {
        q.user_id
    } else {
        Some(caller.actor.user_id)
    };
    Ok(BookingFilter {
        space_id: q.space_id,
        user_id,
        status: q.status,
        from: parse_optional_instant("from", q.from.as_deref())?,
        to: parse_optional_instant("to", q.to.as_deref())?,
        page: q.page.unwrap_or(0),
        limit: q.limit.unwrap_or(0),
    })
}

pub async fn create(caller: Caller, Json(body): Json<CreateBookingBody>) -> Result<impl IntoResponse, ApiError> {
    let req = NewBooking {
        space_id: body.space_id,
        user_id: body.user_id.unwrap_or(caller.actor.user_id),
        title: body.title,
        description: body.description,
        start: parse_instant("startTime", &body.start_time)?,
        end: parse_instant("endTime", &body.end_time)?,
        attendees: body.attendees,
        equipment: body.equipment,
        notes: body.notes,
    };
    let booking = caller.engine.create_booking(caller.actor, req, now_ms()).await?;
    Ok((StatusCode::CREATED, Json(BookingView::from(&booking))))
}

pub async fn list(caller: Caller, Query(q): Query<BookingQuery>) -> Result<impl IntoResponse, ApiError> {
    let filter = filter_for(&caller, q)?;
    let page = caller.engine.list_bookings(&filter).await;
    Ok(Json(PageView::from_page(page, |b| BookingView::from(b))))
}

pub async fn statistics(caller: Caller, Query(q): Query<BookingQuery>) -> Result<impl IntoResponse, ApiError> {
    let filter = filter_for(&caller, q)?;
    let stats = caller.engine.booking_statistics(&filter).await;
    Ok(Json(StatisticsView::from(&stats)))
}

pub async fn get_one(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let booking = caller.engine.get_booking(id).await?;
    if booking.user_id != caller.actor.user_id && !caller.actor.role.is_operator() {
        return Err(EngineError::Forbidden("cannot view another user's booking").into());
    }
    Ok(Json(BookingView::from(&booking)))
}

pub async fn update(
    caller: Caller,
    Path(id): Path<Ulid>,
    Json(body): Json<UpdateBookingBody>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = BookingPatch {
        title: body.title,
        description: body.description,
        start: parse_optional_instant("startTime", body.start_time.as_deref())?,
        end: parse_optional_instant("endTime", body.end_time.as_deref())?,
        attendees: body.attendees,
        equipment: body.equipment,
        notes: body.notes,
    };
    let booking = caller
        .engine
        .update_booking(caller.actor, id, patch, now_ms())
        .await?;
    Ok(Json(BookingView::from(&booking)))
}

pub async fn cancel(
    caller: Caller,
    Path(id): Path<Ulid>,
    Query(q): Query<CancelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = caller
        .engine
        .cancel_booking(caller.actor, id, q.reason, now_ms())
        .await?;
    Ok(Json(BookingView::from(&booking)))
}

pub async fn approve(
    caller: Caller,
    Path(id): Path<Ulid>,
    Json(body): Json<ApproveBody>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = ApprovalDecision {
        approve: matches!(body.status, Verdict::Approve),
        reason: body.reason,
    };
    let booking = caller
        .engine
        .approve_booking(caller.actor, id, decision, now_ms())
        .await?;
    Ok(Json(BookingView::from(&booking)))
}

pub async fn check_in(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let check_in = caller
        .engine
        .check_in(caller.actor, id, CheckInMethod::Manual, now_ms())
        .await?;
    Ok((StatusCode::CREATED, Json(CheckInView::from(&check_in))))
}

pub async fn check_in_qr(caller: Caller, Path(qr_code): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let check_in = caller
        .engine
        .check_in_by_qr(caller.actor, &qr_code, now_ms())
        .await?;
    Ok((StatusCode::CREATED, Json(CheckInView::from(&check_in))))
}

pub async fn get_check_in(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let check_in = caller.engine.get_check_in(id)?;
    if check_in.user_id != caller.actor.user_id && !caller.actor.role.is_operator() {
        return Err(EngineError::Forbidden("cannot view another user's check-in").into());
    }
    Ok(Json(CheckInView::from(&check_in)))
}

pub async fn check_out(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let check_in = caller.engine.check_out(caller.actor, id, now_ms()).await?;
    Ok(Json(CheckInView::from(&check_in)))
}

pub async fn availability(
    caller: Caller,
    Path(space_id): Path<Ulid>,
    Query(q): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let start = parse_instant("startTime", &q.start_time)?;
    let end = parse_instant("endTime", &q.end_time)?;
    let availability = caller
        .engine
        .check_availability(space_id, start, end, q.exclude_booking_id)
        .await?;
    Ok(Json(AvailabilityView::from(&availability)))
}

pub async fn list_spaces(caller: Caller) -> Result<impl IntoResponse, ApiError> {
    let spaces = caller.engine.list_spaces().await;
    Ok(Json(spaces.iter().map(SpaceView::from).collect::<Vec<_>>()))
}

pub async fn get_space(caller: Caller, Path(id): Path<Ulid>) -> Result<impl IntoResponse, ApiError> {
    let space = caller.engine.get_space_info(id).await?;
    Ok(Json(SpaceView::from(&space)))
}

pub async fn upsert_space(
    caller: Caller,
    Path(id): Path<Ulid>,
    Json(body): Json<SpaceBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !caller.actor.role.can_approve() {
        return Err(EngineError::Forbidden("space administration requires manager or admin").into());
    }
    let space = Space {
        id,
        name: body.name,
        capacity: body.capacity,
        hourly_rate_cents: body.hourly_rate_cents,
        active: body.active,
        requires_approval: body.requires_approval,
    };
    caller.engine.upsert_space(space.clone()).await?;
    tracing::info!(tenant = %caller.tenant, space = %id, "space upserted");
    Ok(Json(SpaceView::from(&space)))
}
