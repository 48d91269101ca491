//! HTTP surface. Handlers translate JSON requests into engine operations on the
//! caller's tenant and render results with RFC 3339 timestamps.

mod access;
mod bookings;
pub mod views;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::engine::EngineError;
use crate::model::Ms;
use crate::observability::*;
use crate::tenant::TenantManager;

use views::ConflictView;

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub api_token: Arc<str>,
    pub limiter: Arc<Semaphore>,
}

impl AppState {
    pub fn new(tenants: Arc<TenantManager>, api_token: &str, max_concurrent_requests: usize) -> Self {
        Self {
            tenants,
            api_token: Arc::from(api_token),
            limiter: Arc::new(Semaphore::new(max_concurrent_requests)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Bookings
        .route("/bookings", post(bookings::create).get(bookings::list))
        .route("/bookings/statistics", get(bookings::statistics))
        .route(
            "/bookings/{id}",
            get(bookings::get_one)
                .put(bookings::update)
                .delete(bookings::cancel),
        )
        .route("/bookings/{id}/approve", post(bookings::approve))
        .route("/bookings/{id}/checkin", post(bookings::check_in))
        .route("/bookings/checkin/qr/{qr_code}", post(bookings::check_in_qr))
        .route("/checkins/{id}", get(bookings::get_check_in))
        .route("/checkins/{id}/checkout", post(bookings::check_out))
        // Spaces
        .route("/spaces", get(bookings::list_spaces))
        .route("/spaces/{id}", put(bookings::upsert_space).get(bookings::get_space))
        .route("/spaces/{id}/availability", get(bookings::availability))
        // Credentials
        .route("/access-control/qr-codes", post(access::issue))
        .route("/access-control/qr-codes/scan", post(access::scan))
        .route(
            "/access-control/qr-codes/{id}",
            get(access::get_credential).delete(access::revoke),
        )
        .route("/access-control/qr-codes/{id}/revoke", post(access::revoke))
        .route("/access-control/qr-codes/{id}/scans", get(access::scans))
        // Physical access
        .route("/access-control/entry", post(access::entry))
        .route("/access-control/evaluate", post(access::evaluate))
        .route("/access-control/occupancy", get(access::occupancy))
        .route("/access-control/occupancy/update", post(access::update_occupancy))
        .route("/access-control/zones", post(access::create_zone).get(access::list_zones))
        .route("/access-control/zones/{id}", get(access::get_zone))
        .route("/access-control/rules", post(access::add_rule).get(access::list_rules))
        .route("/access-control/rules/{id}", delete(access::remove_rule))
        .route("/access-control/violations", get(access::violations))
        .route(
            "/access-control/violations/{id}/resolve",
            put(access::resolve_violation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), track))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "tenants": state.tenants.tenant_count() }))
}

/// Concurrency cap plus per-route request metrics.
async fn track(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        warn!("concurrency limit reached, rejecting {}", req.uri().path());
        metrics::counter!(HTTP_REQUESTS_REJECTED_TOTAL).increment(1);
        return ApiError::Overloaded.into_response();
    };

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status).increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    #[error("server is at its concurrency limit")]
    Overloaded,
}

impl ApiError {
    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_)
        | EngineError::InvalidState { .. }
        | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Conflict { .. } | EngineError::CapacityExceeded(_) => StatusCode::CONFLICT,
        EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => e.into_response(),
            ApiError::BadRequest(message) => {
                let body = serde_json::json!({ "error": "validation_error", "message": message });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ApiError::Overloaded => {
                let body = serde_json::json!({ "error": "overloaded", "message": self.to_string() });
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            ApiError::Engine(e) => {
                let status = engine_status(&e);
                let message = if let EngineError::WalError(detail) = &e {
                    error!("write failed: {detail}");
                    "internal error".to_owned()
                } else {
                    e.to_string()
                };
                let mut body = serde_json::json!({ "error": e.code(), "message": message });
                if let EngineError::Conflict { conflicts } = &e {
                    let conflicts: Vec<ConflictView> = conflicts.iter().map(ConflictView::from).collect();
                    body["conflicts"] = serde_json::json!(conflicts);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

// ── Time ─────────────────────────────────────────────────────────

pub(crate) fn rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_instant(field: &str, value: &str) -> Result<Ms, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ApiError::bad_request(format!("{field} must be an RFC 3339 timestamp")))
}

pub(crate) fn parse_optional_instant(field: &str, value: Option<&str>) -> Result<Option<Ms>, ApiError> {
    value.map(|v| parse_instant(field, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn rfc3339_round_trip() {
        let ms = 1_704_103_200_000; // 2024-01-01T10:00:00Z
        assert_eq!(rfc3339(ms), "2024-01-01T10:00:00.000Z");
        assert_eq!(parse_instant("startTime", "2024-01-01T10:00:00Z").unwrap(), ms);
        assert_eq!(parse_instant("startTime", "2024-01-01T11:00:00+01:00").unwrap(), ms);
    }

    #[test]
    fn rejects_non_rfc3339() {
        let err = parse_instant("endTime", "tomorrow").unwrap_err();
        assert!(err.to_string().contains("endTime"));
        assert_eq!(parse_optional_instant("from", None).unwrap(), None);
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        assert_eq!(engine_status(&EngineError::invalid("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            engine_status(&EngineError::Conflict { conflicts: vec![] }),
            StatusCode::CONFLICT
        );
        assert_eq!(engine_status(&EngineError::CapacityExceeded(3)), StatusCode::CONFLICT);
        assert_eq!(engine_status(&EngineError::Forbidden("no")), StatusCode::FORBIDDEN);
        assert_eq!(
            engine_status(&EngineError::not_found("booking", Ulid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            engine_status(&EngineError::WalError("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
