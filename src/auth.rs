use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;
use ulid::Ulid;

use crate::api::AppState;
use crate::engine::Engine;
use crate::model::{Actor, UserRole};
use crate::tenant::TenantError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    #[error(transparent)]
    Tenant(#[from] TenantError),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::MissingHeader(_) | AuthError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
            AuthError::Tenant(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            AuthError::Tenant(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = match status {
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::SERVICE_UNAVAILABLE => "unavailable",
            _ => "bad_request",
        };
        let body = serde_json::json!({ "error": code, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// An authenticated caller, bound to its tenant's engine.
///
/// Every handler that touches tenant data takes a `Caller`, so a request can only ever
/// reach the engine named by its own `X-Tenant-Id`.
#[derive(Clone)]
pub struct Caller {
    pub tenant: String,
    pub actor: Actor,
    pub engine: Arc<Engine>,
}

fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, AuthError> {
    let value = parts
        .headers
        .get(name)
        .ok_or(AuthError::MissingHeader(name))?;
    let value = value
        .to_str()
        .map_err(|_| AuthError::InvalidHeader(name))?
        .trim();
    if value.is_empty() {
        return Err(AuthError::MissingHeader(name));
    }
    Ok(value)
}

/// Token equality that does not stop at the first differing byte.
fn token_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn authenticate(parts: &Parts, state: &AppState) -> Result<(String, Actor), AuthError> {
    let token = extract_bearer_token(parts).ok_or(AuthError::MissingToken)?;
    if !token_matches(token, &state.api_token) {
        return Err(AuthError::InvalidToken);
    }
    let tenant = header(parts, TENANT_HEADER)?.to_string();
    let user_id = Ulid::from_string(header(parts, USER_HEADER)?)
        .map_err(|_| AuthError::InvalidHeader(USER_HEADER))?;
    let role: UserRole = header(parts, ROLE_HEADER)?
        .parse()
        .map_err(|_| AuthError::InvalidHeader(ROLE_HEADER))?;
    Ok((tenant, Actor { user_id, role }))
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (tenant, actor) = authenticate(parts, state).inspect_err(|e| {
            warn!("auth failed: {e}");
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
        })?;
        let engine = state.tenants.get_or_create(&tenant)?;
        Ok(Caller {
            tenant,
            actor,
            engine,
        })
    }
}
