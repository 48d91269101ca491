use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use ulid::Ulid;

use spacegate::api::{self, AppState};
use spacegate::config::Policy;
use spacegate::tenant::TenantManager;

const TOKEN: &str = "test-token";

// ── Test infrastructure ──────────────────────────────────────

fn test_app() -> Router {
    let dir = std::env::temp_dir().join(format!("spacegate_http_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        1000,
        Policy::default(),
        Duration::from_secs(3600),
    ));
    api::router(AppState::new(tm, TOKEN, 64))
}

#[derive(Clone, Copy)]
struct Who {
    tenant: &'static str,
    user: Ulid,
    role: &'static str,
}

impl Who {
    fn new(tenant: &'static str, role: &'static str) -> Self {
        Self {
            tenant,
            user: Ulid::new(),
            role,
        }
    }
}

async fn call(app: &Router, method: Method, uri: &str, who: Who, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("x-tenant-id", who.tenant)
        .header("x-user-id", who.user.to_string())
        .header("x-user-role", who.role);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Tomorrow at `hour`:00 UTC, RFC 3339.
fn tomorrow_at(hour: u32) -> String {
    let day = (Utc::now() + chrono::Duration::days(1)).date_naive();
    let at: DateTime<Utc> = day.and_hms_opt(hour, 0, 0).unwrap().and_utc();
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn create_space(app: &Router, admin: Who) -> String {
    let id = Ulid::new().to_string();
    let (status, body) = call(
        app,
        Method::PUT,
        &format!("/spaces/{id}"),
        admin,
        Some(json!({ "name": "Meeting Room A", "capacity": 8, "hourlyRateCents": 2500 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    id
}

// ── Auth ─────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_needs_no_credentials() {
    let app = test_app();
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tenants"], 0);
}

#[tokio::test]
async fn missing_or_wrong_token_is_unauthorized() {
    let app = test_app();

    let req = Request::builder().uri("/spaces").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let req = Request::builder()
        .uri("/spaces")
        .header("authorization", "Bearer nope")
        .header("x-tenant-id", "acme")
        .header("x-user-id", Ulid::new().to_string())
        .header("x-user-role", "admin")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_identity_headers_are_rejected() {
    let app = test_app();

    let req = Request::builder()
        .uri("/spaces")
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("x-user-id", Ulid::new().to_string())
        .header("x-user-role", "member")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("x-tenant-id"));

    let req = Request::builder()
        .uri("/spaces")
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("x-tenant-id", "acme")
        .header("x-user-id", "not-a-ulid")
        .header("x-user-role", "member")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Bookings ─────────────────────────────────────────────────

#[tokio::test]
async fn booking_conflict_and_cancel() {
    let app = test_app();
    let admin = Who::new("acme", "admin");
    let alice = Who::new("acme", "member");
    let bob = Who::new("acme", "member");
    let space = create_space(&app, admin).await;

    let (status, first) = call(
        &app,
        Method::POST,
        "/bookings",
        alice,
        Some(json!({
            "spaceId": space,
            "title": "Planning",
            "startTime": tomorrow_at(10),
            "endTime": tomorrow_at(11),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["status"], "CONFIRMED");
    assert_eq!(first["costCents"], 2500);
    assert_eq!(first["userId"], alice.user.to_string());

    let (status, clash) = call(
        &app,
        Method::POST,
        "/bookings",
        bob,
        Some(json!({
            "spaceId": space,
            "title": "Overlap",
            "startTime": tomorrow_at(10),
            "endTime": tomorrow_at(12),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(clash["error"], "conflict");
    assert_eq!(clash["conflicts"][0]["id"], first["id"]);

    let availability = format!(
        "/spaces/{space}/availability?startTime={}&endTime={}",
        tomorrow_at(10),
        tomorrow_at(11)
    );
    let (status, body) = call(&app, Method::GET, &availability, bob, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isAvailable"], false);

    let id = first["id"].as_str().unwrap();
    let (status, _) = call(&app, Method::DELETE, &format!("/bookings/{id}"), bob, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, cancelled) = call(
        &app,
        Method::DELETE,
        &format!("/bookings/{id}?reason=moved"),
        alice,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");

    let (_, body) = call(&app, Method::GET, &availability, bob, None).await;
    assert_eq!(body["isAvailable"], true);

    // Members only see their own bookings.
    let (_, listed) = call(&app, Method::GET, "/bookings", bob, None).await;
    assert_eq!(listed["total"], 0);
    let (_, listed) = call(&app, Method::GET, "/bookings", admin, None).await;
    assert_eq!(listed["total"], 1);
}

#[tokio::test]
async fn bad_timestamps_are_validation_errors() {
    let app = test_app();
    let admin = Who::new("acme", "admin");
    let space = create_space(&app, admin).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/bookings",
        admin,
        Some(json!({
            "spaceId": space,
            "title": "Planning",
            "startTime": "tomorrow morning",
            "endTime": tomorrow_at(11),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = call(
        &app,
        Method::POST,
        "/bookings",
        admin,
        Some(json!({
            "spaceId": space,
            "title": "Too short",
            "startTime": tomorrow_at(10),
            "endTime": tomorrow_at(10),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn members_cannot_administer_spaces() {
    let app = test_app();
    let member = Who::new("acme", "member");
    let (status, body) = call(
        &app,
        Method::PUT,
        &format!("/spaces/{}", Ulid::new()),
        member,
        Some(json!({ "name": "Mine", "capacity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn tenants_are_isolated() {
    let app = test_app();
    let acme_admin = Who::new("acme", "admin");
    let globex_admin = Who::new("globex", "admin");
    let space = create_space(&app, acme_admin).await;

    let (status, _) = call(&app, Method::GET, &format!("/spaces/{space}"), acme_admin, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::GET, &format!("/spaces/{space}"), globex_admin, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (_, spaces) = call(&app, Method::GET, "/spaces", globex_admin, None).await;
    assert_eq!(spaces.as_array().unwrap().len(), 0);
}

// ── Access control ───────────────────────────────────────────

#[tokio::test]
async fn issue_and_scan_single_use_pass() {
    let app = test_app();
    let desk = Who::new("acme", "staff");

    let (status, qr) = call(
        &app,
        Method::POST,
        "/access-control/qr-codes",
        desk,
        Some(json!({
            "type": "VISITOR",
            "visitorId": Ulid::new().to_string(),
            "validFor": 2,
            "permissions": ["all_zones"],
            "maxScans": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{qr}");
    assert_eq!(qr["type"], "VISITOR");
    let payload = qr["qrCodeData"].as_str().unwrap().to_owned();

    let scan = json!({ "qrCodeData": payload, "location": "front door" });
    let (status, first) = call(&app, Method::POST, "/access-control/qr-codes/scan", desk, Some(scan.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["granted"], true);
    let (_, second) = call(&app, Method::POST, "/access-control/qr-codes/scan", desk, Some(scan)).await;
    assert_eq!(second["granted"], false);
    assert_eq!(second["reason"], "scan limit reached");

    let id = qr["id"].as_str().unwrap();
    let (status, scans) = call(&app, Method::GET, &format!("/access-control/qr-codes/{id}/scans"), desk, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scans.as_array().unwrap().len(), 2);

    let (status, revoked) = call(&app, Method::DELETE, &format!("/access-control/qr-codes/{id}"), desk, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked["revoked"], true);
}

#[tokio::test]
async fn credential_validity_is_bounded() {
    let app = test_app();
    let desk = Who::new("acme", "staff");
    let (status, body) = call(
        &app,
        Method::POST,
        "/access-control/qr-codes",
        desk,
        Some(json!({
            "type": "TEMPORARY",
            "visitorId": Ulid::new().to_string(),
            "validFor": 169,
            "permissions": ["all_zones"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn occupancy_updates_clamp_at_zero() {
    let app = test_app();
    let admin = Who::new("acme", "admin");
    let desk = Who::new("acme", "staff");
    let member = Who::new("acme", "member");

    let (status, zone) = call(
        &app,
        Method::POST,
        "/access-control/zones",
        admin,
        Some(json!({ "name": "Lobby", "zoneType": "entrance", "maxCapacity": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{zone}");
    let zone_id = zone["id"].as_str().unwrap().to_owned();

    let update = |action: &str| json!({ "zoneId": zone_id, "action": action });
    let (status, body) = call(&app, Method::POST, "/access-control/occupancy/update", desk, Some(update("ENTRY"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentCount"], 1);
    for _ in 0..2 {
        let (_, body) = call(&app, Method::POST, "/access-control/occupancy/update", desk, Some(update("EXIT"))).await;
        assert_eq!(body["currentCount"], 0);
    }

    let (status, _) = call(&app, Method::POST, "/access-control/occupancy/update", member, Some(update("ENTRY"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let both = json!({ "zoneId": zone_id, "spaceId": zone_id, "action": "ENTRY" });
    let (status, _) = call(&app, Method::POST, "/access-control/occupancy/update", desk, Some(both)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, all) = call(&app, Method::GET, "/access-control/occupancy", member, None).await;
    assert_eq!(all[0]["id"], zone_id.as_str());
    assert_eq!(all[0]["currentCount"], 0);
}

#[tokio::test]
async fn entry_through_a_rule() {
    let app = test_app();
    let admin = Who::new("acme", "admin");
    let desk = Who::new("acme", "staff");

    let (_, zone) = call(
        &app,
        Method::POST,
        "/access-control/zones",
        admin,
        Some(json!({ "name": "Studio", "zoneType": "restricted", "maxCapacity": 1 })),
    )
    .await;
    let zone_id = zone["id"].as_str().unwrap().to_owned();
    let (status, rule) = call(
        &app,
        Method::POST,
        "/access-control/rules",
        admin,
        Some(json!({ "zoneId": zone_id, "name": "Members", "priority": 10, "userRoles": ["member"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{rule}");

    let (_, qr) = call(
        &app,
        Method::POST,
        "/access-control/qr-codes",
        desk,
        Some(json!({
            "type": "MEMBER",
            "userId": Ulid::new().to_string(),
            "validFor": 24,
            "permissions": [{ "zone": zone_id }],
        })),
    )
    .await;
    let entry = json!({ "zoneId": zone_id, "qrCodeData": qr["qrCodeData"], "role": "member" });

    let (status, granted) = call(&app, Method::POST, "/access-control/entry", desk, Some(entry.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(granted["granted"], true);
    assert_eq!(granted["matchedRuleId"], rule["id"]);
    assert_eq!(granted["currentOccupancy"], 1);

    let (_, full) = call(&app, Method::POST, "/access-control/entry", desk, Some(entry)).await;
    assert_eq!(full["granted"], false);
    assert_eq!(full["reason"], "zone at capacity");
    let violation_id = full["violationId"].as_str().unwrap().to_owned();

    let (status, open) = call(&app, Method::GET, "/access-control/violations?resolved=false", desk, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open["total"], 1);
    let (status, resolved) = call(
        &app,
        Method::PUT,
        &format!("/access-control/violations/{violation_id}/resolve"),
        desk,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["resolved"], true);
}

#[tokio::test]
async fn members_cannot_vouch_for_themselves_at_the_door() {
    let app = test_app();
    let admin = Who::new("acme", "admin");
    let desk = Who::new("acme", "staff");
    let member = Who::new("acme", "member");

    let (_, zone) = call(
        &app,
        Method::POST,
        "/access-control/zones",
        admin,
        Some(json!({ "name": "Server room", "zoneType": "restricted", "maxCapacity": 1 })),
    )
    .await;
    let zone_id = zone["id"].as_str().unwrap().to_owned();
    let (status, _) = call(
        &app,
        Method::POST,
        "/access-control/rules",
        admin,
        Some(json!({ "zoneId": zone_id, "name": "Admins", "priority": 10, "userRoles": ["admin"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // A member may issue their own pass, but not assert their role at the door.
    let (status, qr) = call(
        &app,
        Method::POST,
        "/access-control/qr-codes",
        member,
        Some(json!({ "type": "MEMBER", "validFor": 24, "permissions": [{ "zone": zone_id }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{qr}");
    let claim = json!({ "zoneId": zone_id, "qrCodeData": qr["qrCodeData"], "role": "admin" });
    let (status, _) = call(&app, Method::POST, "/access-control/entry", member, Some(claim)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Fill the zone, then a member tries to pin a capacity violation on someone else.
    let (status, _) = call(
        &app,
        Method::POST,
        "/access-control/occupancy/update",
        desk,
        Some(json!({ "zoneId": zone_id, "action": "ENTRY" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let frame = json!({ "zoneId": zone_id, "userId": Ulid::new().to_string(), "role": "admin" });
    let (status, _) = call(&app, Method::POST, "/access-control/evaluate", member, Some(frame)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, violations) = call(&app, Method::GET, "/access-control/violations", desk, None).await;
    assert_eq!(violations["total"], 0);
    let (_, occupancy) = call(&app, Method::GET, "/access-control/occupancy", desk, None).await;
    assert_eq!(occupancy[0]["currentCount"], 1);
}

#[tokio::test]
async fn tenant_ids_are_not_rewritten() {
    let app = test_app();
    let (status, body) = call(&app, Method::GET, "/bookings", Who::new("acme!", "member"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    let (status, _) = call(&app, Method::GET, "/bookings", Who::new("acme", "member"), None).await;
    assert_eq!(status, StatusCode::OK);
}
