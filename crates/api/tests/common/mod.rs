#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use medintake_core::audit::AuditEntry;
use medintake_core::clock::ManualClock;
use medintake_core::otp::delivery::RecordingDelivery;
use medintake_core::payment::processor::SimulatedProcessor;
use medintake_core::reference::ReferenceData;
use serde_json::{json, Value};
use tower::ServiceExt;

use medintake_api::config::{ServerConfig, DEFAULT_PROTECTED_PREFIXES};
use medintake_api::router::build_app_router;
use medintake_api::state::{AppState, Collaborators};

/// Origin the test config allows.
pub const ALLOWED_ORIGIN: &str = "http://localhost:8080";

/// Build a test `ServerConfig` with safe defaults.
///
/// Code hashing runs at the cheapest Argon2 cost and proxy headers are
/// trusted so tests can vary the client IP with `X-Forwarded-For`.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec![
            ALLOWED_ORIGIN.to_string(),
            "https://*.skiin.ch".to_string(),
        ],
        request_timeout_secs: 30,
        max_body_bytes: 64 * 1024,
        session_secret: "test-session-secret-0123456789abcdef".to_string(),
        trust_proxy_headers: true,
        protected_prefixes: DEFAULT_PROTECTED_PREFIXES
            .split(',')
            .map(str::to_string)
            .collect(),
        session_bind_ip: true,
        otp_hash_memory_kib: 8,
        otp_hash_iterations: 1,
        otp_max_attempts: 5,
        fraud_block_threshold: 75,
        payment_max_attempts: 3,
        eligibility_referral_threshold: 60,
        audit_capacity: 1_000,
        sweep_interval_secs: 60,
    }
}

/// The production router wired to in-memory collaborators and a manual
/// clock.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub delivery: Arc<RecordingDelivery>,
}

/// Build the full application router with all middleware layers.
///
/// This goes through `build_app_router`, the same function `main.rs` uses,
/// so integration tests exercise the production middleware stack.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    // Mid-June 2026, 09:00 UTC.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap(),
    ));
    let delivery = Arc::new(RecordingDelivery::new());

    let collaborators = Collaborators {
        delivery: delivery.clone(),
        processor: Arc::new(SimulatedProcessor),
        reference: Arc::new(ReferenceData::swiss_defaults()),
    };
    let state = AppState::build(config.clone(), clock.clone(), collaborators).unwrap();
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        clock,
        delivery,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send one request through a clone of the router. State is shared between
/// clones.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

/// POST a JSON body the way the browser client does (custom
/// `X-Requested-With` header, no session).
pub async fn post_json(app: &Router, uri: &str, body: &Value) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-requested-with", "XMLHttpRequest")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

/// POST a JSON body with the session token and its CSRF token.
pub async fn post_authed(
    app: &Router,
    uri: &str,
    session: &SignedIn,
    body: &Value,
) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", session.token))
        .header("x-csrf-token", &session.csrf)
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

/// Credentials returned by a successful code verification.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub token: String,
    pub csrf: String,
    pub user_id: String,
    /// Raw `Set-Cookie` value from the verify response.
    pub cookie: String,
}

/// Run the issue/verify round trip for `email` and return the session.
pub async fn sign_in(app: &TestApp, email: &str) -> SignedIn {
    let issue = post_json(
        &app.router,
        "/api/otp/generate",
        &json!({
            "contactMethod": "email",
            "contactValue": email,
            "purpose": "contact_verification",
        }),
    )
    .await;
    assert_eq!(issue.status(), 200, "code issuance failed");

    let code = app
        .delivery
        .last_code_for(&email.trim().to_lowercase())
        .expect("a code was delivered");

    let verify = post_json(
        &app.router,
        "/api/otp/verify",
        &json!({
            "contactMethod": "email",
            "contactValue": email,
            "code": code,
            "purpose": "contact_verification",
        }),
    )
    .await;
    assert_eq!(verify.status(), 200, "code verification failed");

    let cookie = verify
        .headers()
        .get("set-cookie")
        .expect("session cookie is set")
        .to_str()
        .unwrap()
        .to_string();
    let json = body_json(verify).await;
    let data = &json["data"];

    SignedIn {
        token: data["sessionToken"].as_str().unwrap().to_string(),
        csrf: data["csrfToken"].as_str().unwrap().to_string(),
        user_id: data["userId"].as_str().unwrap().to_string(),
        cookie,
    }
}

/// Newest audit entry recorded under `action`.
pub fn find_audit(app: &TestApp, action: &str) -> Option<AuditEntry> {
    app.state
        .audit
        .recent(usize::MAX)
        .into_iter()
        .find(|e| e.action == action)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A payment intent for CHF 350 billed to a Zürich address.
pub fn zurich_intent(user_id: &str, idempotency_key: &str) -> Value {
    json!({
        "amountCents": 35000,
        "currency": "CHF",
        "paymentMethods": ["card", "twint"],
        "billingAddress": {
            "firstName": "Anna",
            "lastName": "Meier",
            "street": "Bahnhofstrasse 1",
            "postalCode": "8001",
            "city": "Zürich",
            "canton": "ZH",
            "country": "CH",
        },
        "userId": user_id,
        "formSessionId": "form_1",
        "idempotencyKey": idempotency_key,
    })
}

/// Age 34 on the test clock's date, Zürich, HMO model, cardiac symptoms.
pub fn hmo_eligibility_request() -> Value {
    json!({
        "sessionId": "form_1",
        "personalInfo": {
            "dateOfBirth": "1992-03-10",
            "canton": "ZH",
            "insuranceProvider": "css",
            "insuranceModel": "hmo",
        },
        "medicalInfo": {
            "hasCardiacSymptoms": true,
        },
        "consentGiven": true,
        "dataProcessingConsent": true,
    })
}
