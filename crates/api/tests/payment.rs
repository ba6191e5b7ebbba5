//! Integration tests for payment intent creation and confirmation.

mod common;

use axum::http::StatusCode;
use common::{body_json, find_audit, get, post_authed, sign_in, zurich_intent};
use medintake_core::audit::{action_types, AuditResult};
use serde_json::json;

const IDEMPOTENCY_KEY: &str = "idem-key-0000000001";

// ---------------------------------------------------------------------------
// Test: a valid Zürich intent is created with a VAT split
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_intent_is_created() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;

    let response = post_authed(
        &app.router,
        "/api/payment/create-intent",
        &session,
        &zurich_intent(&session.user_id, IDEMPOTENCY_KEY),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = &json["data"];
    assert!(data["intentId"].as_str().unwrap().starts_with("pi_"));
    assert!(data["clientSecret"].as_str().unwrap().starts_with("pi_"));
    assert_eq!(data["replayed"], false);
    assert!(data.get("fraudScore").is_none());

    let breakdown = &data["amountBreakdown"];
    let net = breakdown["netCents"].as_u64().unwrap();
    let vat = breakdown["vatCents"].as_u64().unwrap();
    assert_eq!(net + vat, 35_000);
    assert_eq!(breakdown["currency"], "CHF");
}

// ---------------------------------------------------------------------------
// Test: payment responses carry the no-store and PCI headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payment_responses_are_not_cacheable() {
    let app = common::build_test_app();
    let response = get(&app.router, "/api/payment/methods").await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers["cache-control"].to_str().unwrap().contains("no-store"));
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "0");
    assert_eq!(headers["x-pci-compliant"], "1");

    let json = body_json(response).await;
    let ids: Vec<_> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["card", "postfinance", "twint"]);
}

// ---------------------------------------------------------------------------
// Test: idempotent replay and conflicting reuse of a key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idempotency_key_replays_or_conflicts() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let intent = zurich_intent(&session.user_id, IDEMPOTENCY_KEY);

    let first = body_json(
        post_authed(&app.router, "/api/payment/create-intent", &session, &intent).await,
    )
    .await;
    let second = body_json(
        post_authed(&app.router, "/api/payment/create-intent", &session, &intent).await,
    )
    .await;
    assert_eq!(first["data"]["intentId"], second["data"]["intentId"]);
    assert_eq!(second["data"]["replayed"], true);

    let mut changed = intent.clone();
    changed["amountCents"] = json!(36000);
    let response =
        post_authed(&app.router, "/api/payment/create-intent", &session, &changed).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "IDEMPOTENCY_CONFLICT");
}

// ---------------------------------------------------------------------------
// Test: fixture-like billing data is fraud blocked and nothing is stored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suspicious_intent_is_fraud_blocked() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let mut intent = zurich_intent(&session.user_id, IDEMPOTENCY_KEY);
    intent["billingAddress"]["street"] = json!("Test Street 999");
    intent["billingAddress"]["postalCode"] = json!("9999");
    intent["paymentMethods"] = json!(["card", "postfinance", "twint"]);

    let response =
        post_authed(&app.router, "/api/payment/create-intent", &session, &intent).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "FRAUD_BLOCKED");

    let metrics = body_json(get(&app.router, "/api/payment/metrics").await).await;
    assert_eq!(metrics["data"]["activeIntents"], 0);
    assert_eq!(metrics["data"]["blockedLastHour"], 1);

    let entry = find_audit(&app, action_types::PAYMENT_BLOCKED).unwrap();
    assert_eq!(entry.result, AuditResult::Blocked);
}

// ---------------------------------------------------------------------------
// Test: an intent must be raised for the session's own user
// ---------------------------------------------------------------------------

#[tokio::test]
async fn intent_for_another_user_is_forbidden() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;

    let response = post_authed(
        &app.router,
        "/api/payment/create-intent",
        &session,
        &zurich_intent("usr_someone_else", IDEMPOTENCY_KEY),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "FORBIDDEN");
}

// ---------------------------------------------------------------------------
// Test: schema violations name the offending fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_intent_lists_field_violations() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let mut intent = zurich_intent(&session.user_id, IDEMPOTENCY_KEY);
    intent["currency"] = json!("EUR");

    let response =
        post_authed(&app.router, "/api/payment/create-intent", &session, &intent).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    assert!(json["error"]["details"]["fields"].as_array().unwrap().len() >= 1);
}

// ---------------------------------------------------------------------------
// Test: card confirmation succeeds once with an invoice number
// ---------------------------------------------------------------------------

#[tokio::test]
async fn card_confirmation_succeeds() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let created = body_json(
        post_authed(
            &app.router,
            "/api/payment/create-intent",
            &session,
            &zurich_intent(&session.user_id, IDEMPOTENCY_KEY),
        )
        .await,
    )
    .await;
    let intent_id = created["data"]["intentId"].as_str().unwrap().to_string();

    let confirm = json!({
        "intentId": intent_id,
        "paymentMethod": "card",
        "cardDetails": {
            "number": "4111 1111 1111 1111",
            "expiryMonth": 12,
            "expiryYear": 2099,
            "cvc": "123",
        },
    });
    let response = post_authed(&app.router, "/api/payment/confirm", &session, &confirm).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-pci-compliant"], "1");
    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["success"], true);
    assert_eq!(data["status"], "succeeded");
    assert!(data["paymentId"].as_str().unwrap().starts_with("pay_"));
    assert!(data["invoiceNumber"].as_str().unwrap().starts_with("INV-2026-"));
    assert!(!json.to_string().contains("4111111111111111"));

    let response = post_authed(&app.router, "/api/payment/confirm", &session, &confirm).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: a bad card is rejected without echoing the card data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_card_is_rejected_without_echo() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let created = body_json(
        post_authed(
            &app.router,
            "/api/payment/create-intent",
            &session,
            &zurich_intent(&session.user_id, IDEMPOTENCY_KEY),
        )
        .await,
    )
    .await;

    let response = post_authed(
        &app.router,
        "/api/payment/confirm",
        &session,
        &json!({
            "intentId": created["data"]["intentId"],
            "paymentMethod": "card",
            "cardDetails": {
                "number": "4111111111111112",
                "expiryMonth": 12,
                "expiryYear": 2099,
                "cvc": "987",
            },
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INVALID_CARD");
    let text = json.to_string();
    assert!(!text.contains("4111111111111112"));
    assert!(!text.contains("987"));

    let audit = serde_json::to_string(&app.state.audit.recent(usize::MAX)).unwrap();
    assert!(!audit.contains("4111111111111112"));
}

// ---------------------------------------------------------------------------
// Test: confirming someone else's or an unknown intent is a 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_intent_is_not_found() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;

    let response = post_authed(
        &app.router,
        "/api/payment/confirm",
        &session,
        &json!({ "intentId": "pi_missing", "paymentMethod": "twint" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: an intent past its lifetime is expired
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_intent_returns_expired() {
    let app = common::build_test_app();
    let session = sign_in(&app, "anna@example.ch").await;
    let created = body_json(
        post_authed(
            &app.router,
            "/api/payment/create-intent",
            &session,
            &zurich_intent(&session.user_id, IDEMPOTENCY_KEY),
        )
        .await,
    )
    .await;
    app.clock.advance(chrono::Duration::minutes(16));

    let response = post_authed(
        &app.router,
        "/api/payment/confirm",
        &session,
        &json!({ "intentId": created["data"]["intentId"], "paymentMethod": "twint" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "EXPIRED");
}
