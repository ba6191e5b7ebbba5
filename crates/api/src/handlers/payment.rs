//! Handlers for the `/payment` resource.

use axum::extract::State;
use axum::Json;
use medintake_core::error::CoreError;
use medintake_core::payment::{
    supported_payment_methods, ConfirmPaymentRequest, ConfirmedPayment, CreatedIntent,
    PaymentIntentRequest, PaymentMethodInfo, PaymentMetrics,
};

use crate::error::{AppError, AppResult};
use crate::extract::ApiJson;
use crate::middleware::auth::AuthSession;
use crate::middleware::client::Client;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/payment/create-intent
///
/// Validate, risk-score and register a payment intent. Repeating a request
/// with the same idempotency key returns the original intent.
pub async fn create_intent(
    State(state): State<AppState>,
    auth: AuthSession,
    Client(client): Client,
    ApiJson(input): ApiJson<PaymentIntentRequest>,
) -> AppResult<Json<DataResponse<CreatedIntent>>> {
    // 1. The intent must be raised for the session's own user.
    if input.user_id != auth.session.user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "userId does not match the authenticated session".into(),
        )));
    }

    // 2. Validate, score and create (or replay).
    let created = state.payments.create_intent(input, &client)?;

    tracing::debug!(
        intent_id = %created.intent_id,
        replayed = created.replayed,
        fraud_score = created.fraud_score,
        "Payment intent ready"
    );

    Ok(Json(DataResponse { data: created }))
}

/// POST /api/payment/confirm
///
/// Charge a pending intent owned by the caller.
pub async fn confirm(
    State(state): State<AppState>,
    auth: AuthSession,
    Client(client): Client,
    ApiJson(input): ApiJson<ConfirmPaymentRequest>,
) -> AppResult<Json<DataResponse<ConfirmedPayment>>> {
    let confirmed = state
        .payments
        .confirm(input, &auth.session.user_id, &client)
        .await?;
    Ok(Json(DataResponse { data: confirmed }))
}

/// GET /api/payment/methods
pub async fn methods() -> Json<DataResponse<Vec<PaymentMethodInfo>>> {
    Json(DataResponse {
        data: supported_payment_methods(),
    })
}

/// GET /api/payment/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<DataResponse<PaymentMetrics>> {
    Json(DataResponse {
        data: state.payments.metrics(),
    })
}
