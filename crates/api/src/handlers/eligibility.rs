//! Handlers for the `/eligibility` resource.

use axum::extract::State;
use axum::Json;
use medintake_core::eligibility::referral::ReferralDocument;
use medintake_core::eligibility::{
    EligibilityMetrics, EligibilityRequest, EligibilityResult, ReferralRequest,
};
use medintake_core::reference::InsurerInfo;

use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::middleware::auth::AuthSession;
use crate::middleware::client::Client;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/eligibility/calculate
///
/// Score the caller's answers and return the care pathway.
pub async fn calculate(
    State(state): State<AppState>,
    auth: AuthSession,
    Client(client): Client,
    ApiJson(input): ApiJson<EligibilityRequest>,
) -> AppResult<Json<DataResponse<EligibilityResult>>> {
    let result = state
        .eligibility
        .calculate(&input, &auth.session.user_id, &client)?;
    Ok(Json(DataResponse { data: result }))
}

/// POST /api/eligibility/referral
///
/// Produce a GP referral document for the same answers plus contact data.
pub async fn referral(
    State(state): State<AppState>,
    auth: AuthSession,
    Client(client): Client,
    ApiJson(input): ApiJson<ReferralRequest>,
) -> AppResult<Json<DataResponse<ReferralDocument>>> {
    let document = state
        .eligibility
        .generate_referral(&input, &auth.session.user_id, &client)?;
    Ok(Json(DataResponse { data: document }))
}

/// GET /api/eligibility/insurance-providers
pub async fn insurance_providers(
    State(state): State<AppState>,
) -> Json<DataResponse<Vec<InsurerInfo>>> {
    Json(DataResponse {
        data: state.eligibility.insurance_providers().to_vec(),
    })
}

/// GET /api/eligibility/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<DataResponse<EligibilityMetrics>> {
    Json(DataResponse {
        data: state.eligibility.metrics(),
    })
}
