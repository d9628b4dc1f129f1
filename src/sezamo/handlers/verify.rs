use crate::otp::{Channel, OtpError, OtpService};
use crate::store::PgStore;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

/// Body for redeeming a one-time code.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Challenge id returned by `/code`.
    #[serde(default)]
    pub challenge_id: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub custom_token: String,
    pub uid: String,
    pub is_new_user: bool,
    pub channel: Channel,
}

#[utoipa::path(
    post,
    path = "/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Code accepted, sign-in token minted", body = VerifyResponse),
        (status = 400, description = "Missing fields or a wrong code"),
        (status = 404, description = "Unknown challenge id"),
        (status = 409, description = "Challenge already reached a terminal state"),
        (status = 410, description = "Challenge expired"),
        (status = 429, description = "Attempt budget exhausted, challenge locked"),
        (status = 500, description = "Storage, directory, or token failure")
    ),
    tag = "otp",
)]
/// Verify a one-time code and complete the sign-in.
#[instrument(skip(service, payload))]
pub async fn verify(
    Extension(service): Extension<Arc<OtpService<PgStore>>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, OtpError> {
    let outcome = service
        .verify_code(&payload.challenge_id, &payload.code)
        .await?;

    Ok(Json(VerifyResponse {
        custom_token: outcome.custom_token,
        uid: outcome.uid,
        is_new_user: outcome.is_new_user,
        channel: outcome.channel,
    }))
}
