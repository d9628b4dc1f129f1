use crate::otp::{Channel, IssueRequest, OtpError, OtpService};
use crate::store::PgStore;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

/// Body for requesting a one-time code.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequest {
    /// Explicit channel; inferred from the present fields when omitted.
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeResponse {
    pub challenge_id: String,
    pub channel: Channel,
    pub masked_target: String,
    pub expires_in_sec: u64,
    pub resend_after_sec: u64,
}

#[utoipa::path(
    post,
    path = "/code",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Code issued and handed to the delivery gateway", body = CodeResponse),
        (status = 400, description = "No valid phone number or email in the request"),
        (status = 429, description = "Target is rate limited, see Retry-After"),
        (status = 500, description = "Storage or delivery failure")
    ),
    tag = "otp",
)]
/// Issue a one-time sign-in code to a phone number or email address.
#[instrument(skip(service, payload))]
pub async fn code(
    Extension(service): Extension<Arc<OtpService<PgStore>>>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<CodeResponse>, OtpError> {
    let outcome = service
        .request_code(IssueRequest {
            channel: payload.channel,
            phone_number: payload.phone_number,
            email: payload.email,
        })
        .await?;

    Ok(Json(CodeResponse {
        challenge_id: outcome.challenge_id,
        channel: outcome.channel,
        masked_target: outcome.masked_target,
        expires_in_sec: outcome.expires_in_secs,
        resend_after_sec: outcome.resend_after_secs,
    }))
}
