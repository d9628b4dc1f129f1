use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result alias for the OTP flows.
pub type OtpResult<T> = std::result::Result<T, OtpError>;

/// Failure taxonomy for the issue and verify flows.
///
/// Every variant maps to exactly one HTTP status; the mapping lives in the
/// `IntoResponse` impl so handlers can return `OtpError` directly.
#[derive(Debug, Error)]
pub enum OtpError {
    /// Malformed input, unresolvable identity, or a wrong code.
    #[error("{0}")]
    InvalidArgument(String),

    /// Unknown challenge id.
    #[error("challenge not found")]
    NotFound,

    /// Challenge exists but is not in a state that allows the operation.
    #[error("{0}")]
    FailedPrecondition(String),

    /// Challenge expired before the code was verified.
    #[error("code expired, request a new one")]
    DeadlineExceeded,

    /// Rate limited or attempt-locked.
    #[error("{message}")]
    ResourceExhausted {
        message: String,
        /// Seconds until the caller may retry, when known (rate limiting).
        retry_after_secs: Option<u64>,
    },

    /// Delivery, directory, profile, or store failure.
    #[error("{0}")]
    Internal(String),
}

impl OtpError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Throttled by the sliding-window limiter.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::ResourceExhausted {
            message: format!("too many code requests, retry in {retry_after_secs} seconds"),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Challenge locked after too many wrong codes.
    #[must_use]
    pub fn attempts_exhausted() -> Self {
        Self::ResourceExhausted {
            message: "too many wrong attempts, challenge is locked".to_string(),
            retry_after_secs: None,
        }
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::FailedPrecondition(_) => StatusCode::CONFLICT,
            Self::DeadlineExceeded => StatusCode::GONE,
            Self::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` when the failure was caused by the caller's input.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::NotFound | Self::FailedPrecondition(_)
        )
    }

    /// Returns `true` for abuse-control rejections (throttle or lockout).
    #[must_use]
    pub const fn is_abuse_control(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::ResourceExhausted {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

// Infrastructure failures are never the caller's fault.
impl From<crate::store::StoreError> for OtpError {
    fn from(error: crate::store::StoreError) -> Self {
        Self::Internal(format!("storage failure: {error}"))
    }
}

impl From<crate::directory::DirectoryError> for OtpError {
    fn from(error: crate::directory::DirectoryError) -> Self {
        Self::Internal(format!("identity directory failure: {error}"))
    }
}

impl IntoResponse for OtpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs();

        let mut body = json!({ "error": self.to_string() });
        if let Some(secs) = retry_after {
            body["retryAfterSec"] = json!(secs);
        }

        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
