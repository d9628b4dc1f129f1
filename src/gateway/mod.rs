//! Message gateway boundary: hands a generated code to the SMS/email
//! delivery provider. Delivery always happens after the challenge is
//! persisted, so the trait has a single fire-and-report operation.

use crate::otp::Channel;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use url::Url;

const GATEWAY_TIMEOUT_SECONDS: u64 = 15;

/// One code delivery. The code is the only secret in the system that ever
/// leaves it, so `Debug` redacts it.
#[derive(Clone)]
pub struct OtpMessage {
    pub channel: Channel,
    pub target: String,
    pub code: String,
    pub expires_in_secs: u64,
}

impl fmt::Debug for OtpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpMessage")
            .field("channel", &self.channel)
            .field("target", &self.target)
            .field("code", &"[REDACTED]")
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid gateway configuration: {0}")]
    Config(String),

    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway rejected the message: {status} {message}")]
    Rejected { status: u16, message: String },
}

/// Sends one-time codes to their target.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError>;
}

/// HTTP client for the message gateway.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpGateway {
    /// # Errors
    /// `Config` when the base URL does not parse, `Request` when the HTTP
    /// client cannot be constructed.
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Result<Self, DeliveryError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| DeliveryError::Config(format!("invalid gateway url: {error}")))?;

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl Deliverer for HttpGateway {
    #[instrument(skip(self, message), fields(channel = %message.channel))]
    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError> {
        let payload = json!({
            "channel": message.channel,
            "to": message.target,
            "code": message.code,
            "expiresInSec": message.expires_in_secs,
        });

        let mut request = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key.expose_secret());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body["error"].as_str().map(String::from))
                .unwrap_or_else(|| "no error detail".to_string());
            return Err(DeliveryError::Rejected { status, message });
        }

        Ok(())
    }
}
