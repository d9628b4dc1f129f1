//! Identity directory boundary.
//!
//! The directory owns durable identities (uid, phone, email, verification
//! state) and mints the sign-in tokens returned to callers. The service only
//! ever needs four lookups/mutations plus token minting, so the surface is
//! two narrow traits with an HTTP implementation behind them.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use url::Url;

const DIRECTORY_TIMEOUT_SECONDS: u64 = 20;

/// Result of a directory search.
///
/// Absence is a value, not an error: only a genuine `NotFound` may trigger
/// identity creation, while transport and server failures surface as
/// [`DirectoryError`] and abort the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Principal),
    NotFound,
}

/// An identity as the directory reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Payload for creating a directory identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPrincipal {
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl NewPrincipal {
    #[must_use]
    pub fn with_phone(phone: &str) -> Self {
        Self {
            phone_number: Some(phone.to_string()),
            ..Self::default()
        }
    }

    /// Email identities created by a code verification are born verified,
    /// the caller just proved control of the mailbox.
    #[must_use]
    pub fn with_verified_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            email_verified: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid directory configuration: {0}")]
    Config(String),

    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("directory rejected the call: {status} {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected directory response: {0}")]
    Malformed(String),
}

/// Lookup and provisioning operations against the identity directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Lookup, DirectoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Lookup, DirectoryError>;

    async fn create(&self, principal: NewPrincipal) -> Result<Principal, DirectoryError>;

    /// Promote an existing identity's email to verified. Idempotent on the
    /// directory side.
    async fn mark_email_verified(&self, uid: &str) -> Result<(), DirectoryError>;
}

/// Mints the short-lived sign-in token handed back after verification.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, uid: &str) -> Result<String, DirectoryError>;
}

/// HTTP client for the identity directory.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpDirectory {
    /// Build the client with its bounded timeout baked in.
    ///
    /// # Errors
    /// `Config` when the base URL does not parse, `Request` when the HTTP
    /// client cannot be constructed.
    pub fn new(base_url: &str, api_key: Option<SecretString>) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| DirectoryError::Config(format!("invalid directory url: {error}")))?;

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(DIRECTORY_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{path}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key.expose_secret()),
            None => request,
        }
    }

    async fn lookup(&self, field: &str, value: &str) -> Result<Lookup, DirectoryError> {
        let request = self
            .client
            .get(self.endpoint("principals"))
            .query(&[(field, value)]);

        let response = self.authorize(request).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                Ok(Lookup::Found(parse_principal(&body)?))
            }
            StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
            _ => Err(rejection(response).await),
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    #[instrument(skip(self, phone))]
    async fn find_by_phone(&self, phone: &str) -> Result<Lookup, DirectoryError> {
        self.lookup("phone", phone).await
    }

    #[instrument(skip(self, email))]
    async fn find_by_email(&self, email: &str) -> Result<Lookup, DirectoryError> {
        self.lookup("email", email).await
    }

    #[instrument(skip(self, principal))]
    async fn create(&self, principal: NewPrincipal) -> Result<Principal, DirectoryError> {
        let mut payload = json!({ "emailVerified": principal.email_verified });
        if let Some(phone) = &principal.phone_number {
            payload["phoneNumber"] = json!(phone);
        }
        if let Some(email) = &principal.email {
            payload["email"] = json!(email);
        }

        let request = self.client.post(self.endpoint("principals")).json(&payload);
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: Value = response.json().await?;
        parse_principal(&body)
    }

    #[instrument(skip(self))]
    async fn mark_email_verified(&self, uid: &str) -> Result<(), DirectoryError> {
        let request = self
            .client
            .post(self.endpoint(&format!("principals/{uid}/email-verified")));
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        Ok(())
    }
}

#[async_trait]
impl TokenIssuer for HttpDirectory {
    #[instrument(skip(self))]
    async fn issue(&self, uid: &str) -> Result<String, DirectoryError> {
        let request = self
            .client
            .post(self.endpoint("tokens"))
            .json(&json!({ "uid": uid }));
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: Value = response.json().await?;

        body["token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| DirectoryError::Malformed("token response is missing token".to_string()))
    }
}

fn parse_principal(body: &Value) -> Result<Principal, DirectoryError> {
    let uid = body["uid"]
        .as_str()
        .ok_or_else(|| DirectoryError::Malformed("principal response is missing uid".to_string()))?
        .to_string();

    Ok(Principal {
        uid,
        phone_number: body["phoneNumber"].as_str().map(String::from),
        email: body["email"].as_str().map(String::from),
        email_verified: body["emailVerified"].as_bool().unwrap_or(false),
    })
}

async fn rejection(response: reqwest::Response) -> DirectoryError {
    let status = response.status().as_u16();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body["error"].as_str().map(String::from))
        .unwrap_or_else(|| "no error detail".to_string());

    DirectoryError::Rejected { status, message }
}
