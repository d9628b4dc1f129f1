//! Passwordless sign-in flows.
//!
//! [`OtpService`] drives the two public operations, issue and verify, over
//! the storage, delivery, and directory capabilities. Each submodule owns
//! one concern; the service only sequences them and decides what a caller
//! may learn about the outcome.

pub mod challenge;
pub mod code;
pub mod config;
pub mod error;
pub mod identity;
pub mod profile;
pub mod provision;
pub mod ratelimit;

pub use self::challenge::{
    Challenge, ChallengeStatus, ChallengeStore, NewChallenge, VerifiedChallenge,
};
pub use self::config::OtpConfig;
pub use self::error::{OtpError, OtpResult};
pub use self::identity::{Channel, IdentityResolver, ResolvedTarget};
pub use self::profile::{Profile, ProfileChange, ProfileIdentity, ProfileSynchronizer};
pub use self::provision::{IdentityProvisioner, Provisioned};
pub use self::ratelimit::{RateDecision, RateLimiter};

use crate::directory::{IdentityDirectory, TokenIssuer};
use crate::gateway::{Deliverer, OtpMessage};
use crate::store::AtomicStore;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use ulid::Ulid;

/// Outer clamp on one delivery call, over and above whatever timeout the
/// deliverer itself enforces.
const DELIVERY_TIMEOUT_SECONDS: u64 = 15;

/// Caller input to [`OtpService::request_code`].
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub channel: Option<Channel>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

/// Everything a caller may learn after a code was issued. The code itself
/// travels only through the delivery channel.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub challenge_id: String,
    pub channel: Channel,
    pub masked_target: String,
    pub expires_in_secs: u64,
    pub resend_after_secs: u64,
}

/// Result of a completed sign-in.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub custom_token: String,
    pub uid: String,
    pub is_new_user: bool,
    pub channel: Channel,
}

/// The sign-in service over a store `S` and the two external boundaries.
pub struct OtpService<S> {
    config: OtpConfig,
    resolver: IdentityResolver,
    challenges: ChallengeStore<S>,
    limiter: RateLimiter<S>,
    profiles: ProfileSynchronizer<S>,
    provisioner: IdentityProvisioner,
    deliverer: Arc<dyn Deliverer>,
    tokens: Arc<dyn TokenIssuer>,
}

impl<S: AtomicStore + Clone> OtpService<S> {
    pub fn new(
        store: S,
        deliverer: Arc<dyn Deliverer>,
        directory: Arc<dyn IdentityDirectory>,
        tokens: Arc<dyn TokenIssuer>,
        config: OtpConfig,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(config.default_calling_code.clone()),
            challenges: ChallengeStore::new(store.clone()),
            limiter: RateLimiter::new(store.clone(), config.clone()),
            profiles: ProfileSynchronizer::new(store),
            provisioner: IdentityProvisioner::new(directory),
            deliverer,
            tokens,
            config,
        }
    }
}

impl<S: AtomicStore> OtpService<S> {
    /// Issue a code: resolve the target, spend rate-limit quota, persist
    /// the challenge, then deliver. Delivery happens strictly after the
    /// challenge is durable and outside any storage critical section.
    ///
    /// # Errors
    /// `InvalidArgument` for an unresolvable target, `ResourceExhausted`
    /// when throttled, `Internal` when storage or delivery fail.
    #[instrument(skip_all)]
    pub async fn request_code(&self, request: IssueRequest) -> OtpResult<IssueOutcome> {
        let resolved = self.resolver.resolve(
            request.channel,
            request.phone_number.as_deref(),
            request.email.as_deref(),
        )?;

        let decision = self
            .limiter
            .check_and_consume(resolved.channel, &resolved.target)
            .await?;
        if !decision.allowed {
            info!(
                channel = %resolved.channel,
                target = %resolved.masked,
                retry_after = decision.retry_after_secs,
                "code request throttled"
            );
            return Err(OtpError::rate_limited(decision.retry_after_secs));
        }

        let challenge_id = Ulid::new().to_string();
        let code = code::generate(self.config.code_length);
        let (salt, code_hash) = code::hash(&challenge_id, &code);
        let expires_at = Utc::now()
            + Duration::seconds(i64::try_from(self.config.expiry_seconds).unwrap_or(i64::MAX));

        self.challenges
            .create(NewChallenge {
                id: challenge_id.clone(),
                channel: resolved.channel,
                target: resolved.target.clone(),
                code_hash,
                salt,
                expires_at,
                max_attempts: self.config.max_attempts,
            })
            .await?;

        let message = OtpMessage {
            channel: resolved.channel,
            target: resolved.target.clone(),
            code,
            expires_in_secs: self.config.expiry_seconds,
        };

        let failure = match timeout(
            std::time::Duration::from_secs(DELIVERY_TIMEOUT_SECONDS),
            self.deliverer.deliver(&message),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("delivery timed out".to_string()),
        };

        if let Some(cause) = failure {
            error!(
                channel = %resolved.channel,
                target = %resolved.masked,
                challenge_id = %challenge_id,
                cause = %cause,
                "code delivery failed"
            );
            if let Err(mark_error) = self.challenges.mark_send_failed(&challenge_id).await {
                warn!(
                    challenge_id = %challenge_id,
                    error = %mark_error,
                    "failed to retire undelivered challenge"
                );
            }
            return Err(OtpError::internal("failed to deliver code"));
        }

        info!(
            channel = %resolved.channel,
            target = %resolved.masked,
            challenge_id = %challenge_id,
            "issued sign-in code"
        );

        Ok(IssueOutcome {
            challenge_id,
            channel: resolved.channel,
            masked_target: resolved.masked,
            expires_in_secs: self.config.expiry_seconds,
            resend_after_secs: decision.retry_after_secs,
        })
    }

    /// Verify a code and finish the sign-in: transition the challenge,
    /// provision the directory identity, sync the profile, mint the token.
    ///
    /// A failure after the challenge transition leaves the challenge
    /// verified; the code is single-use and stays spent.
    ///
    /// # Errors
    /// The full taxonomy: `InvalidArgument`, `NotFound`,
    /// `FailedPrecondition`, `DeadlineExceeded`, `ResourceExhausted`, and
    /// `Internal` for boundary failures.
    #[instrument(skip_all)]
    pub async fn verify_code(&self, challenge_id: &str, code: &str) -> OtpResult<VerifyOutcome> {
        let challenge_id = challenge_id.trim();
        if challenge_id.is_empty() {
            return Err(OtpError::invalid("challengeId is required"));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(OtpError::invalid("code is required"));
        }

        let verified = self.challenges.verify(challenge_id, code).await?;

        if verified.target.is_empty() {
            return Err(OtpError::precondition("challenge carries no target"));
        }

        let provisioned = self
            .provisioner
            .get_or_create(verified.channel, &verified.target)
            .await?;

        let identity = ProfileIdentity::from_target(verified.channel, &verified.target);
        self.profiles.ensure(&provisioned.uid, &identity).await?;

        let custom_token = self.tokens.issue(&provisioned.uid).await?;

        info!(
            uid = %provisioned.uid,
            channel = %verified.channel,
            is_new_user = provisioned.is_new_user,
            "sign-in verified"
        );

        Ok(VerifyOutcome {
            custom_token,
            uid: provisioned.uid,
            is_new_user: provisioned.is_new_user,
            channel: verified.channel,
        })
    }
}
