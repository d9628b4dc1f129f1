//! Challenge lifecycle: a single-use, expiring proof of possession.
//!
//! A challenge starts `pending` and ends in exactly one terminal state.
//! Every transition is decided by a pure function over the stored document
//! and one timestamp, applied inside a single atomic read-modify-write, so
//! racing verifiers cannot double-spend a code and the attempt counter
//! never undercounts.

use crate::otp::code;
use crate::otp::error::{OtpError, OtpResult};
use crate::otp::identity::Channel;
use crate::store::{AtomicStore, Mutation, RecordKind, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Expired,
    Locked,
    SendFailed,
}

impl ChallengeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Stored challenge document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub channel: Channel,
    pub target: String,
    pub code_hash: String,
    pub salt: String,
    pub status: ChallengeStatus,
    pub attempts: u32,
    /// Wrong-code budget frozen at creation; later config changes do not
    /// affect challenges already in flight.
    pub max_attempts: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Channel and target released by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedChallenge {
    pub channel: Channel,
    pub target: String,
}

/// Creation parameters; the id, code, and hash are produced by the caller.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub id: String,
    pub channel: Channel,
    pub target: String,
    pub code_hash: String,
    pub salt: String,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

/// Challenge persistence and transitions over an [`AtomicStore`].
#[derive(Debug, Clone)]
pub struct ChallengeStore<S> {
    store: S,
}

impl<S: AtomicStore> ChallengeStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Insert a fresh `pending` challenge with a zeroed attempt counter.
    ///
    /// # Errors
    /// `Internal` on storage failure or an id collision.
    pub async fn create(&self, new: NewChallenge) -> OtpResult<Challenge> {
        let now = Utc::now();
        let challenge = Challenge {
            id: new.id,
            channel: new.channel,
            target: new.target,
            code_hash: new.code_hash,
            salt: new.salt,
            status: ChallengeStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
            verified_at: None,
        };

        self.store
            .read_modify_write(RecordKind::Challenges, &challenge.id, |current| {
                if current.is_some() {
                    return Ok(Mutation::Keep {
                        output: Err(OtpError::internal("challenge id already exists")),
                    });
                }
                Ok(Mutation::Write {
                    doc: serde_json::to_value(&challenge)?,
                    output: Ok(()),
                })
            })
            .await??;

        Ok(challenge)
    }

    /// Apply one verification attempt and return the released target on
    /// success.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `FailedPrecondition` when the
    /// challenge already reached a terminal state, `DeadlineExceeded` past
    /// expiry, `ResourceExhausted` when the attempt budget is gone, and
    /// `InvalidArgument` for a wrong code.
    pub async fn verify(&self, id: &str, supplied_code: &str) -> OtpResult<VerifiedChallenge> {
        let now = Utc::now();
        self.store
            .read_modify_write(RecordKind::Challenges, id, |current| {
                verify_transition(current, id, supplied_code, now)
            })
            .await?
    }

    /// Retire a challenge whose code never went out. Best effort: missing
    /// documents and challenges already out of `pending` are left alone.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    pub async fn mark_send_failed(&self, id: &str) -> OtpResult<()> {
        let now = Utc::now();
        self.store
            .read_modify_write(RecordKind::Challenges, id, |current| {
                let Some(doc) = current else {
                    return Ok(Mutation::Keep { output: () });
                };
                let mut challenge: Challenge = serde_json::from_value(doc.clone())?;
                if challenge.status != ChallengeStatus::Pending {
                    return Ok(Mutation::Keep { output: () });
                }
                challenge.status = ChallengeStatus::SendFailed;
                challenge.updated_at = now;
                Ok(Mutation::Write {
                    doc: serde_json::to_value(&challenge)?,
                    output: (),
                })
            })
            .await?;
        Ok(())
    }
}

/// Decide one verification attempt against the stored document.
///
/// Precedence when several conditions hold at once: missing, then terminal
/// state, then expiry, then attempt exhaustion, then the code comparison.
/// The comparison runs only after every cheaper gate has passed.
fn verify_transition(
    current: Option<&Value>,
    id: &str,
    supplied_code: &str,
    now: DateTime<Utc>,
) -> Result<Mutation<OtpResult<VerifiedChallenge>>, StoreError> {
    let Some(doc) = current else {
        return Ok(Mutation::Keep {
            output: Err(OtpError::NotFound),
        });
    };

    let mut challenge: Challenge = serde_json::from_value(doc.clone())?;

    if challenge.status != ChallengeStatus::Pending {
        return Ok(Mutation::Keep {
            output: Err(OtpError::precondition("challenge is not pending")),
        });
    }

    if challenge.expires_at <= now {
        challenge.status = ChallengeStatus::Expired;
        challenge.updated_at = now;
        return Ok(Mutation::Write {
            doc: serde_json::to_value(&challenge)?,
            output: Err(OtpError::DeadlineExceeded),
        });
    }

    if challenge.attempts >= challenge.max_attempts {
        challenge.status = ChallengeStatus::Locked;
        challenge.updated_at = now;
        return Ok(Mutation::Write {
            doc: serde_json::to_value(&challenge)?,
            output: Err(OtpError::attempts_exhausted()),
        });
    }

    let matched = code::verify(id, supplied_code, &challenge.salt, &challenge.code_hash);
    challenge.attempts += 1;
    challenge.updated_at = now;

    if matched {
        challenge.status = ChallengeStatus::Verified;
        challenge.verified_at = Some(now);
        let verified = VerifiedChallenge {
            channel: challenge.channel,
            target: challenge.target.clone(),
        };
        return Ok(Mutation::Write {
            doc: serde_json::to_value(&challenge)?,
            output: Ok(verified),
        });
    }

    // The wrong attempt that spends the last of the budget must lock in the
    // same write, a retry between two requests may never see a pending
    // challenge with zero budget left.
    let output = if challenge.attempts >= challenge.max_attempts {
        challenge.status = ChallengeStatus::Locked;
        Err(OtpError::attempts_exhausted())
    } else {
        Err(OtpError::invalid("invalid code"))
    };

    Ok(Mutation::Write {
        doc: serde_json::to_value(&challenge)?,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    const ID: &str = "01JC0000000000000000000001";
    const CODE: &str = "042617";

    fn challenges(store: &MemoryStore) -> ChallengeStore<MemoryStore> {
        ChallengeStore::new(store.clone())
    }

    fn new_challenge(ttl_seconds: i64, max_attempts: u32) -> NewChallenge {
        let (salt, code_hash) = code::hash(ID, CODE);
        NewChallenge {
            id: ID.to_string(),
            channel: Channel::Sms,
            target: "+22790123456".to_string(),
            code_hash,
            salt,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            max_attempts,
        }
    }

    fn seed_challenge(
        store: &MemoryStore,
        attempts: u32,
        max_attempts: u32,
        ttl_seconds: i64,
        status: ChallengeStatus,
    ) {
        let (salt, code_hash) = code::hash(ID, CODE);
        let now = Utc::now();
        let challenge = Challenge {
            id: ID.to_string(),
            channel: Channel::Sms,
            target: "+22790123456".to_string(),
            code_hash,
            salt,
            status,
            attempts,
            max_attempts,
            expires_at: now + Duration::seconds(ttl_seconds),
            created_at: now,
            updated_at: now,
            verified_at: None,
        };
        store.seed(
            RecordKind::Challenges,
            ID,
            serde_json::to_value(&challenge).expect("challenge doc"),
        );
    }

    fn stored_status(store: &MemoryStore) -> String {
        store.get(RecordKind::Challenges, ID).expect("challenge doc")["status"]
            .as_str()
            .expect("status string")
            .to_string()
    }

    #[tokio::test]
    async fn create_persists_a_pending_challenge() {
        let store = MemoryStore::new();
        challenges(&store)
            .create(new_challenge(300, 5))
            .await
            .expect("create");

        let doc = store.get(RecordKind::Challenges, ID).expect("challenge doc");
        assert_eq!(doc["status"], "pending");
        assert_eq!(doc["attempts"], 0);
        assert_eq!(doc["maxAttempts"], 5);
        assert_eq!(doc["channel"], "sms");
        assert!(doc["codeHash"].is_string());
        assert!(doc["salt"].is_string());
        assert!(doc["expiresAt"].is_string());
        assert!(doc.get("verifiedAt").is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        let manager = challenges(&store);
        manager.create(new_challenge(300, 5)).await.expect("create");

        let result = manager.create(new_challenge(300, 5)).await;
        assert!(matches!(result, Err(OtpError::Internal(_))));
    }

    #[tokio::test]
    async fn correct_code_verifies_exactly_once() {
        let store = MemoryStore::new();
        let manager = challenges(&store);
        manager.create(new_challenge(300, 5)).await.expect("create");

        let verified = manager.verify(ID, CODE).await.expect("verify");
        assert_eq!(verified.channel, Channel::Sms);
        assert_eq!(verified.target, "+22790123456");

        let doc = store.get(RecordKind::Challenges, ID).expect("challenge doc");
        assert_eq!(doc["status"], "verified");
        assert_eq!(doc["attempts"], 1);
        assert!(doc["verifiedAt"].is_string());

        // The code is spent; replaying it hits the terminal-state gate.
        let replay = manager.verify(ID, CODE).await;
        assert!(matches!(replay, Err(OtpError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_found() {
        let store = MemoryStore::new();
        let result = challenges(&store).verify("01JCMISSING", "123456").await;
        assert!(matches!(result, Err(OtpError::NotFound)));
        assert!(store.get(RecordKind::Challenges, "01JCMISSING").is_none());
    }

    #[tokio::test]
    async fn wrong_code_spends_one_attempt() {
        let store = MemoryStore::new();
        let manager = challenges(&store);
        manager.create(new_challenge(300, 5)).await.expect("create");

        let result = manager.verify(ID, "000000").await;
        assert!(matches!(result, Err(OtpError::InvalidArgument(_))));

        let doc = store.get(RecordKind::Challenges, ID).expect("challenge doc");
        assert_eq!(doc["status"], "pending");
        assert_eq!(doc["attempts"], 1);
    }

    #[tokio::test]
    async fn final_wrong_attempt_locks_in_the_same_write() {
        let store = MemoryStore::new();
        let manager = challenges(&store);
        manager.create(new_challenge(300, 2)).await.expect("create");

        let first = manager.verify(ID, "000000").await;
        assert!(matches!(first, Err(OtpError::InvalidArgument(_))));

        let second = manager.verify(ID, "000000").await;
        assert!(matches!(second, Err(OtpError::ResourceExhausted { .. })));
        assert_eq!(stored_status(&store), "locked");

        // Even the right code cannot unlock.
        let after_lock = manager.verify(ID, CODE).await;
        assert!(matches!(after_lock, Err(OtpError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn expired_challenge_is_marked_and_reported_gone() {
        let store = MemoryStore::new();
        seed_challenge(&store, 0, 5, -5, ChallengeStatus::Pending);

        let result = challenges(&store).verify(ID, CODE).await;
        assert!(matches!(result, Err(OtpError::DeadlineExceeded)));
        assert_eq!(stored_status(&store), "expired");
    }

    #[tokio::test]
    async fn expiry_wins_over_attempt_exhaustion() {
        let store = MemoryStore::new();
        seed_challenge(&store, 5, 5, -5, ChallengeStatus::Pending);

        let result = challenges(&store).verify(ID, CODE).await;
        assert!(matches!(result, Err(OtpError::DeadlineExceeded)));
        assert_eq!(stored_status(&store), "expired");
    }

    #[tokio::test]
    async fn exhausted_budget_locks_without_testing_the_code() {
        let store = MemoryStore::new();
        seed_challenge(&store, 5, 5, 300, ChallengeStatus::Pending);

        let result = challenges(&store).verify(ID, CODE).await;
        assert!(matches!(result, Err(OtpError::ResourceExhausted { .. })));
        assert_eq!(stored_status(&store), "locked");
    }

    #[tokio::test]
    async fn mark_send_failed_retires_a_pending_challenge() {
        let store = MemoryStore::new();
        let manager = challenges(&store);
        manager.create(new_challenge(300, 5)).await.expect("create");

        manager.mark_send_failed(ID).await.expect("mark");
        assert_eq!(stored_status(&store), "send_failed");

        let result = manager.verify(ID, CODE).await;
        assert!(matches!(result, Err(OtpError::FailedPrecondition(_))));
    }

    #[tokio::test]
    async fn mark_send_failed_ignores_terminal_and_missing_challenges() {
        let store = MemoryStore::new();
        let manager = challenges(&store);

        manager.mark_send_failed("01JCMISSING").await.expect("noop");

        seed_challenge(&store, 1, 5, 300, ChallengeStatus::Verified);
        manager.mark_send_failed(ID).await.expect("noop");
        assert_eq!(stored_status(&store), "verified");
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_a_plain_mismatch() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let challenge = Challenge {
            id: ID.to_string(),
            channel: Channel::Email,
            target: "ada@example.com".to_string(),
            code_hash: "!!not-base64!!".to_string(),
            salt: "AAAA".to_string(),
            status: ChallengeStatus::Pending,
            attempts: 0,
            max_attempts: 5,
            expires_at: now + Duration::seconds(300),
            created_at: now,
            updated_at: now,
            verified_at: None,
        };
        store.seed(
            RecordKind::Challenges,
            ID,
            serde_json::to_value(&challenge).expect("challenge doc"),
        );

        let result = challenges(&store).verify(ID, CODE).await;
        assert!(matches!(result, Err(OtpError::InvalidArgument(_))));

        let doc = store.get(RecordKind::Challenges, ID).expect("challenge doc");
        assert_eq!(doc["attempts"], 1);
    }
}
