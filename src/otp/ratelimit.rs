//! Per-target sliding-window throttle with lockout.
//!
//! One record per (channel, target). The window check, the counter spend,
//! and the lockout decision happen in a single atomic read-modify-write, so
//! concurrent issue requests can never overspend the quota.

use crate::otp::config::OtpConfig;
use crate::otp::error::OtpResult;
use crate::otp::identity::Channel;
use crate::store::{AtomicStore, Mutation, RecordKind, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored throttle record. All fields are optional on disk so records
/// written by older deployments keep parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitRecord {
    pub window_started_at: Option<DateTime<Utc>>,
    pub sent_in_window: u32,
    /// Left in place after it lapses; a stale value in the past has no
    /// effect and the next send starts a fresh window.
    pub blocked_until: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Outcome of one quota spend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// On denial: seconds until the caller may retry. On success: the
    /// client-side resend hint.
    pub retry_after_secs: u64,
}

/// Storage key for a throttle record: channel plus the lowercased
/// alphanumeric form of the target, so `+227 90 12 34 56` and
/// `+22790123456` share one budget.
#[must_use]
pub fn rate_key(channel: Channel, target: &str) -> String {
    let sanitized: String = target
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    format!("{}_{sanitized}", channel.as_str())
}

/// Sliding-window limiter over an [`AtomicStore`].
#[derive(Debug, Clone)]
pub struct RateLimiter<S> {
    store: S,
    config: OtpConfig,
}

impl<S: AtomicStore> RateLimiter<S> {
    pub fn new(store: S, config: OtpConfig) -> Self {
        Self { store, config }
    }

    /// Spend one send from the target's window, or report how long the
    /// caller has to wait.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    pub async fn check_and_consume(&self, channel: Channel, target: &str) -> OtpResult<RateDecision> {
        let key = rate_key(channel, target);
        let now = Utc::now();
        Ok(self
            .store
            .read_modify_write(RecordKind::RateLimits, &key, |current| {
                consume_transition(current, now, &self.config)
            })
            .await?)
    }
}

/// Decide one spend against the stored record.
///
/// Order matters: an active lockout wins, then the window is rolled over if
/// it lapsed, then the incremented counter is measured against the quota.
fn consume_transition(
    current: Option<&Value>,
    now: DateTime<Utc>,
    config: &OtpConfig,
) -> Result<Mutation<RateDecision>, StoreError> {
    let mut record: RateLimitRecord = match current {
        Some(doc) => serde_json::from_value(doc.clone())?,
        None => RateLimitRecord::default(),
    };

    if let Some(blocked_until) = record.blocked_until {
        if blocked_until > now {
            return Ok(Mutation::Keep {
                output: RateDecision {
                    allowed: false,
                    retry_after_secs: remaining_seconds(blocked_until, now),
                },
            });
        }
    }

    let window_expired = record
        .window_started_at
        .map_or(true, |started| now - started > seconds(config.rate_window_seconds));

    let spent = if window_expired { 0 } else { record.sent_in_window };
    let next = spent + 1;

    if next > config.max_per_window {
        record.blocked_until = Some(now + seconds(config.lock_minutes * 60));
        return Ok(Mutation::Write {
            doc: serde_json::to_value(&record)?,
            output: RateDecision {
                allowed: false,
                retry_after_secs: config.lock_minutes * 60,
            },
        });
    }

    if window_expired {
        record.window_started_at = Some(now);
    }
    record.sent_in_window = next;
    record.last_sent_at = Some(now);

    Ok(Mutation::Write {
        doc: serde_json::to_value(&record)?,
        output: RateDecision {
            allowed: true,
            retry_after_secs: config.resend_seconds,
        },
    })
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Seconds until `blocked_until`, rounded up so the caller never retries a
/// moment too early.
fn remaining_seconds(blocked_until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (blocked_until - now).num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0)
}
