//! Application profile upkeep: create on first sign-in, backfill missing
//! contact fields on later ones, never overwrite data already there.

use crate::otp::error::OtpResult;
use crate::otp::identity::Channel;
use crate::store::{AtomicStore, Mutation, RecordKind, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_ROLE: &str = "customer";
pub const DEFAULT_STATUS: &str = "active";

/// Stored profile document, keyed by uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub status: String,
    pub is_merchant: bool,
    pub free_usage_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact fields a verified sign-in carries into the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileIdentity {
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

impl ProfileIdentity {
    #[must_use]
    pub fn from_target(channel: Channel, target: &str) -> Self {
        match channel {
            Channel::Sms => Self {
                phone_number: Some(target.to_string()),
                email: None,
            },
            Channel::Email => Self {
                phone_number: None,
                email: Some(target.to_string()),
            },
        }
    }
}

/// What [`ProfileSynchronizer::ensure`] did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileChange {
    Created,
    Updated,
    Unchanged,
}

/// Profile creation and backfill over an [`AtomicStore`].
#[derive(Debug, Clone)]
pub struct ProfileSynchronizer<S> {
    store: S,
}

impl<S: AtomicStore> ProfileSynchronizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create the profile on first sight; afterwards only fill contact
    /// fields that are still empty. A profile needing nothing is not
    /// rewritten, so repeated sign-ins stay idempotent.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    pub async fn ensure(&self, uid: &str, identity: &ProfileIdentity) -> OtpResult<ProfileChange> {
        let now = Utc::now();
        Ok(self
            .store
            .read_modify_write(RecordKind::Profiles, uid, |current| {
                ensure_transition(current, uid, identity, now)
            })
            .await?)
    }
}

fn ensure_transition(
    current: Option<&Value>,
    uid: &str,
    identity: &ProfileIdentity,
    now: DateTime<Utc>,
) -> Result<Mutation<ProfileChange>, StoreError> {
    let Some(doc) = current else {
        let profile = Profile {
            uid: uid.to_string(),
            phone_number: identity.phone_number.clone(),
            email: identity.email.clone(),
            role: DEFAULT_ROLE.to_string(),
            status: DEFAULT_STATUS.to_string(),
            is_merchant: false,
            free_usage_count: 0,
            created_at: now,
            updated_at: now,
        };
        return Ok(Mutation::Write {
            doc: serde_json::to_value(&profile)?,
            output: ProfileChange::Created,
        });
    };

    let mut profile: Profile = serde_json::from_value(doc.clone())?;
    let mut changed = false;

    if is_empty(&profile.phone_number) {
        if let Some(phone) = &identity.phone_number {
            profile.phone_number = Some(phone.clone());
            changed = true;
        }
    }
    if is_empty(&profile.email) {
        if let Some(email) = &identity.email {
            profile.email = Some(email.clone());
            changed = true;
        }
    }

    if !changed {
        return Ok(Mutation::Keep {
            output: ProfileChange::Unchanged,
        });
    }

    profile.updated_at = now;
    Ok(Mutation::Write {
        doc: serde_json::to_value(&profile)?,
        output: ProfileChange::Updated,
    })
}

/// Absent and blank both count as fillable.
fn is_empty(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |value| value.trim().is_empty())
}
