//! First-sign-in provisioning: map a verified target to a directory uid,
//! creating the identity when the directory has never seen it.

use crate::directory::{IdentityDirectory, Lookup, NewPrincipal};
use crate::otp::error::OtpResult;
use crate::otp::identity::Channel;
use std::sync::Arc;
use tracing::{debug, info};

/// Directory identity behind a verified challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub uid: String,
    pub is_new_user: bool,
}

/// Get-or-create over the [`IdentityDirectory`].
///
/// Only a clean `NotFound` triggers creation; any directory failure aborts
/// the sign-in rather than risking a duplicate identity.
#[derive(Clone)]
pub struct IdentityProvisioner {
    directory: Arc<dyn IdentityDirectory>,
}

impl IdentityProvisioner {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// # Errors
    /// `Internal` when the directory lookup, create, or promotion fails.
    pub async fn get_or_create(&self, channel: Channel, target: &str) -> OtpResult<Provisioned> {
        match channel {
            Channel::Sms => self.by_phone(target).await,
            Channel::Email => self.by_email(target).await,
        }
    }

    async fn by_phone(&self, phone: &str) -> OtpResult<Provisioned> {
        match self.directory.find_by_phone(phone).await? {
            Lookup::Found(principal) => {
                debug!(uid = %principal.uid, "reusing directory identity");
                Ok(Provisioned {
                    uid: principal.uid,
                    is_new_user: false,
                })
            }
            Lookup::NotFound => {
                let created = self.directory.create(NewPrincipal::with_phone(phone)).await?;
                info!(uid = %created.uid, channel = %Channel::Sms, "created directory identity");
                Ok(Provisioned {
                    uid: created.uid,
                    is_new_user: true,
                })
            }
        }
    }

    async fn by_email(&self, email: &str) -> OtpResult<Provisioned> {
        match self.directory.find_by_email(email).await? {
            Lookup::Found(principal) => {
                // The caller just proved control of the mailbox, so a still
                // unverified email gets promoted on the spot.
                if !principal.email_verified {
                    self.directory.mark_email_verified(&principal.uid).await?;
                    info!(uid = %principal.uid, "promoted email to verified");
                }
                Ok(Provisioned {
                    uid: principal.uid,
                    is_new_user: false,
                })
            }
            Lookup::NotFound => {
                let created = self
                    .directory
                    .create(NewPrincipal::with_verified_email(email))
                    .await?;
                info!(uid = %created.uid, channel = %Channel::Email, "created directory identity");
                Ok(Provisioned {
                    uid: created.uid,
                    is_new_user: true,
                })
            }
        }
    }
}
