//! Test doubles for the delivery and directory boundaries.
//!
//! Used by the unit and integration tests; kept in the library so
//! out-of-crate tests can drive the full service without a network.

use crate::directory::{
    DirectoryError, IdentityDirectory, Lookup, NewPrincipal, Principal, TokenIssuer,
};
use crate::gateway::{Deliverer, DeliveryError, OtpMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Recording [`Deliverer`] with a failure toggle.
#[derive(Debug, Default)]
pub struct MockDeliverer {
    sent: Mutex<Vec<OtpMessage>>,
    failing: AtomicBool,
}

impl MockDeliverer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages delivered so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OtpMessage> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Code carried by the most recent message.
    #[must_use]
    pub fn last_code(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|guard| guard.last().map(|message| message.code.clone()))
    }
}

#[async_trait]
impl Deliverer for MockDeliverer {
    async fn deliver(&self, message: &OtpMessage) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected {
                status: 502,
                message: "gateway unavailable".to_string(),
            });
        }
        if let Ok(mut guard) = self.sent.lock() {
            guard.push(message.clone());
        }
        Ok(())
    }
}

/// In-memory [`IdentityDirectory`] and [`TokenIssuer`] with failure
/// toggles. Created uids are `uid-1`, `uid-2`, ... in creation order.
#[derive(Debug, Default)]
pub struct MockDirectory {
    principals: Mutex<Vec<Principal>>,
    issued: Mutex<Vec<String>>,
    created: AtomicU64,
    fail_lookups: AtomicBool,
    fail_creates: AtomicBool,
    fail_tokens: AtomicBool,
}

impl MockDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a principal.
    pub fn seed(&self, principal: Principal) {
        if let Ok(mut guard) = self.principals.lock() {
            guard.push(principal);
        }
    }

    pub fn set_fail_lookups(&self, failing: bool) {
        self.fail_lookups.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, failing: bool) {
        self.fail_creates.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_tokens(&self, failing: bool) {
        self.fail_tokens.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn principals(&self) -> Vec<Principal> {
        self.principals
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn principal(&self, uid: &str) -> Option<Principal> {
        self.principals
            .lock()
            .ok()
            .and_then(|guard| guard.iter().find(|p| p.uid == uid).cloned())
    }

    /// Uids that received a token, in issue order.
    #[must_use]
    pub fn issued(&self) -> Vec<String> {
        self.issued
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn unavailable() -> DirectoryError {
        DirectoryError::Rejected {
            status: 503,
            message: "directory unavailable".to_string(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for MockDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Lookup, DirectoryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let guard = self.principals.lock().map_err(|_| Self::unavailable())?;
        Ok(guard
            .iter()
            .find(|p| p.phone_number.as_deref() == Some(phone))
            .cloned()
            .map_or(Lookup::NotFound, Lookup::Found))
    }

    async fn find_by_email(&self, email: &str) -> Result<Lookup, DirectoryError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let guard = self.principals.lock().map_err(|_| Self::unavailable())?;
        Ok(guard
            .iter()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned()
            .map_or(Lookup::NotFound, Lookup::Found))
    }

    async fn create(&self, principal: NewPrincipal) -> Result<Principal, DirectoryError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let uid = format!("uid-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1);
        let created = Principal {
            uid,
            phone_number: principal.phone_number,
            email: principal.email,
            email_verified: principal.email_verified,
        };
        let mut guard = self.principals.lock().map_err(|_| Self::unavailable())?;
        guard.push(created.clone());
        Ok(created)
    }

    async fn mark_email_verified(&self, uid: &str) -> Result<(), DirectoryError> {
        let mut guard = self.principals.lock().map_err(|_| Self::unavailable())?;
        match guard.iter_mut().find(|p| p.uid == uid) {
            Some(principal) => {
                principal.email_verified = true;
                Ok(())
            }
            None => Err(DirectoryError::Rejected {
                status: 404,
                message: format!("unknown uid {uid}"),
            }),
        }
    }
}

#[async_trait]
impl TokenIssuer for MockDirectory {
    async fn issue(&self, uid: &str) -> Result<String, DirectoryError> {
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        if let Ok(mut guard) = self.issued.lock() {
            guard.push(uid.to_string());
        }
        Ok(format!("token-{uid}"))
    }
}
