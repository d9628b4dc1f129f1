//! Caller input resolution: channel selection, target normalization, masking.

use crate::otp::error::{OtpError, OtpResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Delivery channel for a code. Closed set, matched exhaustively everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical (channel, target) pair plus the display-safe form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub channel: Channel,
    pub target: String,
    pub masked: String,
}

/// Turns raw caller input into a [`ResolvedTarget`].
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    default_calling_code: Option<String>,
}

impl IdentityResolver {
    #[must_use]
    pub const fn new(default_calling_code: Option<String>) -> Self {
        Self {
            default_calling_code,
        }
    }

    /// Resolve the channel and normalized target from the caller's input.
    ///
    /// An explicit channel is honored; otherwise email wins when a valid one
    /// is present, then phone is attempted.
    ///
    /// # Errors
    /// `InvalidArgument` when no valid phone or email can be derived.
    pub fn resolve(
        &self,
        channel: Option<Channel>,
        phone_number: Option<&str>,
        email: Option<&str>,
    ) -> OtpResult<ResolvedTarget> {
        match channel {
            Some(Channel::Email) => {
                let raw = email
                    .ok_or_else(|| OtpError::invalid("email is required for the email channel"))?;
                Self::email_target(raw)
            }
            Some(Channel::Sms) => {
                let raw = phone_number.ok_or_else(|| {
                    OtpError::invalid("phoneNumber is required for the sms channel")
                })?;
                self.phone_target(raw)
            }
            None => {
                if let Some(raw) = email {
                    if let Ok(resolved) = Self::email_target(raw) {
                        return Ok(resolved);
                    }
                }
                let raw = phone_number
                    .ok_or_else(|| OtpError::invalid("a valid phone number or email is required"))?;
                self.phone_target(raw)
            }
        }
    }

    fn phone_target(&self, raw: &str) -> OtpResult<ResolvedTarget> {
        let target = normalize_phone(raw, self.default_calling_code.as_deref())?;
        let masked = mask_phone(&target);
        Ok(ResolvedTarget {
            channel: Channel::Sms,
            target,
            masked,
        })
    }

    fn email_target(raw: &str) -> OtpResult<ResolvedTarget> {
        let target = normalize_email(raw)?;
        let masked = mask_email(&target);
        Ok(ResolvedTarget {
            channel: Channel::Email,
            target,
            masked,
        })
    }
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

/// Normalize a phone number to `+` followed by 8 to 15 digits.
///
/// Whitespace and punctuation are stripped, a leading `00` counts as `+`,
/// and numbers without either get the default calling code prepended.
///
/// # Errors
/// `InvalidArgument` when no digits remain, no calling code is configured
/// for a local number, or the result does not fit the `+8..15` digit shape.
pub fn normalize_phone(raw: &str, default_calling_code: Option<&str>) -> OtpResult<String> {
    let trimmed = raw.trim();
    let explicit_plus = trimmed.starts_with('+');

    let mut digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();

    // International dial prefix, same meaning as "+".
    let international = explicit_plus
        || if digits.starts_with("00") {
            digits.drain(..2);
            true
        } else {
            false
        };

    if digits.is_empty() {
        return Err(OtpError::invalid("phone number contains no digits"));
    }

    let candidate = if international {
        format!("+{digits}")
    } else {
        let code = default_calling_code.ok_or_else(|| {
            OtpError::invalid("phone number must start with + (no default calling code configured)")
        })?;
        let code = code.trim().trim_start_matches('+');
        format!("+{code}{digits}")
    };

    let valid = Regex::new(r"^\+[0-9]{8,15}$").map_or(false, |re| re.is_match(&candidate));
    if valid {
        Ok(candidate)
    } else {
        Err(OtpError::invalid(
            "phone number must be + followed by 8 to 15 digits",
        ))
    }
}

/// Trim, lowercase, and validate an email address.
///
/// # Errors
/// `InvalidArgument` when the result does not look like `local@domain.tld`.
pub fn normalize_email(raw: &str) -> OtpResult<String> {
    let email = raw.trim().to_lowercase();
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(OtpError::invalid("invalid email address"))
    }
}

/// Display-safe phone form: `+***` plus the last four digits.
#[must_use]
pub fn mask_phone(target: &str) -> String {
    let digits = target.trim_start_matches('+');
    if digits.len() <= 4 {
        // Nothing meaningful left to hide.
        target.to_string()
    } else {
        format!("+***{}", &digits[digits.len() - 4..])
    }
}

/// Display-safe email form: two local-part characters plus `***@domain`.
#[must_use]
pub fn mask_email(target: &str) -> String {
    match target.split_once('@') {
        Some((local, domain)) => {
            if local.chars().count() >= 2 {
                let prefix: String = local.chars().take(2).collect();
                format!("{prefix}***@{domain}")
            } else {
                format!("***@{domain}")
            }
        }
        None => "***".to_string(),
    }
}

#[must_use]
pub fn mask_target(channel: Channel, target: &str) -> String {
    match channel {
        Channel::Sms => mask_phone(target),
        Channel::Email => mask_email(target),
    }
}
