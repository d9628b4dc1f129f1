/// Tuning knobs for the issue and verify flows.
///
/// Values mirror the CLI flags one-to-one; the CLI layer builds this from
/// parsed arguments and hands it to the service unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpConfig {
    /// Number of digits in a generated code.
    pub code_length: u32,
    /// Challenge lifetime from creation.
    pub expiry_seconds: u64,
    /// Client-side resend hint returned on a successful issue.
    pub resend_seconds: u64,
    /// Wrong-code budget per challenge before it locks.
    pub max_attempts: u32,
    /// Length of the sliding rate window.
    pub rate_window_seconds: u64,
    /// Codes allowed per target inside one window.
    pub max_per_window: u32,
    /// Lockout applied when the window quota is exceeded.
    pub lock_minutes: u64,
    /// Calling code prepended to phone numbers without a `+` prefix.
    /// Unset means such numbers are rejected.
    pub default_calling_code: Option<String>,
}

impl OtpConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            code_length: 6,
            expiry_seconds: 300,
            resend_seconds: 30,
            max_attempts: 5,
            rate_window_seconds: 600,
            max_per_window: 5,
            lock_minutes: 30,
            default_calling_code: None,
        }
    }

    #[must_use]
    pub const fn with_code_length(mut self, digits: u32) -> Self {
        self.code_length = digits;
        self
    }

    #[must_use]
    pub const fn with_expiry_seconds(mut self, seconds: u64) -> Self {
        self.expiry_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_resend_seconds(mut self, seconds: u64) -> Self {
        self.resend_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_rate_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_window_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_max_per_window(mut self, count: u32) -> Self {
        self.max_per_window = count;
        self
    }

    #[must_use]
    pub const fn with_lock_minutes(mut self, minutes: u64) -> Self {
        self.lock_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_default_calling_code(mut self, code: impl Into<String>) -> Self {
        self.default_calling_code = Some(code.into());
        self
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}
