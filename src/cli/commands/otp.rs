use clap::{Arg, Command};

/// Code and abuse-control tuning. Defaults match `OtpConfig::new`.
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("code-length")
                .long("code-length")
                .help("Digits per one-time code")
                .default_value("6")
                .env("SEZAMO_CODE_LENGTH")
                .value_parser(clap::value_parser!(u32).range(4..=10)),
        )
        .arg(
            Arg::new("expiry-seconds")
                .long("expiry-seconds")
                .help("Challenge lifetime in seconds")
                .default_value("300")
                .env("SEZAMO_EXPIRY_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("resend-seconds")
                .long("resend-seconds")
                .help("Seconds clients should wait before requesting a new code")
                .default_value("30")
                .env("SEZAMO_RESEND_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .help("Wrong-code attempts allowed before a challenge locks")
                .default_value("5")
                .env("SEZAMO_MAX_ATTEMPTS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("rate-window-seconds")
                .long("rate-window-seconds")
                .help("Length of the per-target send-rate window in seconds")
                .default_value("600")
                .env("SEZAMO_RATE_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("max-per-window")
                .long("max-per-window")
                .help("Codes allowed per target inside one rate window")
                .default_value("5")
                .env("SEZAMO_MAX_PER_WINDOW")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("lock-minutes")
                .long("lock-minutes")
                .help("Minutes a target stays blocked after exceeding the window quota")
                .default_value("30")
                .env("SEZAMO_LOCK_MINUTES")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("default-calling-code")
                .long("default-calling-code")
                .help("Calling code prepended to phone numbers without a + prefix, example: 227")
                .env("SEZAMO_DEFAULT_CALLING_CODE"),
        )
}
