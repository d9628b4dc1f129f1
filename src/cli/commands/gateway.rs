use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("gateway-url")
                .long("gateway-url")
                .help("Message gateway base URL, example: https://gateway.tld/v1")
                .env("SEZAMO_GATEWAY_URL")
                .required(true),
        )
        .arg(
            Arg::new("gateway-api-key")
                .long("gateway-api-key")
                .help("API key sent to the message gateway in the X-Api-Key header")
                .env("SEZAMO_GATEWAY_API_KEY"),
        )
}
