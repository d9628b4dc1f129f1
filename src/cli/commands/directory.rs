use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("directory-url")
                .long("directory-url")
                .help("Identity directory base URL, example: https://directory.tld/v1")
                .env("SEZAMO_DIRECTORY_URL")
                .required(true),
        )
        .arg(
            Arg::new("directory-api-key")
                .long("directory-api-key")
                .help("API key sent to the identity directory in the X-Api-Key header")
                .env("SEZAMO_DIRECTORY_API_KEY"),
        )
}
