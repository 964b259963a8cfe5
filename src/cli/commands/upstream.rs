use crate::{gateway::DEFAULT_PASSPORT_URL, video::DEFAULT_API_URL};
use clap::{Arg, Command};

pub const ARG_POLL_INTERVAL: &str = "poll-interval";
pub const ARG_PASSPORT_URL: &str = "passport-url";
pub const ARG_API_URL: &str = "api-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_POLL_INTERVAL)
                .long("poll-interval")
                .help("Seconds between QR login status polls")
                .default_value("5")
                .env("BILIDOWN_POLL_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSPORT_URL)
                .long("passport-url")
                .help("Base URL of the passport (login) API")
                .default_value(DEFAULT_PASSPORT_URL)
                .env("BILIDOWN_PASSPORT_URL"),
        )
        .arg(
            Arg::new(ARG_API_URL)
                .long("api-url")
                .help("Base URL of the video metadata API")
                .default_value(DEFAULT_API_URL)
                .env("BILIDOWN_API_URL"),
        )
}
