use crate::video::DEFAULT_DOWNLOAD_DIR;
use clap::{Arg, Command};

pub const ARG_LOGIN_LOG: &str = "login-log";
pub const ARG_DOWNLOAD_DIR: &str = "download-dir";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_LOG)
                .long("login-log")
                .help("Append-only log of login and logout events")
                .long_help(
                    "Append-only log of login and logout events. The most recent session that was not followed by a logout is restored at startup.",
                )
                .default_value("login_data.csv")
                .env("BILIDOWN_LOGIN_LOG"),
        )
        .arg(
            Arg::new(ARG_DOWNLOAD_DIR)
                .long("download-dir")
                .help("Directory where downloaded streams are written")
                .default_value(DEFAULT_DOWNLOAD_DIR)
                .env("BILIDOWN_DOWNLOAD_DIR"),
        )
}
