use crate::cli::{
    actions::{server::Args, Action},
    commands::{storage, upstream, ARG_PORT},
};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(7893);

    let required = |name: &str| -> Result<String> {
        matches
            .get_one::<String>(name)
            .cloned()
            .with_context(|| format!("missing required argument: --{name}"))
    };

    let poll_interval = matches
        .get_one::<u64>(upstream::ARG_POLL_INTERVAL)
        .copied()
        .map_or(crate::qr::DEFAULT_POLL_INTERVAL, Duration::from_secs);

    Ok(Action::Server(Args {
        port,
        login_log: PathBuf::from(required(storage::ARG_LOGIN_LOG)?),
        download_dir: PathBuf::from(required(storage::ARG_DOWNLOAD_DIR)?),
        poll_interval,
        passport_url: required(upstream::ARG_PASSPORT_URL)?,
        api_url: required(upstream::ARG_API_URL)?,
    }))
}
