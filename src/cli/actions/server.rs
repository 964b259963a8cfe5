use crate::{
    api::{self, AppState},
    gateway::BilibiliGateway,
    session::{CredentialStore, LoginLog},
    video::VideoClient,
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub login_log: PathBuf,
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
    pub passport_url: String,
    pub api_url: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if an upstream URL is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let gateway = BilibiliGateway::new(&args.passport_url).context("Could not build login gateway")?;
    let video = VideoClient::new(&args.api_url, args.download_dir.clone())
        .context("Could not build video client")?;

    let store = CredentialStore::restore(LoginLog::new(args.login_log.clone())).await;

    let state = AppState::new(store, Arc::new(gateway), video).with_poll_interval(args.poll_interval);

    let (credential, profile) = state.verified_session().await;
    match (credential.user_id(), profile) {
        (Some(user_id), Some(profile)) => {
            info!(%user_id, nickname = %profile.nickname, "restored session verified");
        }
        (Some(user_id), None) => info!(%user_id, "restored session kept unverified"),
        (None, _) => info!("no session restored"),
    }

    api::new(args.port, Arc::new(state)).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("login_log", args.login_log.display().to_string()),
        ("download_dir", args.download_dir.display().to_string()),
        ("poll_interval", format!("{}s", args.poll_interval.as_secs())),
        ("passport_url", args.passport_url.clone()),
        ("api_url", args.api_url.clone()),
    ];
    info!("{}", startup_message("Startup configuration", &entries));
}

fn startup_message(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    message
}

fn banner() -> String {
    BANNER.replace(
        "{VERSION}",
        &format!(
            " - {} - {}",
            env!("CARGO_PKG_VERSION"),
            short_commit(crate::GIT_COMMIT_HASH)
        ),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const BANNER: &str = r"
  +-----------+
  | ## ## ##  |
  | #  ##  #  |   B I L I D O W N {VERSION}
  | ## ## ##  |
  +-----------+";
