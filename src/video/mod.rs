//! Video metadata resolution and stream download.
//!
//! Thin request/response glue over the platform's public web API; every call
//! goes through [`HttpSession::fetch`] with the caller's current credential.

mod bvid;
mod download;

pub use self::bvid::{extract_bvid, valid_bvid};
pub use self::download::{select_streams, DownloadedFiles, StreamPair};

use crate::{
    gateway::dispatch::HttpSession,
    session::{Credential, Profile, SessionCheck},
};
use anyhow::Context;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.bilibili.com";
pub const DEFAULT_DOWNLOAD_DIR: &str = "download";
/// 1080P.
pub const DEFAULT_QUALITY: i64 = 80;

const VIEW_PATH: &str = "/x/web-interface/view";
const PLAY_URL_PATH: &str = "/x/player/playurl";
const NAV_PATH: &str = "/x/web-interface/nav";

const UNKNOWN_NICKNAME: &str = "Unknown user";

/// Requests every DASH format the account is allowed to see.
const FNVAL_ALL_DASH: &str = "4048";

/// Owner fields copied into the flattened view.
const OWNER_FIELDS: [&str; 2] = ["name", "face"];
const STAT_FIELDS: [&str; 7] = ["view", "danmaku", "reply", "favorite", "coin", "share", "like"];
const VIEW_FIELDS: [&str; 9] = [
    "bvid", "aid", "cid", "tname", "pic", "title", "desc", "duration", "pubdate",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("input must not be empty")]
    EmptyInput,
    #[error("no BV identifier found in input")]
    UnrecognisedInput,
    #[error("invalid bvid: {0}")]
    InvalidBvid(String),
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("video metadata unavailable")]
    MetadataUnavailable,
    #[error("play info unavailable")]
    PlayInfoUnavailable,
    #[error("no video or audio stream found")]
    StreamsMissing,
    #[error("failed to fetch stream: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("stream request returned {0}")]
    FetchStatus(reqwest::StatusCode),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Errors caused by the request itself rather than the platform or disk.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::UnrecognisedInput
                | Self::InvalidBvid(_)
                | Self::MissingParameter(_)
                | Self::MetadataUnavailable
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct VideoClient {
    api: Url,
    session: HttpSession,
    download_dir: PathBuf,
}

impl VideoClient {
    /// # Errors
    /// Returns an error if `api_url` is invalid or the HTTP client cannot be built.
    pub fn new(api_url: &str, download_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let api = Url::parse(api_url).with_context(|| format!("Invalid API URL: {api_url}"))?;
        Ok(Self {
            api,
            session: HttpSession::stateless()?,
            download_dir: download_dir.into(),
        })
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.api.as_str().trim_end_matches('/'))
    }

    /// `data` of the view API, or `None` when the call failed or `code != 0`.
    #[instrument(skip(self, credential))]
    pub async fn view(&self, bvid: &str, credential: &Credential) -> Option<Value> {
        let reply = self
            .session
            .fetch(
                &self.endpoint(VIEW_PATH),
                &[("bvid", bvid.to_string())],
                credential,
            )
            .await?;
        api_data(reply.payload.as_json())
    }

    /// Stream descriptors (`data` of the play URL API).
    #[instrument(skip(self, credential))]
    pub async fn play_url(&self, bvid: &str, cid: &str, credential: &Credential) -> Option<Value> {
        let query = [
            ("bvid", bvid.to_string()),
            ("cid", cid.to_string()),
            ("fnval", FNVAL_ALL_DASH.to_string()),
            ("fnver", "0".to_string()),
            ("fourk", "1".to_string()),
        ];
        let reply = self
            .session
            .fetch(&self.endpoint(PLAY_URL_PATH), &query, credential)
            .await?;
        api_data(reply.payload.as_json())
    }

    /// Ask the platform whether `credential` still logs in.
    ///
    /// The nav reply also carries the account's nickname and avatar.
    #[instrument(skip(self, credential))]
    pub async fn nav(&self, credential: &Credential) -> SessionCheck {
        match self
            .session
            .fetch(&self.endpoint(NAV_PATH), &[], credential)
            .await
        {
            Some(reply) => session_check(reply.payload.as_json()),
            None => SessionCheck::Inconclusive,
        }
    }

    async fn resolve(&self, input: &str, credential: &Credential) -> Result<(String, Value, Value)> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::EmptyInput);
        }
        let bvid = extract_bvid(input).ok_or(Error::UnrecognisedInput)?;

        let view = self
            .view(&bvid, credential)
            .await
            .ok_or(Error::MetadataUnavailable)?;
        let cid = view.get("cid").and_then(param_value).ok_or(Error::MetadataUnavailable)?;

        let play = self
            .play_url(&bvid, &cid, credential)
            .await
            .ok_or(Error::PlayInfoUnavailable)?;

        debug!(%bvid, %cid, "video resolved");
        Ok((bvid, view, play))
    }

    /// Metadata summary plus raw play info.
    /// # Errors
    /// See [`Error`]; input errors and missing metadata are client errors.
    pub async fn parse(&self, input: &str, credential: &Credential) -> Result<Value> {
        let (bvid, view, play) = self.resolve(input, credential).await?;
        Ok(json!({
            "bvid": bvid,
            "cid": field(&view, "cid"),
            "title": field(&view, "title"),
            "desc": field(&view, "desc"),
            "type": field(&view, "tname"),
            "play_info": play,
        }))
    }

    /// One flat object with direct stream URLs, owner and stats.
    /// # Errors
    /// See [`Error`]; also fails when the play info lists no streams.
    pub async fn parse_flat(&self, input: &str, credential: &Credential) -> Result<Value> {
        let (_, view, play) = self.resolve(input, credential).await?;
        flatten(&view, &play)
    }

    /// Fetch the chosen video and audio streams into the download directory.
    /// # Errors
    /// See [`Error`].
    #[instrument(skip(self, credential))]
    pub async fn download(
        &self,
        bvid: &str,
        cid: &str,
        quality: i64,
        credential: &Credential,
    ) -> Result<DownloadedFiles> {
        if bvid.is_empty() {
            return Err(Error::MissingParameter("bvid"));
        }
        if cid.is_empty() {
            return Err(Error::MissingParameter("cid"));
        }
        if !valid_bvid(bvid) {
            return Err(Error::InvalidBvid(bvid.to_string()));
        }

        let play = self
            .play_url(bvid, cid, credential)
            .await
            .ok_or(Error::PlayInfoUnavailable)?;
        let streams = select_streams(&play, quality).ok_or(Error::StreamsMissing)?;

        download::save(self.session.client(), &self.download_dir, bvid, &streams).await
    }
}

fn api_data(json: Option<&Value>) -> Option<Value> {
    let json = json?;
    match json.get("code").and_then(Value::as_i64) {
        Some(0) => json.get("data").cloned(),
        code => {
            warn!(?code, message = ?json.get("message"), "platform API rejected request");
            None
        }
    }
}

fn session_check(json: Option<&Value>) -> SessionCheck {
    let Some(json) = json else {
        return SessionCheck::Inconclusive;
    };
    let data = field(json, "data");

    match data.get("isLogin").and_then(Value::as_bool) {
        Some(false) => SessionCheck::Rejected,
        Some(true) if json.get("code").and_then(Value::as_i64) == Some(0) => {
            let text = |key: &str| data.get(key).and_then(Value::as_str).filter(|v| !v.is_empty());
            SessionCheck::Accepted(Profile {
                nickname: text("uname").unwrap_or(UNKNOWN_NICKNAME).to_string(),
                avatar: text("face").unwrap_or_default().to_string(),
            })
        }
        _ => {
            warn!(code = ?json.get("code"), "nav reply without a login verdict");
            SessionCheck::Inconclusive
        }
    }
}

/// Query-string form of a JSON scalar (`cid` arrives as a number).
fn param_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn first_backup_url(play: &Value, kind: &str) -> Option<Value> {
    play.pointer(&format!("/dash/{kind}/0/backupUrl/0"))
        .or_else(|| play.pointer(&format!("/dash/{kind}/0/backup_url/0")))
        .cloned()
}

fn flatten(view: &Value, play: &Value) -> Result<Value> {
    let video_url = first_backup_url(play, "video").ok_or(Error::StreamsMissing)?;
    let audio_url = first_backup_url(play, "audio").ok_or(Error::StreamsMissing)?;

    let mut flat = Map::new();
    flat.insert("videoUrl".to_string(), video_url);
    flat.insert("audioUrl".to_string(), audio_url);

    for key in VIEW_FIELDS {
        flat.insert(key.to_string(), field(view, key));
    }

    let owner = field(view, "owner");
    for key in OWNER_FIELDS {
        flat.insert(key.to_string(), field(&owner, key));
    }

    let stat = field(view, "stat");
    for key in STAT_FIELDS {
        flat.insert(key.to_string(), field(&stat, key));
    }

    Ok(Value::Object(flat))
}
