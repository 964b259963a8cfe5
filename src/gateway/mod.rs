//! Remote login gateway.
//!
//! The platform's passport API is an unreliable external party: it issues QR
//! challenge tokens and reports how far a scan has progressed. The poller only
//! talks to it through [`LoginGateway`] and [`HandshakeSession`] so tests can
//! script it.

pub mod dispatch;

use crate::session::Credential;
use anyhow::{Context, Result};
use dispatch::{CookieSnapshot, HttpSession, Payload};
use serde_json::Value;
use std::{future::Future, pin::Pin};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PASSPORT_URL: &str = "https://passport.bilibili.com";

/// QR code has expired.
pub const CODE_EXPIRED: i64 = 86038;
/// QR code has not been scanned yet.
pub const CODE_NOT_SCANNED: i64 = 86101;
/// QR code was scanned and is waiting for confirmation on the phone.
pub const CODE_NOT_CONFIRMED: i64 = 86090;

const GENERATE_PATH: &str = "/x/passport-login/web/qrcode/generate";
const POLL_PATH: &str = "/x/passport-login/web/qrcode/poll";

pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrChallenge {
    pub qrcode_key: String,
    pub url: String,
}

/// How one poll reply is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// Scanned and confirmed; following the URL yields the session cookies.
    Confirmed(String),
    Expired,
    /// Not scanned yet, or scanned and waiting for confirmation.
    Waiting,
    /// Missing, malformed or unrecognised reply.
    Unrecognised(Option<i64>),
}

impl PollReply {
    /// Classify a poll payload.
    ///
    /// A non-empty `data.url` wins over any code. The QR state code lives in
    /// `data.code`; the top-level `code` is only consulted when that is absent.
    #[must_use]
    pub fn classify(payload: &Payload) -> Self {
        let Some(json) = payload.as_json() else {
            return Self::Unrecognised(None);
        };

        if let Some(url) = json
            .pointer("/data/url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
        {
            return Self::Confirmed(url.to_string());
        }

        let code = json
            .pointer("/data/code")
            .and_then(Value::as_i64)
            .or_else(|| json.get("code").and_then(Value::as_i64));

        match code {
            Some(CODE_EXPIRED) => Self::Expired,
            Some(CODE_NOT_SCANNED | CODE_NOT_CONFIRMED) => Self::Waiting,
            other => Self::Unrecognised(other),
        }
    }
}

/// Cookie-carrying conversation for one challenge token.
pub trait HandshakeSession: Send {
    /// Ask once for the scan state; `None` when no response came back.
    fn poll<'a>(&'a mut self, credential: &'a Credential)
        -> GatewayFuture<'a, Option<PollReply>>;

    /// Follow the confirmation redirect on the same session.
    ///
    /// `None` when the request failed; otherwise every cookie the session now holds.
    fn resolve<'a>(
        &'a mut self,
        url: &'a str,
        credential: &'a Credential,
    ) -> GatewayFuture<'a, Option<CookieSnapshot>>;
}

pub trait LoginGateway: Send + Sync {
    /// Request a fresh QR challenge; `None` when the gateway did not provide one.
    fn generate<'a>(&'a self, credential: &'a Credential)
        -> GatewayFuture<'a, Option<QrChallenge>>;

    /// Open the per-token session a poller keeps for the whole handshake.
    /// # Errors
    /// Returns an error if the underlying HTTP session cannot be created.
    fn handshake(&self, qrcode_key: &str) -> Result<Box<dyn HandshakeSession>>;
}

#[derive(Clone, Debug)]
pub struct BilibiliGateway {
    passport: Url,
}

impl BilibiliGateway {
    /// # Errors
    /// Returns an error if `passport_url` is not a valid URL.
    pub fn new(passport_url: &str) -> Result<Self> {
        let passport = Url::parse(passport_url)
            .with_context(|| format!("Invalid passport URL: {passport_url}"))?;
        Ok(Self { passport })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.passport.as_str().trim_end_matches('/'))
    }
}

impl LoginGateway for BilibiliGateway {
    fn generate<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> GatewayFuture<'a, Option<QrChallenge>> {
        Box::pin(async move {
            let session = match HttpSession::stateless() {
                Ok(session) => session,
                Err(err) => {
                    warn!("Failed to create HTTP session: {:#}", err);
                    return None;
                }
            };

            let reply = session
                .fetch(
                    &self.endpoint(GENERATE_PATH),
                    &[("source", "main_web".to_string())],
                    credential,
                )
                .await?;

            parse_challenge(&reply.payload)
        })
    }

    fn handshake(&self, qrcode_key: &str) -> Result<Box<dyn HandshakeSession>> {
        Ok(Box::new(BilibiliHandshake {
            session: HttpSession::persistent(Some(self.passport.clone()))?,
            poll_url: self.endpoint(POLL_PATH),
            qrcode_key: qrcode_key.to_string(),
        }))
    }
}

fn parse_challenge(payload: &Payload) -> Option<QrChallenge> {
    let json = payload.as_json()?;
    let data = json.get("data")?;
    let challenge = QrChallenge {
        qrcode_key: data.get("qrcode_key")?.as_str()?.to_string(),
        url: data.get("url")?.as_str()?.to_string(),
    };

    if challenge.qrcode_key.is_empty() {
        warn!("gateway returned an empty qrcode_key");
        return None;
    }

    Some(challenge)
}

struct BilibiliHandshake {
    session: HttpSession,
    poll_url: String,
    qrcode_key: String,
}

impl HandshakeSession for BilibiliHandshake {
    fn poll<'a>(
        &'a mut self,
        credential: &'a Credential,
    ) -> GatewayFuture<'a, Option<PollReply>> {
        Box::pin(async move {
            let query = [
                ("qrcode_key", self.qrcode_key.clone()),
                ("source", "navUserCenterLogin".to_string()),
            ];
            let reply = self.session.fetch(&self.poll_url, &query, credential).await?;

            let classified = PollReply::classify(&reply.payload);
            debug!(?classified, "poll reply");
            Some(classified)
        })
    }

    fn resolve<'a>(
        &'a mut self,
        url: &'a str,
        credential: &'a Credential,
    ) -> GatewayFuture<'a, Option<CookieSnapshot>> {
        Box::pin(async move {
            debug!("following confirmation redirect");
            let reply = self.session.fetch(url, &[], credential).await?;
            Some(reply.cookies)
        })
    }
}
