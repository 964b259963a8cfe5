//! Outbound request helper shared by the login poller and the video client.
//!
//! [`HttpSession::fetch`] never fails: transport errors, non-200 replies and
//! unreadable bodies all collapse to `None` after being logged.

use crate::session::{parse_cookie_string, Credential};
use anyhow::{Context, Result};
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT},
    Client, StatusCode,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0";
const BROWSER_ACCEPT_LANGUAGE: &str =
    "zh-CN,zh;q=0.8,zh-TW;q=0.7,zh-HK;q=0.5,en-US;q=0.3,en;q=0.2";
const BROWSER_REFERER: &str = "https://www.bilibili.com/";

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub type CookieSnapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub payload: Payload,
    pub cookies: CookieSnapshot,
}

/// Headers the platform expects from a desktop browser.
#[must_use]
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(REFERER, HeaderValue::from_static(BROWSER_REFERER));
    headers
}

/// HTTP client plus an optional cookie jar.
///
/// A *persistent* session keeps every cookie the server sets, which the login
/// handshake relies on. A *stateless* session sends the caller's credential as
/// a `Cookie` header and forgets whatever comes back.
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    jar: Option<Arc<Jar>>,
    cookie_origin: Option<Url>,
}

impl HttpSession {
    /// Session with its own jar. `cookie_origin` is also read when taking a
    /// snapshot so cookies scoped to the platform's parent domain are included.
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn persistent(cookie_origin: Option<Url>) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .default_headers(browser_headers())
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            jar: Some(jar),
            cookie_origin,
        })
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn stateless() -> Result<Self> {
        let client = Client::builder()
            .default_headers(browser_headers())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            jar: None,
            cookie_origin: None,
        })
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` with `query`, attaching `credential`'s cookies when it is logged in.
    ///
    /// Returns the JSON (or, failing that, text) body and a snapshot of the
    /// cookies visible to this session, or `None` on any failure.
    #[instrument(skip(self, query, credential))]
    pub async fn fetch(
        &self,
        url: &str,
        query: &[(&str, String)],
        credential: &Credential,
    ) -> Option<Dispatched> {
        let request_url = match Url::parse(url) {
            Ok(request_url) => request_url,
            Err(err) => {
                warn!("Invalid request URL {}: {}", url, err);
                return None;
            }
        };

        let mut request = self.client.get(request_url.clone()).query(query);

        if credential.is_logged_in() {
            match &self.jar {
                Some(jar) => {
                    for (name, value) in credential.cookies() {
                        jar.add_cookie_str(&format!("{name}={value}; Path=/"), &request_url);
                    }
                }
                None => {
                    match HeaderValue::from_str(&credential.cookie_string()) {
                        Ok(value) => request = request.header(COOKIE, value),
                        Err(err) => {
                            warn!("Session cookies are not a valid header, sending none: {}", err);
                        }
                    }
                }
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("Request to {} failed: {}", url, err);
                return None;
            }
        };

        let status = response.status();
        let final_url = response.url().clone();
        debug!(%status, %final_url, "response received");

        if status != StatusCode::OK {
            warn!("Request to {} returned {}", url, status);
            return None;
        }

        let mut cookies: CookieSnapshot = response
            .cookies()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!("Failed to read body from {}: {}", url, err);
                return None;
            }
        };

        cookies.extend(self.snapshot(&[&request_url, &final_url]));

        let payload = serde_json::from_str::<Value>(&body)
            .map_or_else(|_| Payload::Text(body), Payload::Json);

        Some(Dispatched { payload, cookies })
    }

    /// Cookies the jar would send to any of `urls` or to the cookie origin.
    fn snapshot(&self, urls: &[&Url]) -> CookieSnapshot {
        let Some(jar) = &self.jar else {
            return CookieSnapshot::new();
        };

        urls.iter()
            .copied()
            .chain(self.cookie_origin.as_ref())
            .filter_map(|url| jar.cookies(url))
            .filter_map(|header| header.to_str().ok().map(parse_cookie_string))
            .fold(CookieSnapshot::new(), |mut acc, cookies| {
                acc.extend(cookies);
                acc
            })
    }
}
