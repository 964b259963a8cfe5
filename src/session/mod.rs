//! Process-wide login session.
//!
//! The [`CredentialStore`] holds the single live [`Credential`]. Readers get a
//! cloned snapshot; writers replace or clear the whole credential under one
//! mutation lock, so a reader never observes a half-written session.

pub mod log;

pub use self::log::{LoginLog, LoginRecord, RecordStatus};

use chrono::Local;
use secrecy::{ExposeSecret, SecretString};
use std::{collections::BTreeMap, fmt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument};

/// Placeholder for identity fields the platform did not hand back.
pub const UNKNOWN: &str = "Unknown";

pub const USER_ID_COOKIE: &str = "DedeUserID";
pub const CSRF_COOKIE: &str = "bili_jct";

#[derive(Clone, Default)]
pub struct Credential {
    user_id: String,
    csrf_token: SecretString,
    cookies: BTreeMap<String, SecretString>,
    logged_in: bool,
}

impl Credential {
    /// Build a logged-in credential from the cookies collected during login.
    #[must_use]
    pub fn from_cookies(cookies: &BTreeMap<String, String>) -> Self {
        let user_id = cookies
            .get(USER_ID_COOKIE)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());
        let csrf_token = cookies
            .get(CSRF_COOKIE)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());

        Self {
            user_id,
            csrf_token: SecretString::from(csrf_token),
            cookies: cookies
                .iter()
                .map(|(name, value)| (name.clone(), SecretString::from(value.clone())))
                .collect(),
            logged_in: true,
        }
    }

    /// Rebuild a credential from a persisted active record.
    #[must_use]
    pub fn from_record(record: &LoginRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            csrf_token: record.csrf_token.clone(),
            cookies: parse_cookie_string(record.cookie_string.expose_secret())
                .into_iter()
                .map(|(name, value)| (name, SecretString::from(value)))
                .collect(),
            logged_in: true,
        }
    }

    #[must_use]
    pub fn to_record(&self, timestamp: String) -> LoginRecord {
        LoginRecord {
            user_id: self.user_id.clone(),
            csrf_token: self.csrf_token.clone(),
            cookie_string: SecretString::from(self.cookie_string()),
            status: if self.logged_in {
                RecordStatus::Active
            } else {
                RecordStatus::Closed
            },
            timestamp,
        }
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// `None` while logged out.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.logged_in.then_some(self.user_id.as_str())
    }

    #[must_use]
    pub fn csrf_token(&self) -> &SecretString {
        &self.csrf_token
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose_secret()))
    }

    /// `name=value; name=value`, the form sent in a `Cookie` header.
    #[must_use]
    pub fn cookie_string(&self) -> String {
        self.cookies()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("csrf_token", &"***")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("logged_in", &self.logged_in)
            .finish()
    }
}

/// Split `a=1; b=2` into pairs, ignoring fragments without `=`.
#[must_use]
pub fn parse_cookie_string(cookie_string: &str) -> BTreeMap<String, String> {
    cookie_string
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[must_use]
pub fn timestamp_now() -> String {
    Local::now().format(log::TIMESTAMP_FORMAT).to_string()
}

/// Nickname and avatar of the account behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub nickname: String,
    pub avatar: String,
}

/// The platform's verdict on a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Accepted(Profile),
    /// The platform answered and says the cookies no longer log in.
    Rejected,
    /// No usable answer; says nothing about the cookies.
    Inconclusive,
}

pub struct CredentialStore {
    current: RwLock<Credential>,
    // Serialises writers so the in-memory swap and its log line land in the same order.
    writer: Mutex<()>,
    log: LoginLog,
}

impl CredentialStore {
    #[must_use]
    pub fn new(log: LoginLog) -> Self {
        Self {
            current: RwLock::new(Credential::default()),
            writer: Mutex::new(()),
            log,
        }
    }

    /// Build a store seeded from the last open session in `log`.
    ///
    /// An unreadable log is logged and treated as "no session".
    pub async fn restore(log: LoginLog) -> Self {
        let store = Self::new(log);

        match store.log.load_latest_active().await {
            Ok(Some(record)) => {
                info!(user_id = %record.user_id, since = %record.timestamp, "restored login session");
                store.set(Credential::from_record(&record)).await;
            }
            Ok(None) => info!("no previous login session"),
            Err(err) => error!("Failed to replay login log: {:#}", err),
        }

        store
    }

    #[must_use]
    pub fn log(&self) -> &LoginLog {
        &self.log
    }

    /// Replace the live credential.
    pub async fn set(&self, credential: Credential) {
        let _guard = self.writer.lock().await;
        *self.current.write().await = credential;
    }

    /// Replace the live credential and append an active record for it.
    #[instrument(skip(self, credential), fields(user_id = %credential.user_id))]
    pub async fn login(&self, credential: Credential) {
        let _guard = self.writer.lock().await;

        let record = credential.to_record(timestamp_now());
        if let Err(err) = self.log.append(&record).await {
            error!("Failed to persist login: {:#}", err);
        }

        *self.current.write().await = credential;
        info!("session stored");
    }

    /// Drop the live credential and append a closing record.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        let _guard = self.writer.lock().await;
        self.close().await;
    }

    /// Clear the session only if it still belongs to `user_id`.
    ///
    /// Used when the platform rejects the cookies; a login that landed in the
    /// meantime is left alone. Returns whether anything was cleared.
    #[instrument(skip(self))]
    pub async fn expire(&self, user_id: &str) -> bool {
        let _guard = self.writer.lock().await;

        if self.current.read().await.user_id() != Some(user_id) {
            debug!("session changed since the check, not expiring");
            return false;
        }

        self.close().await;
        true
    }

    // Caller holds `writer`.
    async fn close(&self) {
        *self.current.write().await = Credential::default();

        if let Err(err) = self.log.append(&LoginRecord::closing(timestamp_now())).await {
            error!("Failed to persist logout: {:#}", err);
        }
        info!("session cleared");
    }

    pub async fn get(&self) -> Credential {
        self.current.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.current.read().await.is_logged_in()
    }
}
