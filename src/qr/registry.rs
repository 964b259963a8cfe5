//! In-memory map of QR challenge tokens to their lifecycle status.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, future::Future};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Waiting,
    Pending,
    Unknown,
    Success,
    Expired,
    Error,
}

impl ChallengeStatus {
    /// Once terminal, a challenge never changes again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Expired | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSnapshot {
    pub status: ChallengeStatus,
    pub message: String,
}

#[derive(Debug)]
struct Entry {
    status: ChallengeStatus,
    message: String,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn waiting() -> Self {
        Self {
            status: ChallengeStatus::Waiting,
            message: "Waiting for scan".to_string(),
            task: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChallengeRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ChallengeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `token` as `waiting`. Returns `false` if it is already known.
    pub async fn create(&self, token: &str) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(token) {
            return false;
        }
        entries.insert(token.to_string(), Entry::waiting());
        true
    }

    /// Create the entry and spawn its poller while holding the registry lock,
    /// so no reader sees the token without a task behind it.
    ///
    /// Returns `false`, and spawns nothing, when `token` is already registered.
    pub async fn start<F>(&self, token: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(token) {
            warn!(token, "challenge already registered");
            return false;
        }

        let mut entry = Entry::waiting();
        entry.task = Some(tokio::spawn(task));
        entries.insert(token.to_string(), entry);
        debug!(token, "poller spawned");
        true
    }

    /// Overwrite the status of `token`.
    ///
    /// Returns `false` when the token is unknown or already terminal; either
    /// way the entry is left untouched.
    pub async fn update_status(
        &self,
        token: &str,
        status: ChallengeStatus,
        message: impl Into<String>,
    ) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(token) else {
            warn!(token, %status, "status update for unknown challenge");
            return false;
        };

        if entry.status.is_terminal() {
            debug!(token, current = %entry.status, ignored = %status, "challenge already settled");
            return false;
        }

        entry.status = status;
        entry.message = message.into();
        true
    }

    /// `None` means the token was never issued; it is not the same as an `error` status.
    pub async fn get(&self, token: &str) -> Option<ChallengeSnapshot> {
        self.entries
            .lock()
            .await
            .get(token)
            .map(|entry| ChallengeSnapshot {
                status: entry.status,
                message: entry.message.clone(),
            })
    }

    /// Whether a poller task is still alive for `token`.
    pub async fn is_running(&self, token: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(token)
            .and_then(|entry| entry.task.as_ref())
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
