//! Append-only login event log.
//!
//! One comma-delimited line per login/logout event:
//! `user_id,csrf_token,cookie_string,status_flag,timestamp`.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, instrument, warn};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FLAG_ACTIVE: &str = "1";
const FLAG_CLOSED: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Active,
    Closed,
}

impl RecordStatus {
    fn flag(self) -> &'static str {
        match self {
            Self::Active => FLAG_ACTIVE,
            Self::Closed => FLAG_CLOSED,
        }
    }

    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            FLAG_ACTIVE => Some(Self::Active),
            FLAG_CLOSED => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginRecord {
    pub user_id: String,
    pub csrf_token: SecretString,
    pub cookie_string: SecretString,
    pub status: RecordStatus,
    pub timestamp: String,
}

impl LoginRecord {
    /// Record written on logout; identity fields carry the `Unknown` placeholder.
    #[must_use]
    pub fn closing(timestamp: String) -> Self {
        Self {
            user_id: super::UNKNOWN.to_string(),
            csrf_token: SecretString::from(super::UNKNOWN.to_string()),
            cookie_string: SecretString::from(super::UNKNOWN.to_string()),
            status: RecordStatus::Closed,
            timestamp,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}\n",
            self.user_id,
            self.csrf_token.expose_secret(),
            self.cookie_string.expose_secret(),
            self.status.flag(),
            self.timestamp
        )
    }

    // The cookie string sits in the middle so a stray comma inside it is kept
    // intact: identity comes from the first two fields, flag and time from the last two.
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        if fields.len() < 5 {
            return None;
        }

        let last = fields.len() - 1;
        let status = RecordStatus::from_flag(fields[last - 1].trim())?;

        Some(Self {
            user_id: fields[0].to_string(),
            csrf_token: SecretString::from(fields[1].to_string()),
            cookie_string: SecretString::from(fields[2..last - 1].join(",")),
            status,
            timestamp: fields[last].to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoginLog {
    path: PathBuf,
}

impl LoginLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    /// # Errors
    /// Returns an error if the file cannot be opened, written or synced.
    #[instrument(skip(self, record), fields(path = %self.path.display(), status = ?record.status))]
    pub async fn append(&self, record: &LoginRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open login log {}", self.path.display()))?;

        file.write_all(record.to_line().as_bytes())
            .await
            .context("Failed to write login record")?;
        file.sync_data().await.context("Failed to sync login log")?;

        debug!("login record appended");

        Ok(())
    }

    /// Replay the log in file order and return the last active record.
    ///
    /// A closing record after the last active one means the session was logged
    /// out, so nothing is returned.
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load_latest_active(&self) -> Result<Option<LoginRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no login log found");
                return Ok(None);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read login log {}", self.path.display()))
            }
        };

        let mut latest = None;
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match LoginRecord::parse(line) {
                Some(record) if record.is_active() => latest = Some(record),
                Some(_) => latest = None,
                None => warn!(line = index + 1, "skipping malformed login record"),
            }
        }

        Ok(latest)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn active(user_id: &str, cookies: &str, timestamp: &str) -> LoginRecord {
        LoginRecord {
            user_id: user_id.to_string(),
            csrf_token: SecretString::from("csrf".to_string()),
            cookie_string: SecretString::from(cookies.to_string()),
            status: RecordStatus::Active,
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn parse_keeps_commas_inside_cookie_string() {
        let record = LoginRecord::parse("42,jct,a=1, b=2; c=3,1,2024-01-01 10:00:00").unwrap();
        assert_eq!(record.user_id, "42");
        assert_eq!(record.cookie_string.expose_secret(), "a=1, b=2; c=3");
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(record.timestamp, "2024-01-01 10:00:00");
    }

    #[test]
    fn parse_rejects_short_or_unflagged_lines() {
        assert!(LoginRecord::parse("42,jct,cookie").is_none());
        assert!(LoginRecord::parse("42,jct,cookie,7,2024-01-01 10:00:00").is_none());
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let log = LoginLog::new(dir.path().join("absent.csv"));
        assert!(log.load_latest_active().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn latest_active_record_wins() -> Result<()> {
        let dir = TempDir::new()?;
        let log = LoginLog::new(dir.path().join("nested").join("login_data.csv"));

        log.append(&active("1", "DedeUserID=1", "2024-01-01 10:00:00"))
            .await?;
        log.append(&active("2", "DedeUserID=2", "2024-01-02 10:00:00"))
            .await?;

        let record = log.load_latest_active().await?.unwrap();
        assert_eq!(record.user_id, "2");
        assert_eq!(record.cookie_string.expose_secret(), "DedeUserID=2");
        Ok(())
    }

    #[tokio::test]
    async fn logout_after_login_restores_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let log = LoginLog::new(dir.path().join("login_data.csv"));

        log.append(&active("1", "DedeUserID=1", "2024-01-01 10:00:00"))
            .await?;
        log.append(&LoginRecord::closing("2024-01-01 11:00:00".to_string()))
            .await?;

        assert!(log.load_latest_active().await?.is_none());

        let contents = std::fs::read_to_string(log.path())?;
        let last = contents.lines().last().unwrap();
        assert_eq!(last, "Unknown,Unknown,Unknown,0,2024-01-01 11:00:00");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("login_data.csv");
        std::fs::write(
            &path,
            "garbage\n7,jct,DedeUserID=7,1,2024-01-01 10:00:00\n\nalso,garbage\n",
        )?;

        let record = LoginLog::new(path).load_latest_active().await?.unwrap();
        assert_eq!(record.user_id, "7");
        Ok(())
    }
}
