//! # Bilidown (QR Login & Stream Downloader)
//!
//! `bilidown` is a small HTTP service that logs into bilibili without a browser.
//! A client asks for a QR challenge, a human scans it with the mobile app, and a
//! background poller turns the platform's scan/confirm progress into a durable
//! cookie session. With that session the service resolves video metadata and
//! downloads the DASH video and audio streams to local storage.
//!
//! ## Login Handshake
//!
//! Each challenge token gets exactly one poller task. The poller owns its own
//! cookie jar so cookies accumulate across the handshake, and it only stops on a
//! terminal outcome:
//!
//! 1. **success:** the platform handed back a redirect URL and following it yielded cookies.
//! 2. **expired:** the platform reported that the QR code timed out.
//! 3. **error:** the redirect could not be resolved into cookies.
//!
//! Transport failures and unrecognised replies never end a handshake; the
//! poller waits and asks again.
//!
//! ## Session Persistence
//!
//! Login and logout events are appended to a plain comma-delimited log. At
//! startup the log is replayed and the most recent open session (one that was
//! not followed by a logout) is restored, so a restart does not force a rescan.
//!
//! Only one session is live per process. Concurrent writers (a finishing poller
//! and a logout) resolve as last-write-wins.

pub mod api;
pub mod cli;
pub mod gateway;
pub mod qr;
pub mod session;
pub mod video;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
