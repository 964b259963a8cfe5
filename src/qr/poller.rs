//! Background task that drives one QR challenge to a terminal state.
//!
//! ```text
//! waiting --(no scan yet)--------------> pending
//! waiting/pending --(redirect URL)-----> resolving
//! resolving --(cookies)----------------> success   [terminal]
//! resolving --(no response/no cookies)-> error     [terminal]
//! waiting/pending --(expired)----------> expired   [terminal]
//! waiting/pending --(unrecognised)-----> unknown
//! ```
//!
//! A poll that gets no response at all leaves the status untouched and is
//! retried after the usual delay.

use crate::{
    gateway::{LoginGateway, PollReply},
    qr::registry::{ChallengeRegistry, ChallengeStatus},
    session::{Credential, CredentialStore},
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const MSG_PENDING: &str = "Waiting for scan or confirmation";
pub const MSG_UNKNOWN: &str = "Unknown status";
pub const MSG_SUCCESS: &str = "Login successful";
pub const MSG_FAILED: &str = "Login failed";
pub const MSG_EXPIRED: &str = "QR code expired";

/// How a poller finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: ChallengeStatus,
    /// Number of poll requests issued, including the final one.
    pub iterations: u32,
}

pub struct LoginPoller {
    token: String,
    gateway: Arc<dyn LoginGateway>,
    registry: Arc<ChallengeRegistry>,
    store: Arc<CredentialStore>,
    interval: Duration,
}

impl LoginPoller {
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        gateway: Arc<dyn LoginGateway>,
        registry: Arc<ChallengeRegistry>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            token: token.into(),
            gateway,
            registry,
            store,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Register the token and spawn [`Self::run`] in the background.
    ///
    /// Returns `false` if a poller for this token already exists.
    pub async fn spawn(self) -> bool {
        let registry = self.registry.clone();
        let token = self.token.clone();
        let span = info_span!("login-poller", token = %token);

        registry
            .start(
                &token,
                async move {
                    let outcome = self.run().await;
                    info!(status = %outcome.status, iterations = outcome.iterations, "poller finished");
                }
                .instrument(span),
            )
            .await
    }

    /// Poll until the challenge reaches a terminal status.
    pub async fn run(self) -> PollOutcome {
        let mut handshake = match self.gateway.handshake(&self.token) {
            Ok(handshake) => handshake,
            Err(err) => {
                error!("Failed to open login session: {:#}", err);
                self.settle(ChallengeStatus::Error, MSG_FAILED).await;
                return PollOutcome {
                    status: ChallengeStatus::Error,
                    iterations: 0,
                };
            }
        };

        let mut iterations: u32 = 0;

        loop {
            iterations = iterations.saturating_add(1);
            let credential = self.store.get().await;

            match handshake.poll(&credential).await {
                None => {
                    warn!(iteration = iterations, "no response from login gateway, retrying");
                }

                Some(PollReply::Confirmed(url)) => {
                    debug!("login confirmed, collecting cookies");
                    let status = match handshake.resolve(&url, &credential).await {
                        Some(cookies) if !cookies.is_empty() => {
                            self.store.login(Credential::from_cookies(&cookies)).await;
                            self.settle(ChallengeStatus::Success, MSG_SUCCESS).await;
                            ChallengeStatus::Success
                        }
                        Some(_) => {
                            error!("confirmation redirect returned no cookies");
                            self.settle(ChallengeStatus::Error, MSG_FAILED).await;
                            ChallengeStatus::Error
                        }
                        None => {
                            error!("confirmation redirect failed");
                            self.settle(ChallengeStatus::Error, MSG_FAILED).await;
                            ChallengeStatus::Error
                        }
                    };

                    return PollOutcome { status, iterations };
                }

                Some(PollReply::Expired) => {
                    info!("QR code expired");
                    self.settle(ChallengeStatus::Expired, MSG_EXPIRED).await;
                    return PollOutcome {
                        status: ChallengeStatus::Expired,
                        iterations,
                    };
                }

                Some(PollReply::Waiting) => {
                    self.settle(ChallengeStatus::Pending, MSG_PENDING).await;
                }

                Some(PollReply::Unrecognised(code)) => {
                    debug!(?code, "unrecognised poll reply");
                    self.settle(ChallengeStatus::Unknown, MSG_UNKNOWN).await;
                }
            }

            sleep(self.interval).await;
        }
    }

    async fn settle(&self, status: ChallengeStatus, message: &str) {
        if !self.registry.update_status(&self.token, status, message).await {
            debug!(%status, "status not applied");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        gateway::{dispatch::CookieSnapshot, GatewayFuture, HandshakeSession, QrChallenge},
        session::{LoginLog, CSRF_COOKIE, USER_ID_COOKIE},
    };
    use anyhow::{anyhow, Result};
    use std::{collections::VecDeque, sync::Mutex as StdMutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Script {
        replies: Arc<StdMutex<VecDeque<Option<PollReply>>>>,
        cookies: Option<CookieSnapshot>,
        fail_handshake: bool,
        // Records the registry status each time the poller asks for a reply.
        observer: Option<Arc<ChallengeRegistry>>,
        seen: Arc<StdMutex<Vec<ChallengeStatus>>>,
    }

    struct ScriptedGateway(Script);

    struct ScriptedHandshake(Script);

    impl LoginGateway for ScriptedGateway {
        fn generate<'a>(
            &'a self,
            _credential: &'a Credential,
        ) -> GatewayFuture<'a, Option<QrChallenge>> {
            Box::pin(async { None })
        }

        fn handshake(&self, _qrcode_key: &str) -> Result<Box<dyn HandshakeSession>> {
            if self.0.fail_handshake {
                return Err(anyhow!("no client"));
            }
            Ok(Box::new(ScriptedHandshake(self.0.clone())))
        }
    }

    impl HandshakeSession for ScriptedHandshake {
        fn poll<'a>(
            &'a mut self,
            _credential: &'a Credential,
        ) -> GatewayFuture<'a, Option<PollReply>> {
            let reply = self
                .0
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Some(PollReply::Expired));
            let observer = self.0.observer.clone();
            let seen = self.0.seen.clone();
            Box::pin(async move {
                if let Some(registry) = observer {
                    let status = registry.get("key").await.unwrap().status;
                    seen.lock().unwrap().push(status);
                }
                reply
            })
        }

        fn resolve<'a>(
            &'a mut self,
            _url: &'a str,
            _credential: &'a Credential,
        ) -> GatewayFuture<'a, Option<CookieSnapshot>> {
            let cookies = self.0.cookies.clone();
            Box::pin(async move { cookies })
        }
    }

    struct Harness {
        _dir: TempDir,
        registry: Arc<ChallengeRegistry>,
        store: Arc<CredentialStore>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(CredentialStore::new(LoginLog::new(
                dir.path().join("login_data.csv"),
            )));
            Self {
                _dir: dir,
                registry: Arc::new(ChallengeRegistry::new()),
                store,
            }
        }

        async fn run(&self, script: Script) -> PollOutcome {
            self.registry.create("key").await;
            LoginPoller::new(
                "key",
                Arc::new(ScriptedGateway(script)),
                self.registry.clone(),
                self.store.clone(),
            )
            .with_interval(Duration::ZERO)
            .run()
            .await
        }

        async fn status(&self) -> ChallengeStatus {
            self.registry.get("key").await.unwrap().status
        }
    }

    fn script(replies: Vec<Option<PollReply>>) -> Script {
        Script {
            replies: Arc::new(StdMutex::new(replies.into())),
            cookies: Some(CookieSnapshot::from([
                (USER_ID_COOKIE.to_string(), "777".to_string()),
                (CSRF_COOKIE.to_string(), "csrf".to_string()),
                ("SESSDATA".to_string(), "sess".to_string()),
            ])),
            fail_handshake: false,
            observer: None,
            seen: Arc::default(),
        }
    }

    fn confirmed() -> Option<PollReply> {
        Some(PollReply::Confirmed("https://passport.example/cross".to_string()))
    }

    #[tokio::test]
    async fn waits_then_succeeds_in_n_plus_one_iterations() {
        let harness = Harness::new();
        let waits = 3;
        let mut replies = vec![Some(PollReply::Waiting); waits];
        replies.push(confirmed());

        let outcome = harness.run(script(replies)).await;

        assert_eq!(outcome.status, ChallengeStatus::Success);
        assert_eq!(outcome.iterations, u32::try_from(waits).unwrap() + 1);
        assert_eq!(harness.status().await, ChallengeStatus::Success);

        let credential = harness.store.get().await;
        assert!(credential.is_logged_in());
        assert_eq!(credential.user_id(), Some("777"));

        let log = std::fs::read_to_string(harness.store.log().path()).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.starts_with("777,csrf,"));
    }

    #[tokio::test]
    async fn expiry_leaves_store_untouched() {
        let harness = Harness::new();
        let outcome = harness
            .run(script(vec![Some(PollReply::Waiting), Some(PollReply::Expired)]))
            .await;

        assert_eq!(
            outcome,
            PollOutcome {
                status: ChallengeStatus::Expired,
                iterations: 2
            }
        );
        assert_eq!(harness.status().await, ChallengeStatus::Expired);
        assert!(!harness.store.is_logged_in().await);
        assert!(!harness.store.log().path().exists());
    }

    #[tokio::test]
    async fn missing_responses_do_not_transition() {
        let harness = Harness::new();
        let mut silent = script(vec![None, None, Some(PollReply::Expired)]);
        silent.observer = Some(harness.registry.clone());
        let seen = silent.seen.clone();

        let outcome = harness.run(silent).await;

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.status, ChallengeStatus::Expired);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChallengeStatus::Waiting; 3]
        );
    }

    #[tokio::test]
    async fn unrecognised_reply_sets_unknown_and_continues() {
        let harness = Harness::new();
        let outcome = harness
            .run(script(vec![Some(PollReply::Unrecognised(Some(-1))), confirmed()]))
            .await;

        assert_eq!(outcome.status, ChallengeStatus::Success);
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn failed_redirect_is_an_error() {
        let harness = Harness::new();
        let mut failing = script(vec![confirmed()]);
        failing.cookies = None;

        let outcome = harness.run(failing).await;
        assert_eq!(outcome.status, ChallengeStatus::Error);
        assert_eq!(
            harness.registry.get("key").await.unwrap().message,
            MSG_FAILED
        );
        assert!(!harness.store.is_logged_in().await);
    }

    #[tokio::test]
    async fn redirect_without_cookies_is_an_error() {
        let harness = Harness::new();
        let mut empty = script(vec![confirmed()]);
        empty.cookies = Some(CookieSnapshot::new());

        assert_eq!(harness.run(empty).await.status, ChallengeStatus::Error);
        assert!(!harness.store.is_logged_in().await);
    }

    #[tokio::test]
    async fn handshake_failure_is_an_error() {
        let harness = Harness::new();
        let mut broken = script(Vec::new());
        broken.fail_handshake = true;

        let outcome = harness.run(broken).await;
        assert_eq!(
            outcome,
            PollOutcome {
                status: ChallengeStatus::Error,
                iterations: 0
            }
        );
    }

    #[tokio::test]
    async fn spawn_runs_in_background_once() {
        let harness = Harness::new();
        let poller = || {
            LoginPoller::new(
                "key",
                Arc::new(ScriptedGateway(script(vec![confirmed()]))),
                harness.registry.clone(),
                harness.store.clone(),
            )
            .with_interval(Duration::ZERO)
        };

        assert!(poller().spawn().await);
        assert!(!poller().spawn().await);

        for _ in 0..200 {
            if harness.registry.get("key").await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(harness.status().await, ChallengeStatus::Success);
        assert!(harness.store.is_logged_in().await);
    }
}
