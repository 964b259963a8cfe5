//! QR login: challenge registry, background pollers and image rendering.

pub mod render;
pub mod poller;
pub mod registry;

pub use self::poller::{LoginPoller, PollOutcome, DEFAULT_POLL_INTERVAL};
pub use self::registry::{ChallengeRegistry, ChallengeSnapshot, ChallengeStatus};
