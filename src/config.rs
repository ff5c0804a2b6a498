//! Runtime configuration.
//!
//! Every value has a default; [`Config::from_env`] overrides the ones that
//! have a `TRUNKLINE_*` environment variable set to something parseable.

use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::RetryConfig;

/// Default weighted mutation count at which a controller checkpoints.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 4000;

/// Default per-attempt timeout for activities (60 seconds).
const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 60;

/// Default timeout for nested pull request processing (10 minutes).
const DEFAULT_CHILD_TIMEOUT_SECS: u64 = 600;

/// Default number of concurrent git sessions.
const DEFAULT_SESSION_SLOTS: usize = 4;

/// Inbox capacity of each control process.
const DEFAULT_CHANNEL_BUFFER: usize = 100;

pub const DEFAULT_QUEUE_LABEL: &str = "qmerge";
pub const DEFAULT_PRIORITY_LABEL: &str = "priority-qmerge";

#[derive(Debug, Clone)]
pub struct Config {
    /// Weighted mutation count at which controllers checkpoint and restart.
    ///
    /// Configure via `TRUNKLINE_CHECKPOINT_THRESHOLD`.
    pub checkpoint_threshold: u64,

    /// Per-attempt timeout for activities.
    ///
    /// Configure via `TRUNKLINE_ACTIVITY_TIMEOUT_SECS`.
    pub activity_timeout: Duration,

    /// Timeout for nested processes started by `invoke_child`.
    ///
    /// Configure via `TRUNKLINE_CHILD_TIMEOUT_SECS`.
    pub child_timeout: Duration,

    /// Backoff for retryable activity failures.
    ///
    /// `TRUNKLINE_MAX_RETRIES` overrides the retry count.
    pub retry: RetryConfig,

    /// Checkpoint directory. Nothing is written to disk when unset.
    ///
    /// Configure via `TRUNKLINE_STATE_DIR`.
    pub state_dir: Option<PathBuf>,

    /// Parent directory of ephemeral rebase clones.
    ///
    /// Configure via `TRUNKLINE_CLONE_ROOT`.
    pub clone_root: PathBuf,

    /// Maximum number of git sessions open at once.
    ///
    /// Configure via `TRUNKLINE_SESSION_SLOTS`.
    pub session_slots: usize,

    pub channel_buffer: usize,

    /// Label that adds a pull request to the primary queue.
    pub queue_label: String,

    /// Label that adds a pull request to the priority queue.
    pub priority_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            activity_timeout: Duration::from_secs(DEFAULT_ACTIVITY_TIMEOUT_SECS),
            child_timeout: Duration::from_secs(DEFAULT_CHILD_TIMEOUT_SECS),
            retry: RetryConfig::DEFAULT,
            state_dir: None,
            clone_root: std::env::temp_dir().join("trunkline"),
            session_slots: DEFAULT_SESSION_SLOTS,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            queue_label: DEFAULT_QUEUE_LABEL.to_string(),
            priority_label: DEFAULT_PRIORITY_LABEL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::new();
        let mut retry = defaults.retry;
        if let Some(max_retries) = env_parse::<u32>("TRUNKLINE_MAX_RETRIES") {
            retry.max_retries = max_retries;
        }

        Config {
            checkpoint_threshold: env_parse("TRUNKLINE_CHECKPOINT_THRESHOLD")
                .unwrap_or(defaults.checkpoint_threshold),
            activity_timeout: env_parse("TRUNKLINE_ACTIVITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_timeout),
            child_timeout: env_parse("TRUNKLINE_CHILD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.child_timeout),
            retry,
            state_dir: std::env::var_os("TRUNKLINE_STATE_DIR").map(PathBuf::from),
            clone_root: std::env::var_os("TRUNKLINE_CLONE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.clone_root),
            session_slots: env_parse::<usize>("TRUNKLINE_SESSION_SLOTS")
                .filter(|slots| *slots > 0)
                .unwrap_or(defaults.session_slots),
            ..defaults
        }
    }

    pub fn with_checkpoint_threshold(mut self, threshold: u64) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = timeout;
        self
    }

    pub fn with_child_timeout(mut self, timeout: Duration) -> Self {
        self.child_timeout = timeout;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_clone_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.clone_root = dir.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
