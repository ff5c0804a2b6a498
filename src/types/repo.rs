//! Repository records and the metadata cached about them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RepoId, Sha};

/// Default stale-branch check interval (two days).
pub const DEFAULT_STALE_SECS: u64 = 2 * 24 * 60 * 60;

/// Source hosting provider a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoProvider {
    Github,
    Gitlab,
    Bitbucket,
    /// A plain git remote reachable from this machine.
    Local,
}

impl fmt::Display for RepoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoProvider::Github => "github",
            RepoProvider::Gitlab => "gitlab",
            RepoProvider::Bitbucket => "bitbucket",
            RepoProvider::Local => "local",
        };
        f.write_str(name)
    }
}

/// Chat provider notifications are delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageProvider {
    Slack,
    /// Writes notifications to the log instead of a chat service.
    Log,
}

impl fmt::Display for MessageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageProvider::Slack => "slack",
            MessageProvider::Log => "log",
        };
        f.write_str(name)
    }
}

/// Notification settings attached to a repository.
///
/// Opaque to the controllers: they copy it into every outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub provider: MessageProvider,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub bot_token: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            provider: MessageProvider::Log,
            workspace_id: String::new(),
            channel_id: String::new(),
            bot_token: String::new(),
        }
    }
}

/// A repository under management.
///
/// Owned by the caller. Every control process holds its own copy for its
/// whole lifetime and passes it forward on checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    /// Control id of the provider installation that owns this repository.
    pub ctrl_id: String,
    pub provider: RepoProvider,
    /// The provider's own identifier for the repository.
    pub provider_id: String,
    pub default_branch: String,
    #[serde(default)]
    pub is_monorepo: bool,
    /// Line delta above which a push triggers a warning.
    pub threshold: u64,
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_stale_secs() -> u64 {
    DEFAULT_STALE_SECS
}

impl Repository {
    pub fn new(provider: RepoProvider, provider_id: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Repository {
            id: RepoId::new_v4(),
            ctrl_id: String::new(),
            provider,
            provider_id: provider_id.into(),
            default_branch: default_branch.into(),
            is_monorepo: false,
            threshold: 500,
            stale_secs: DEFAULT_STALE_SECS,
            notify: NotifyConfig::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_stale_duration(mut self, stale: Duration) -> Self {
        self.stale_secs = stale.as_secs().max(1);
        self
    }

    pub fn stale_duration(&self) -> Duration {
        Duration::from_secs(self.stale_secs.max(1))
    }

    pub fn is_default(&self, branch: &str) -> bool {
        self.default_branch == branch
    }
}

/// Metadata the repository provider reports about a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub repo_name: String,
    pub owner: String,
    pub default_branch: String,
    pub provider_id: String,
    pub installation_id: String,
}

impl ProviderInfo {
    /// Browsable URL of the repository on its provider.
    pub fn repo_url(&self, provider: RepoProvider) -> String {
        match provider {
            RepoProvider::Github => format!("https://github.com/{}/{}", self.owner, self.repo_name),
            RepoProvider::Gitlab => format!("https://gitlab.com/{}/{}", self.owner, self.repo_name),
            RepoProvider::Bitbucket => {
                format!("https://bitbucket.org/{}/{}", self.owner, self.repo_name)
            }
            RepoProvider::Local => format!("file://{}/{}", self.owner, self.repo_name),
        }
    }
}

/// A commit as reported in a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Sha,
    pub message: String,
    pub author: String,
    #[serde(default)]
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

/// Diff statistics of a branch against the default branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub added: u64,
    pub removed: u64,
    pub modified: Vec<String>,
    pub delta: u64,
    pub compare_url: String,
    pub repo_url: String,
}

/// Extracts the branch name from a fully qualified ref.
///
/// `refs/heads/feature/x` becomes `feature/x`. Refs without the heads prefix
/// are returned unchanged.
pub fn branch_name_from_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}
