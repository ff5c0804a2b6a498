//! Notification payloads and a log-backed notifier.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{MessageIo, Result};
use crate::types::{Changes, NotifyConfig, Repository};

/// Fields common to every notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub workspace_id: String,
    pub channel_id: String,
    pub bot_token: String,
    pub repo_name: String,
    pub branch_name: String,
    pub author: String,
    #[serde(default)]
    pub author_url: String,
    /// Post to the channel rather than messaging the author directly.
    pub is_channel: bool,
}

impl MessagePayload {
    pub fn new(
        notify: &NotifyConfig,
        repo_name: impl Into<String>,
        branch: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        MessagePayload {
            workspace_id: notify.workspace_id.clone(),
            channel_id: notify.channel_id.clone(),
            bot_token: notify.bot_token.clone(),
            repo_name: repo_name.into(),
            branch_name: branch.into(),
            author: author.into(),
            author_url: String::new(),
            is_channel: true,
        }
    }

    pub fn for_repo(repo: &Repository, repo_name: &str, branch: &str, author: &str) -> Self {
        Self::new(&repo.notify, repo_name, branch, author)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleBranchMessage {
    pub payload: MessagePayload,
    pub commit_url: String,
    pub repo_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesExceededMessage {
    pub payload: MessagePayload,
    pub threshold: u64,
    pub changes: Changes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflictMessage {
    pub payload: MessagePayload,
    pub commit_url: String,
    pub repo_url: String,
    pub sha: String,
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessageIo;

impl MessageIo for LogMessageIo {
    async fn send_stale_branch(&self, msg: &StaleBranchMessage) -> Result<()> {
        info!(
            repo = %msg.payload.repo_name,
            branch = %msg.payload.branch_name,
            author = %msg.payload.author,
            commit_url = %msg.commit_url,
            "Branch is stale"
        );
        Ok(())
    }

    async fn send_lines_exceeded(&self, msg: &LinesExceededMessage) -> Result<()> {
        info!(
            repo = %msg.payload.repo_name,
            branch = %msg.payload.branch_name,
            author = %msg.payload.author,
            threshold = msg.threshold,
            delta = msg.changes.delta,
            compare_url = %msg.changes.compare_url,
            "Branch exceeds line threshold"
        );
        Ok(())
    }

    async fn send_merge_conflict(&self, msg: &MergeConflictMessage) -> Result<()> {
        info!(
            repo = %msg.payload.repo_name,
            branch = %msg.payload.branch_name,
            author = %msg.payload.author,
            sha = %msg.sha,
            commit_url = %msg.commit_url,
            "Branch has a merge conflict with trunk"
        );
        Ok(())
    }
}
