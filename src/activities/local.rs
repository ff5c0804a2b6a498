//! Repository provider backed by a plain git remote.
//!
//! Branch listing uses `git ls-remote`; change detection diffs two branches
//! inside a bare mirror kept under a local directory.

use std::path::PathBuf;

use super::git::run_git_checked;
use super::{DetectChangesPayload, RepoIo, Result};
use crate::types::{Changes, ProviderInfo, Repository};

#[derive(Debug, Clone)]
pub struct LocalRepoIo {
    url: String,
    owner: String,
    name: String,
    mirror: PathBuf,
}

impl LocalRepoIo {
    pub fn new(
        url: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        mirror: impl Into<PathBuf>,
    ) -> Self {
        LocalRepoIo {
            url: url.into(),
            owner: owner.into(),
            name: name.into(),
            mirror: mirror.into(),
        }
    }

    async fn refresh_mirror(&self) -> Result<()> {
        if self.mirror.exists() {
            let args = vec!["fetch".to_string(), "--prune".to_string(), "origin".to_string()];
            run_git_checked(self.mirror.clone(), args).await?;
        } else {
            let parent = self.mirror.parent().map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
            tokio::fs::create_dir_all(&parent).await?;
            let args = vec![
                "clone".to_string(),
                "--mirror".to_string(),
                self.url.clone(),
                self.mirror.display().to_string(),
            ];
            run_git_checked(parent, args).await?;
        }
        Ok(())
    }
}

/// Extracts branch names from `git ls-remote --heads` output.
pub(crate) fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, git_ref)| git_ref.trim().strip_prefix("refs/heads/"))
        .map(str::to_string)
        .collect()
}

/// Sums `git diff --numstat` output. Binary files count as modified only.
pub(crate) fn parse_numstat(output: &str) -> (u64, u64, Vec<String>) {
    let mut added = 0;
    let mut removed = 0;
    let mut modified = Vec::new();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(a), Some(r), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        added += a.parse::<u64>().unwrap_or(0);
        removed += r.parse::<u64>().unwrap_or(0);
        modified.push(path.to_string());
    }
    (added, removed, modified)
}

impl RepoIo for LocalRepoIo {
    async fn provider_info(&self, repo: &Repository) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            repo_name: self.name.clone(),
            owner: self.owner.clone(),
            default_branch: repo.default_branch.clone(),
            provider_id: repo.provider_id.clone(),
            installation_id: repo.ctrl_id.clone(),
        })
    }

    async fn all_branches(&self, _info: &ProviderInfo) -> Result<Vec<String>> {
        let args = vec!["ls-remote".to_string(), "--heads".to_string(), self.url.clone()];
        let output = run_git_checked(std::env::temp_dir(), args).await?;
        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn detect_changes(&self, payload: &DetectChangesPayload) -> Result<Changes> {
        self.refresh_mirror().await?;
        let range = format!("{}...{}", payload.default_branch, payload.target_branch);
        let args = vec!["diff".to_string(), "--numstat".to_string(), range.clone()];
        let output = run_git_checked(self.mirror.clone(), args).await?;
        let (added, removed, modified) = parse_numstat(&String::from_utf8_lossy(&output.stdout));

        Ok(Changes {
            added,
            removed,
            modified,
            delta: added + removed,
            compare_url: format!("{}/compare/{range}", self.url),
            repo_url: self.url.clone(),
        })
    }

    async fn tokenized_clone_url(&self, _info: &ProviderInfo) -> Result<String> {
        Ok(self.url.clone())
    }
}
