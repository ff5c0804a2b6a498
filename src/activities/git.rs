//! Git activities backed by the `git` binary.
//!
//! Every command runs with system and global configuration disabled so that
//! rerere, hooks and aliases on the host cannot change the outcome. The
//! commands are blocking and run on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::error::{ActivityError, RebaseConflict};
use super::{ClonePayload, GitIo, Result};
use crate::types::Sha;

static COULD_NOT_APPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^(?:error: )?could not apply ([0-9a-f]{7,40})\.\.\.\s*(.*?)\s*$")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Identity used for the commits a rebase rewrites.
///
/// Passed with `-c` flags because global configuration is disabled.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "trunkline".to_string(),
            email: "trunkline@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitCli {
    identity: CommitIdentity,
    /// `--depth` for clones. Full single-branch history when `None`.
    depth: Option<u32>,
}

impl GitCli {
    pub fn new(identity: CommitIdentity) -> Self {
        GitCli {
            identity,
            depth: None,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    fn identity_args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("user.name={}", self.identity.name),
            "-c".to_string(),
            format!("user.email={}", self.identity.email),
        ]
    }
}

/// Creates a git command with a clean environment.
fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Runs git on the blocking pool and returns the raw output.
async fn run_git(workdir: PathBuf, args: Vec<String>) -> Result<Output> {
    debug!(workdir = %workdir.display(), args = ?args, "Running git");
    let output = tokio::task::spawn_blocking(move || git_command(&workdir).args(&args).output())
        .await??;
    Ok(output)
}

/// Runs git and maps a non-zero exit to [`ActivityError::CommandFailed`].
pub(super) async fn run_git_checked(workdir: PathBuf, args: Vec<String>) -> Result<Output> {
    let output = run_git(workdir, args.clone()).await?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(ActivityError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Classifies the outcome of `git rebase`.
///
/// Exit 1 with a parseable "could not apply" line is a conflict. Exit 128
/// means a rebase was already in progress. Anything else non-zero is a
/// retryable command failure.
pub fn classify_rebase(code: Option<i32>, stdout: &str, stderr: &str) -> Result<()> {
    match code {
        Some(0) => Ok(()),
        Some(1) => {
            let combined = format!("{stdout}\n{stderr}");
            match COULD_NOT_APPLY.captures(&combined) {
                Some(caps) => Err(ActivityError::RebaseConflict(RebaseConflict {
                    sha: Sha::new(&caps[1]),
                    message: caps[2].to_string(),
                    in_progress: false,
                })),
                None => Err(ActivityError::CommandFailed {
                    command: "git rebase".to_string(),
                    stderr: stderr.to_string(),
                }),
            }
        }
        Some(128) => Err(ActivityError::RebaseConflict(RebaseConflict {
            sha: Sha::new(""),
            message: stderr.trim().to_string(),
            in_progress: true,
        })),
        _ => Err(ActivityError::CommandFailed {
            command: "git rebase".to_string(),
            stderr: stderr.to_string(),
        }),
    }
}

impl GitIo for GitCli {
    async fn clone_branch(&self, payload: &ClonePayload) -> Result<()> {
        let parent = payload
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&parent).await?;

        let mut args = vec![
            "clone".to_string(),
            "--branch".to_string(),
            payload.branch.clone(),
            "--single-branch".to_string(),
        ];
        if let Some(depth) = self.depth {
            args.push("--depth".to_string());
            args.push(depth.to_string());
        }
        args.push(payload.url.clone());
        args.push(payload.path.display().to_string());

        run_git_checked(parent, args).await?;
        Ok(())
    }

    async fn fetch_branch(&self, path: &Path, default_branch: &str) -> Result<()> {
        let args = vec![
            "fetch".to_string(),
            "origin".to_string(),
            default_branch.to_string(),
        ];
        run_git_checked(path.to_path_buf(), args).await?;
        Ok(())
    }

    async fn rebase_at_commit(&self, path: &Path, commit: &Sha) -> Result<()> {
        let mut args = self.identity_args();
        args.push("rebase".to_string());
        args.push(commit.to_string());

        let output = run_git(path.to_path_buf(), args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_rebase(output.status.code(), &stdout, &stderr)
    }

    async fn push_branch(&self, path: &Path, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push".to_string(), "origin".to_string(), branch.to_string()];
        if force {
            args.push("--force".to_string());
        }
        run_git_checked(path.to_path_buf(), args).await?;
        Ok(())
    }

    async fn remove_cloned(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove clone");
                Err(e.into())
            }
        }
    }
}
