//! Shared test utilities: a recording activity set and event builders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::activities::{
    Activities, ActivityError, ClonePayload, DetectChangesPayload, EventStore, GitIo,
    LinesExceededMessage, MergeConflictMessage, MessageIo, PrProcessor, RegistryError, RepoIo,
    Result, StaleBranchMessage, classify_rebase,
};
use crate::config::Config;
use crate::events::{
    BranchOrTag, Event, EventAction, EventScope, EventSubject, FlatEvent, PullRequest,
    PullRequestLabel, Push,
};
use crate::runtime::RetryConfig;
use crate::types::{
    Changes, Commit, EventId, MessageProvider, PrNumber, ProviderInfo, PullRequestRef,
    RepoProvider, Repository, Sha,
};

// ─── Recording mock ───

/// One recorded activity invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ProviderInfo,
    AllBranches,
    DetectChanges { target_branch: String },
    CloneUrl,
    StaleBranch { branch: String },
    LinesExceeded { branch: String, delta: u64, threshold: u64 },
    MergeConflict { branch: String, sha: String },
    Clone { branch: String, path: PathBuf },
    Fetch { default_branch: String },
    Rebase { commit: Sha },
    Push { branch: String, force: bool },
    Remove { path: PathBuf },
    SaveEvent { id: EventId, parent: Option<EventId>, scope: EventScope },
    Process { number: PrNumber },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Mutex<Vec<Call>>,
    branches: Mutex<Vec<String>>,
    delta: AtomicU64,
    /// Exit code and stderr the mock rebase reports.
    rebase: Mutex<(i32, String)>,
    /// Remaining failures per pull request number.
    failures: Mutex<HashMap<u64, u32>>,
    no_message_provider: AtomicBool,
}

/// Activity set that records every call and answers from configuration.
///
/// Clones share state, so a test keeps one clone to inspect what the
/// runtime's copy did.
#[derive(Debug, Clone, Default)]
pub struct MockActivities {
    state: Arc<MockState>,
}

impl MockActivities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branches(self, branches: &[&str]) -> Self {
        *self.state.branches.lock().unwrap() = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_delta(self, delta: u64) -> Self {
        self.state.delta.store(delta, Ordering::SeqCst);
        self
    }

    /// Makes every rebase exit with `code` and `stderr`.
    pub fn with_rebase_output(self, code: i32, stderr: &str) -> Self {
        *self.state.rebase.lock().unwrap() = (code, stderr.to_string());
        self
    }

    /// Fails processing of `number` the next `times` attempts.
    pub fn failing_pr(self, number: u64, times: u32) -> Self {
        self.state.failures.lock().unwrap().insert(number, times);
        self
    }

    pub fn without_message_provider(self) -> Self {
        self.state.no_message_provider.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn processed(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Process { number } => Some(number.0),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(call);
    }
}

impl RepoIo for MockActivities {
    async fn provider_info(&self, repo: &Repository) -> Result<ProviderInfo> {
        self.record(Call::ProviderInfo);
        Ok(ProviderInfo {
            repo_name: "widgets".to_string(),
            owner: "acme".to_string(),
            default_branch: repo.default_branch.clone(),
            provider_id: repo.provider_id.clone(),
            installation_id: "install-1".to_string(),
        })
    }

    async fn all_branches(&self, _info: &ProviderInfo) -> Result<Vec<String>> {
        self.record(Call::AllBranches);
        Ok(self.state.branches.lock().unwrap().clone())
    }

    async fn detect_changes(&self, payload: &DetectChangesPayload) -> Result<Changes> {
        self.record(Call::DetectChanges {
            target_branch: payload.target_branch.clone(),
        });
        let delta = self.state.delta.load(Ordering::SeqCst);
        Ok(Changes {
            added: delta,
            removed: 0,
            modified: vec!["src/lib.rs".to_string()],
            delta,
            compare_url: format!("https://example.test/compare/{}", payload.target_branch),
            repo_url: "https://example.test/acme/widgets".to_string(),
        })
    }

    async fn tokenized_clone_url(&self, _info: &ProviderInfo) -> Result<String> {
        self.record(Call::CloneUrl);
        Ok("https://token@example.test/acme/widgets.git".to_string())
    }
}

impl MessageIo for MockActivities {
    async fn send_stale_branch(&self, msg: &StaleBranchMessage) -> Result<()> {
        self.record(Call::StaleBranch {
            branch: msg.payload.branch_name.clone(),
        });
        Ok(())
    }

    async fn send_lines_exceeded(&self, msg: &LinesExceededMessage) -> Result<()> {
        self.record(Call::LinesExceeded {
            branch: msg.payload.branch_name.clone(),
            delta: msg.changes.delta,
            threshold: msg.threshold,
        });
        Ok(())
    }

    async fn send_merge_conflict(&self, msg: &MergeConflictMessage) -> Result<()> {
        self.record(Call::MergeConflict {
            branch: msg.payload.branch_name.clone(),
            sha: msg.sha.clone(),
        });
        Ok(())
    }
}

impl GitIo for MockActivities {
    async fn clone_branch(&self, payload: &ClonePayload) -> Result<()> {
        self.record(Call::Clone {
            branch: payload.branch.clone(),
            path: payload.path.clone(),
        });
        std::fs::create_dir_all(&payload.path)?;
        std::fs::write(payload.path.join("README.md"), b"checkout")?;
        Ok(())
    }

    async fn fetch_branch(&self, _path: &Path, default_branch: &str) -> Result<()> {
        self.record(Call::Fetch {
            default_branch: default_branch.to_string(),
        });
        Ok(())
    }

    async fn rebase_at_commit(&self, _path: &Path, commit: &Sha) -> Result<()> {
        self.record(Call::Rebase {
            commit: commit.clone(),
        });
        let (code, stderr) = self.state.rebase.lock().unwrap().clone();
        classify_rebase(Some(code), "", &stderr)
    }

    async fn push_branch(&self, _path: &Path, branch: &str, force: bool) -> Result<()> {
        self.record(Call::Push {
            branch: branch.to_string(),
            force,
        });
        Ok(())
    }

    async fn remove_cloned(&self, path: &Path) -> Result<()> {
        self.record(Call::Remove {
            path: path.to_path_buf(),
        });
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl EventStore for MockActivities {
    async fn save_event(&self, event: &FlatEvent) -> Result<()> {
        self.record(Call::SaveEvent {
            id: event.id,
            parent: event.parent_id,
            scope: event.scope,
        });
        Ok(())
    }
}

impl PrProcessor for MockActivities {
    async fn process(&self, _repo: &Repository, pr: &PullRequestRef) -> Result<()> {
        self.record(Call::Process { number: pr.number });
        let mut failures = self.state.failures.lock().unwrap();
        match failures.get_mut(&pr.number.0) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ActivityError::Permanent(format!("checks failed for {}", pr.number)))
            }
            _ => Ok(()),
        }
    }
}

impl Activities for MockActivities {
    type Repo = Self;
    type Message = Self;
    type Git = Self;
    type Events = Self;
    type Processor = Self;

    fn repo_io(&self, _provider: RepoProvider) -> std::result::Result<&Self, RegistryError> {
        Ok(self)
    }

    fn message_io(&self, provider: MessageProvider) -> std::result::Result<&Self, RegistryError> {
        if self.state.no_message_provider.load(Ordering::SeqCst) {
            Err(RegistryError::MessageProvider(provider))
        } else {
            Ok(self)
        }
    }

    fn git(&self) -> &Self {
        self
    }

    fn events(&self) -> &Self {
        self
    }

    fn processor(&self) -> &Self {
        self
    }
}

// ─── Builders ───

/// Repository with default branch `main` and threshold 100.
pub fn test_repo() -> Repository {
    Repository::new(RepoProvider::Github, "42", "main").with_threshold(100)
}

/// Fast configuration: no retries, clones under `clone_root`.
pub fn test_config(clone_root: &Path) -> Config {
    Config::new()
        .with_retry(RetryConfig::NONE)
        .with_activity_timeout(Duration::from_secs(5))
        .with_child_timeout(Duration::from_secs(5))
        .with_clone_root(clone_root)
}

pub fn commit(sha: &str, author: &str) -> Commit {
    Commit {
        sha: Sha::new(sha),
        message: format!("commit {sha}"),
        author: author.to_string(),
        url: format!("https://example.test/commit/{sha}"),
        timestamp: Utc::now(),
    }
}

pub fn push_event(repo: &Repository, branch: &str, after: &str) -> Event<Push> {
    Event::new(
        repo.provider,
        EventSubject::repo(repo.id),
        EventScope::Push,
        EventAction::Created,
        Push {
            git_ref: format!("refs/heads/{branch}"),
            before: Sha::new("0".repeat(40)),
            after: Sha::new(after),
            repository: "acme/widgets".to_string(),
            sender_id: 1,
            commits: vec![commit(after, "alice")],
            timestamp: Utc::now(),
        },
    )
}

pub fn branch_event(repo: &Repository, branch: &str, action: EventAction) -> Event<BranchOrTag> {
    Event::new(
        repo.provider,
        EventSubject::repo(repo.id),
        EventScope::Branch,
        action,
        BranchOrTag::branch(branch),
    )
}

pub fn pr_event(
    repo: &Repository,
    number: u64,
    head: &str,
    base: &str,
    action: EventAction,
) -> Event<PullRequest> {
    Event::new(
        repo.provider,
        EventSubject::repo(repo.id),
        EventScope::PullRequest,
        action,
        PullRequest {
            number: PrNumber(number),
            title: format!("PR {number}"),
            body: String::new(),
            state: "open".to_string(),
            merge_commit_sha: None,
            author_id: 7,
            head_branch: head.to_string(),
            base_branch: base.to_string(),
            timestamp: Utc::now(),
        },
    )
}

pub fn label_event(repo: &Repository, number: u64, branch: &str, label: &str) -> Event<PullRequestLabel> {
    Event::new(
        repo.provider,
        EventSubject::repo(repo.id),
        EventScope::PullRequestLabel,
        EventAction::Added,
        PullRequestLabel {
            name: label.to_string(),
            pull_request_number: PrNumber(number),
            branch: branch.to_string(),
            timestamp: Utc::now(),
        },
    )
}

/// Polls `cond` until it holds, for at most five seconds.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
