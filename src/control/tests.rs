//! Behavioral tests for the controllers.
//!
//! Handlers are driven directly where the outcome is synchronous, and through
//! the runtime where the behavior spans several control processes.

use std::time::Duration;

use proptest::prelude::*;
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{ACTIVITY_WEIGHT, BaseControl, CHILD_WEIGHT};
use super::{
    BranchController, ControlArgs, ControlError, ControlKind, Exit, QueueController,
    RepoController, Signal, THRESHOLD_REASON, TrunkController,
};
use crate::config::Config;
use crate::events::{EventAction, EventScope};
use crate::queue::{QueueMember, QueueSet, SerializedQueues};
use crate::runtime::{ControlMessage, Runtime};
use crate::test_utils::{
    Call, MockActivities, branch_event, eventually, label_event, pr_event, push_event,
    test_config, test_repo,
};
use crate::types::{ControlId, PrNumber, PullRequestRef, Repository};

// ─── Test Helpers ───

fn runtime(mock: &MockActivities, config: Config) -> Runtime<MockActivities> {
    Runtime::new(mock.clone(), config).unwrap()
}

fn queued(numbers: &[u64]) -> SerializedQueues {
    let mut queues = QueueSet::new();
    for &n in numbers {
        queues.push(PullRequestRef::new(n, format!("feature-{n}"), "main"), false).unwrap();
    }
    queues.serialize()
}

fn member(number: u64, position: usize) -> QueueMember {
    QueueMember {
        pr: PullRequestRef::new(number, format!("feature-{number}"), "main"),
        position,
    }
}

fn order(members: &[QueueMember]) -> Vec<u64> {
    let mut members = members.to_vec();
    members.sort_by_key(|m| m.position);
    members.into_iter().map(|m| m.pr.number.0).collect()
}

fn primary_order(snapshot: &SerializedQueues) -> Vec<u64> {
    order(&snapshot.primary)
}

fn branch_args(repo: &Repository, branch: &str) -> ControlArgs {
    ControlArgs::Branch {
        repo: repo.clone(),
        branch: branch.to_string(),
        snapshot: None,
    }
}

async fn wait_running(runtime: &Runtime<MockActivities>, id: &ControlId) -> bool {
    for _ in 0..500 {
        if runtime.is_running(id).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_stopped(runtime: &Runtime<MockActivities>, id: &ControlId) -> bool {
    for _ in 0..500 {
        if !runtime.is_running(id).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ─── Mutation counter ───

proptest! {
    #[test]
    fn checkpoint_due_once_weighted_count_reaches_threshold(
        steps in prop::collection::vec(prop::bool::ANY, 0..800)
    ) {
        let dir = tempdir().unwrap();
        let rt = runtime(&MockActivities::new(), test_config(dir.path()));
        let base = BaseControl::new(rt, ControlKind::Branch, test_repo(), "feature-1");

        let mut expected = 0u64;
        for activity in steps {
            let weight = if activity { ACTIVITY_WEIGHT } else { CHILD_WEIGHT };
            base.increment(weight);
            expected += weight;
            prop_assert_eq!(base.counter(), expected);
            prop_assert_eq!(base.needs_checkpoint(), expected >= 4000);
        }
    }
}

#[test]
fn branch_set_skips_default_and_empty_names() {
    let dir = tempdir().unwrap();
    let rt = runtime(&MockActivities::new(), test_config(dir.path()));
    let base = BaseControl::new(rt, ControlKind::Trunk, test_repo(), "main");

    assert!(base.add_branch("feature-1"));
    assert!(!base.add_branch("feature-1"));
    assert!(!base.add_branch("main"));
    assert!(!base.add_branch(""));
    assert_eq!(base.branches(), vec!["feature-1"]);

    base.set_branches(["main".to_string(), "b".to_string(), "a".to_string()]);
    assert_eq!(base.branches(), vec!["a", "b"]);
    assert!(base.remove_branch("a"));
    assert!(!base.has_branch("a"));
}

// ─── Branch: line threshold ───

#[tokio::test]
async fn push_over_threshold_warns_once_and_persists_event() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_delta(150);
    let repo = test_repo();
    let ctl = BranchController::new(
        runtime(&mock, test_config(dir.path())),
        repo.clone(),
        "feature-1",
        Default::default(),
    );

    ctl.handle(Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await
        .unwrap();

    let warnings: Vec<_> = mock
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::LinesExceeded { .. }))
        .collect();
    assert_eq!(
        warnings,
        vec![Call::LinesExceeded {
            branch: "feature-1".to_string(),
            delta: 150,
            threshold: 100,
        }]
    );
    assert_eq!(mock.count(|c| matches!(c, Call::StaleBranch { .. })), 0);
    assert_eq!(
        mock.count(|c| matches!(c, Call::SaveEvent { scope: EventScope::Push, .. })),
        1
    );
    assert_eq!(
        ctl.snapshot().last_commit.map(|c| c.sha.0),
        Some("abc1234".to_string())
    );
}

#[tokio::test]
async fn push_under_threshold_is_quiet() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_delta(80);
    let repo = test_repo();
    let ctl = BranchController::new(
        runtime(&mock, test_config(dir.path())),
        repo.clone(),
        "feature-1",
        Default::default(),
    );

    ctl.handle(Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await
        .unwrap();

    assert_eq!(
        mock.count(|c| matches!(c, Call::DetectChanges { target_branch } if target_branch == "feature-1")),
        1
    );
    assert_eq!(mock.count(|c| matches!(c, Call::LinesExceeded { .. })), 0);
    assert_eq!(mock.count(|c| matches!(c, Call::SaveEvent { .. })), 0);
}

#[tokio::test]
async fn missing_message_provider_is_a_registry_error() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new()
        .with_delta(150)
        .without_message_provider();
    let repo = test_repo();
    let ctl = BranchController::new(
        runtime(&mock, test_config(dir.path())),
        repo.clone(),
        "feature-1",
        Default::default(),
    );

    let result = ctl
        .handle(Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await;
    assert!(matches!(result, Err(ControlError::Registry(_))));
    assert!(ctl.base().absorb("push", result).is_err());
}

// ─── Branch: rebase ───

#[tokio::test]
async fn rebase_conflict_warns_and_skips_push() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_rebase_output(1, "Could not apply 1a2b3c4... fix typo");
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let slots = rt.sessions().available();
    let ctl = BranchController::new(rt.clone(), repo.clone(), "feature-1", Default::default());

    ctl.handle(Signal::Rebase(push_event(&repo, "main", "fedcba9876")))
        .await
        .unwrap();

    let conflicts: Vec<_> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::MergeConflict { branch, sha } => Some((branch, sha)),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].0, "feature-1");
    assert!(conflicts[0].1.starts_with("1a2b3c"));
    assert_eq!(mock.count(|c| matches!(c, Call::Push { .. })), 0);

    let cloned: Vec<_> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Clone { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(cloned.len(), 1);
    assert!(mock.calls().contains(&Call::Remove { path: cloned[0].clone() }));
    assert!(!cloned[0].exists());
    assert_eq!(rt.sessions().available(), slots);
}

#[tokio::test]
async fn clean_rebase_force_pushes_and_cleans_up() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let ctl = BranchController::new(
        runtime(&mock, test_config(dir.path())),
        repo.clone(),
        "feature-1",
        Default::default(),
    );

    ctl.handle(Signal::Rebase(push_event(&repo, "main", "fedcba9876")))
        .await
        .unwrap();

    let calls = mock.calls();
    assert!(calls.contains(&Call::Fetch {
        default_branch: "main".to_string()
    }));
    assert!(calls.contains(&Call::Push {
        branch: "feature-1".to_string(),
        force: true
    }));
    assert_eq!(mock.count(|c| matches!(c, Call::Remove { .. })), 1);
    assert_eq!(mock.count(|c| matches!(c, Call::MergeConflict { .. })), 0);
}

#[tokio::test]
async fn rebase_in_progress_only_logs() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_rebase_output(128, "fatal: It seems that there is already a rebase-merge directory");
    let repo = test_repo();
    let ctl = BranchController::new(
        runtime(&mock, test_config(dir.path())),
        repo.clone(),
        "feature-1",
        Default::default(),
    );

    ctl.handle(Signal::Rebase(push_event(&repo, "main", "fedcba9876")))
        .await
        .unwrap();

    assert_eq!(mock.count(|c| matches!(c, Call::MergeConflict { .. })), 0);
    assert_eq!(mock.count(|c| matches!(c, Call::Push { .. })), 0);
    assert_eq!(mock.count(|c| matches!(c, Call::Remove { .. })), 1);
}

// ─── Branch: pull requests and labels ───

#[tokio::test]
async fn opened_pull_request_is_processed_once() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let args = branch_args(&repo, "feature-1");

    rt.signal_with_start(
        args.clone(),
        Signal::PullRequest(pr_event(&repo, 9, "feature-1", "main", EventAction::Created)),
    )
    .await
    .unwrap();
    assert!(eventually(|| mock.processed() == vec![9]).await);

    rt.signal_with_start(
        args,
        Signal::PullRequest(pr_event(&repo, 9, "feature-1", "main", EventAction::Reopened)),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.processed(), vec![9]);

    rt.shutdown_all().await;
}

#[tokio::test]
async fn queue_labels_route_to_base_branch_queue() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let ctl = BranchController::new(rt.clone(), repo.clone(), "feature-1", Default::default());
    let queue_id = ControlId::queue(repo.id, "main");

    ctl.handle(Signal::PullRequestLabel(label_event(&repo, 9, "feature-1", "bug")))
        .await
        .unwrap();
    assert!(!rt.is_running(&queue_id).await);

    ctl.handle(Signal::PullRequestLabel(label_event(&repo, 9, "feature-1", "priority-qmerge")))
        .await
        .unwrap();
    assert!(rt.is_running(&queue_id).await);
    assert!(eventually(|| mock.processed() == vec![9]).await);

    rt.shutdown_all().await;
}

// ─── Queue ───

#[tokio::test]
async fn failed_pull_request_moves_to_primary_tail() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().failing_pr(5, 1);
    let repo = test_repo();
    let ctl = QueueController::new(
        runtime(&mock, test_config(dir.path())),
        repo,
        "main",
        SerializedQueues::default(),
    );

    ctl.handle(Signal::QueueAdd(PullRequestRef::new(6, "feature-6", "main")));
    ctl.handle(Signal::QueueAdd(PullRequestRef::new(7, "feature-7", "main")));
    ctl.process(PullRequestRef::new(5, "feature-5", "main")).await;

    assert_eq!(primary_order(&ctl.snapshot()), vec![6, 7, 5]);
    assert_eq!(ctl.base().counter(), CHILD_WEIGHT);
}

#[tokio::test]
async fn queue_keeps_processing_after_a_failure() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().failing_pr(5, 1);
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));

    rt.start(ControlArgs::Queue {
        repo: repo.clone(),
        branch: "main".to_string(),
        queues: queued(&[5, 6, 7]),
    })
    .await
    .unwrap();

    assert!(eventually(|| mock.processed() == vec![5, 6, 7, 5]).await);
    rt.shutdown_all().await;
}

#[tokio::test]
async fn promote_and_demote_reorder_primary_queue() {
    let dir = tempdir().unwrap();
    let ctl = QueueController::new(
        runtime(&MockActivities::new(), test_config(dir.path())),
        test_repo(),
        "main",
        queued(&[1, 2, 3, 4]),
    );

    ctl.handle(Signal::QueuePromote(PrNumber(4)));
    assert_eq!(primary_order(&ctl.snapshot()), vec![1, 2, 4, 3]);

    ctl.handle(Signal::QueueDemote(PrNumber(1)));
    assert_eq!(primary_order(&ctl.snapshot()), vec![2, 1, 4, 3]);

    ctl.handle(Signal::QueuePromote(PrNumber(42)));
    ctl.handle(Signal::QueueDemote(PrNumber(42)));
    assert_eq!(primary_order(&ctl.snapshot()), vec![2, 1, 4, 3]);

    ctl.handle(Signal::QueueRemove(PrNumber(4)));
    assert_eq!(primary_order(&ctl.snapshot()), vec![2, 1, 3]);
}

#[tokio::test]
async fn queue_rejects_other_base_and_duplicates() {
    let dir = tempdir().unwrap();
    let ctl = QueueController::new(
        runtime(&MockActivities::new(), test_config(dir.path())),
        test_repo(),
        "main",
        SerializedQueues::default(),
    );

    ctl.handle(Signal::QueueAdd(PullRequestRef::new(3, "feature-3", "release")));
    assert!(ctl.snapshot().is_empty());

    ctl.handle(Signal::QueueAdd(PullRequestRef::new(4, "feature-4", "main")));
    ctl.handle(Signal::QueueAdd(PullRequestRef::new(4, "feature-4", "main")));
    assert_eq!(primary_order(&ctl.snapshot()), vec![4]);

    // Urgent add moves it; a later plain add is a duplicate.
    ctl.handle(Signal::QueueAddPriority(PullRequestRef::new(4, "feature-4", "main")));
    ctl.handle(Signal::QueueAdd(PullRequestRef::new(4, "feature-4", "main")));
    let snapshot = ctl.snapshot();
    assert!(snapshot.primary.is_empty());
    assert_eq!(snapshot.priority.len(), 1);
}

#[tokio::test]
async fn threshold_checkpoint_keeps_remaining_queue_order() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let config = test_config(&dir.path().join("clones"))
        .with_state_dir(dir.path().join("state"))
        .with_checkpoint_threshold(CHILD_WEIGHT);
    let rt = runtime(&mock, config);

    let mut queues = QueueSet::new();
    for n in [1, 2, 3] {
        queues.push(PullRequestRef::new(n, format!("feature-{n}"), "main"), false).unwrap();
    }
    for n in [4, 5] {
        queues.push(PullRequestRef::new(n, format!("feature-{n}"), "main"), true).unwrap();
    }

    // The sender stays alive so the inbox never reports closed.
    let (_tx, mut rx) = mpsc::channel::<ControlMessage>(8);
    let ctl = QueueController::new(rt.clone(), repo.clone(), "main", queues.serialize());
    let args = match ctl.run(&mut rx, CancellationToken::new()).await.unwrap() {
        Exit::Checkpoint { reason, args } => {
            assert_eq!(reason, THRESHOLD_REASON);
            args
        }
        other => panic!("unexpected exit: {other:?}"),
    };
    assert_eq!(mock.processed(), vec![4]);

    let store = rt.checkpoints().unwrap().clone();
    store.save(THRESHOLD_REASON, &args).unwrap();
    let saved = match store.load(&args.control_id()).unwrap() {
        Some(ControlArgs::Queue { queues, .. }) => queues,
        other => panic!("unexpected checkpoint: {other:?}"),
    };
    assert_eq!(order(&saved.priority), vec![5]);
    assert_eq!(order(&saved.primary), vec![1, 2, 3]);

    let resumed = QueueController::new(rt, repo, "main", saved);
    let exit = resumed.run(&mut rx, CancellationToken::new()).await.unwrap();
    assert!(matches!(exit, Exit::Checkpoint { .. }));
    assert_eq!(mock.processed(), vec![4, 5]);
}

#[tokio::test]
async fn invalid_queue_checkpoint_rebuilds_with_priority_winning() {
    let dir = tempdir().unwrap();
    let serialized = SerializedQueues {
        primary: vec![member(1, 1), member(4, 2), member(2, 3)],
        priority: vec![member(4, 1)],
    };
    assert!(QueueSet::deserialize(serialized.clone()).is_err());

    let ctl = QueueController::new(
        runtime(&MockActivities::new(), test_config(dir.path())),
        test_repo(),
        "main",
        serialized,
    );

    let snapshot = ctl.snapshot();
    assert_eq!(order(&snapshot.priority), vec![4]);
    assert_eq!(order(&snapshot.primary), vec![1, 2]);
}

// ─── Routing ───

#[tokio::test]
async fn repository_routes_queue_signals_to_branch_queues() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let repo_args = ControlArgs::Repo { repo: repo.clone() };

    // Adds follow the pull request's base branch.
    rt.signal_with_start(
        repo_args.clone(),
        Signal::QueueAdd(PullRequestRef::new(9, "feature-9", "release")),
    )
    .await
    .unwrap();
    assert!(eventually(|| mock.processed() == vec![9]).await);
    assert!(rt.is_running(&ControlId::queue(repo.id, "release")).await);
    assert!(!rt.is_running(&ControlId::queue(repo.id, "main")).await);

    // Number-only signals go to the default branch's queue.
    rt.signal_with_start(repo_args, Signal::QueueRemove(PrNumber(9)))
        .await
        .unwrap();
    assert!(wait_running(&rt, &ControlId::queue(repo.id, "main")).await);

    rt.shutdown_all().await;
}

#[tokio::test]
async fn repository_routes_pushes_by_branch() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let repo_args = ControlArgs::Repo { repo: repo.clone() };

    rt.signal_with_start(repo_args.clone(), Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await
        .unwrap();
    assert!(
        eventually(|| mock.count(|c| matches!(c, Call::DetectChanges { target_branch } if target_branch == "feature-1")) == 1)
            .await
    );
    assert!(rt.is_running(&ControlId::branch(repo.id, "feature-1")).await);
    assert!(!rt.is_running(&ControlId::trunk(repo.id)).await);

    rt.signal_with_start(repo_args, Signal::Push(push_event(&repo, "main", "def5678")))
        .await
        .unwrap();
    assert!(eventually(|| mock.count(|c| *c == Call::AllBranches) == 1).await);
    assert!(rt.is_running(&ControlId::trunk(repo.id)).await);

    rt.shutdown_all().await;
}

#[tokio::test]
async fn push_inherits_branch_creation_as_parent() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_delta(150);
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let mut ctl = RepoController::new(rt.clone(), repo.clone());

    let created = branch_event(&repo, "feature-1", EventAction::Created);
    let created_id = created.id();
    ctl.handle(Signal::CreateOrDelete(created)).await.unwrap();
    assert!(ctl.base().has_branch("feature-1"));

    ctl.handle(Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await
        .unwrap();
    assert!(
        eventually(|| {
            mock.count(|c| {
                matches!(c, Call::SaveEvent { parent: Some(p), scope: EventScope::Push, .. } if *p == created_id)
            }) == 1
        })
        .await
    );

    rt.shutdown_all().await;
}

#[tokio::test]
async fn trunk_push_rebases_every_feature_branch() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new().with_branches(&["main", "feature-1", "feature-2"]);
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));

    rt.signal_with_start(
        ControlArgs::Trunk { repo: repo.clone() },
        Signal::Push(push_event(&repo, "main", "fedcba9876")),
    )
    .await
    .unwrap();

    assert!(eventually(|| mock.count(|c| matches!(c, Call::Push { force: true, .. })) == 2).await);
    let mut rebased: Vec<_> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Clone { branch, .. } => Some(branch),
            _ => None,
        })
        .collect();
    rebased.sort();
    assert_eq!(rebased, vec!["feature-1", "feature-2"]);

    rt.shutdown_all().await;
}

#[tokio::test]
async fn trunk_tracks_branch_creation_and_deletion() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let ctl = TrunkController::new(runtime(&mock, test_config(dir.path())), repo.clone());

    ctl.handle(Signal::CreateOrDelete(branch_event(&repo, "feature-9", EventAction::Created)))
        .await
        .unwrap();
    assert_eq!(ctl.base().branches(), vec!["feature-9"]);

    ctl.handle(Signal::CreateOrDelete(branch_event(&repo, "feature-9", EventAction::Deleted)))
        .await
        .unwrap();
    assert!(ctl.base().branches().is_empty());
}

// ─── Stale branches ───

#[tokio::test(start_paused = true)]
async fn quiet_branch_gets_stale_warning() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo().with_stale_duration(Duration::from_secs(60));
    let rt = runtime(&mock, test_config(dir.path()));

    rt.signal_with_start(
        branch_args(&repo, "feature-1"),
        Signal::Push(push_event(&repo, "feature-1", "abc1234")),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(mock.count(|c| matches!(c, Call::StaleBranch { .. })), 0);

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(eventually(|| mock.count(|c| matches!(c, Call::StaleBranch { .. })) >= 1).await);

    rt.shutdown_all().await;
}

// ─── Checkpoints ───

#[tokio::test]
async fn threshold_checkpoint_carries_branch_state() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let config = test_config(&dir.path().join("clones"))
        .with_state_dir(dir.path().join("state"))
        .with_checkpoint_threshold(25);
    let rt = runtime(&mock, config);
    let args = branch_args(&repo, "feature-1");
    let id = args.control_id();

    rt.signal_with_start(args.clone(), Signal::Push(push_event(&repo, "feature-1", "1111111")))
        .await
        .unwrap();
    rt.signal_with_start(args.clone(), Signal::Push(push_event(&repo, "feature-1", "2222222")))
        .await
        .unwrap();

    let store = rt.checkpoints().unwrap().clone();
    assert!(eventually(|| store.path_for(&id).exists()).await);
    match store.load(&id).unwrap() {
        Some(ControlArgs::Branch { snapshot: Some(snapshot), .. }) => {
            assert_eq!(snapshot.last_commit.map(|c| c.sha.0), Some("2222222".to_string()));
        }
        other => panic!("unexpected checkpoint: {other:?}"),
    }
    assert!(rt.is_running(&id).await);

    rt.signal_with_start(
        args,
        Signal::CreateOrDelete(branch_event(&repo, "feature-1", EventAction::Deleted)),
    )
    .await
    .unwrap();
    assert!(wait_stopped(&rt, &id).await);
    assert!(!store.path_for(&id).exists());
}

#[tokio::test]
async fn shutdown_checkpoints_and_resume_restarts() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let config = test_config(&dir.path().join("clones")).with_state_dir(dir.path().join("state"));
    let args = branch_args(&repo, "feature-1");
    let id = args.control_id();

    let rt = runtime(&mock, config.clone());
    rt.signal_with_start(args, Signal::Push(push_event(&repo, "feature-1", "abc1234")))
        .await
        .unwrap();
    assert!(eventually(|| mock.count(|c| matches!(c, Call::DetectChanges { .. })) == 1).await);
    rt.shutdown_all().await;
    assert!(rt.checkpoints().unwrap().path_for(&id).exists());
    assert_eq!(rt.control_count().await, 0);

    let resumed = runtime(&mock, config);
    assert_eq!(resumed.resume_all().await.unwrap(), 1);
    assert!(resumed.is_running(&id).await);
    resumed.shutdown_all().await;
}

#[tokio::test]
async fn queue_checkpoints_after_each_child_and_resumes_in_order() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let config = test_config(&dir.path().join("clones"))
        .with_state_dir(dir.path().join("state"))
        .with_checkpoint_threshold(CHILD_WEIGHT);
    let rt = runtime(&mock, config);
    let args = ControlArgs::Queue {
        repo: repo.clone(),
        branch: "main".to_string(),
        queues: queued(&[1, 2, 3]),
    };
    let id = args.control_id();

    rt.start(args).await.unwrap();
    assert!(eventually(|| mock.processed() == vec![1, 2, 3]).await);

    let store = rt.checkpoints().unwrap().clone();
    assert!(
        eventually(|| matches!(
            store.load(&id),
            Ok(Some(ControlArgs::Queue { queues, .. })) if queues.is_empty()
        ))
        .await
    );
    assert!(rt.is_running(&id).await);

    rt.shutdown_all().await;
}

// ─── Redelivery ───

#[tokio::test]
async fn signals_behind_a_deletion_reach_a_fresh_branch_process() {
    let dir = tempdir().unwrap();
    let mock = MockActivities::new();
    let repo = test_repo();
    let rt = runtime(&mock, test_config(dir.path()));
    let args = branch_args(&repo, "feature-1");
    let detected = || {
        mock.count(|c| matches!(c, Call::DetectChanges { target_branch } if target_branch == "feature-1"))
    };

    rt.signal_with_start(args.clone(), Signal::Push(push_event(&repo, "feature-1", "1111111")))
        .await
        .unwrap();
    assert!(eventually(|| detected() == 1).await);

    // Sent back to back, so the creation and push queue behind the deletion.
    for signal in [
        Signal::CreateOrDelete(branch_event(&repo, "feature-1", EventAction::Deleted)),
        Signal::CreateOrDelete(branch_event(&repo, "feature-1", EventAction::Created)),
        Signal::Push(push_event(&repo, "feature-1", "2222222")),
    ] {
        rt.signal_with_start(args.clone(), signal).await.unwrap();
    }

    assert!(eventually(|| detected() == 2).await);
    assert!(rt.is_running(&args.control_id()).await);

    rt.shutdown_all().await;
}
