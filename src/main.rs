use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trunkline::activities::{
    AcknowledgeProcessor, CommitIdentity, FileEventStore, GitCli, Kernel, LocalRepoIo,
    LogMessageIo,
};
use trunkline::config::Config;
use trunkline::control::{ControlArgs, Signal};
use trunkline::runtime::{Runtime, RuntimeError};
use trunkline::types::{MessageProvider, Repository};

#[derive(Debug, Error)]
enum StartupError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid repository file {path}: {source}")]
    Repository {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trunkline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "trunkline failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env();
    let repo = load_repository()?;
    let url = std::env::var("TRUNKLINE_REPO_URL")
        .map_err(|_| StartupError::MissingEnv("TRUNKLINE_REPO_URL"))?;

    let work_dir = config.state_dir.clone().unwrap_or_else(|| config.clone_root.clone());
    let events_path = work_dir.join("events.jsonl");
    let events = FileEventStore::open(&events_path).map_err(|source| StartupError::Io {
        path: events_path,
        source,
    })?;
    let repo_io = LocalRepoIo::new(url, "local", &repo.provider_id, work_dir.join("mirror.git"));
    let kernel = Kernel::new(GitCli::new(CommitIdentity::default()), events, AcknowledgeProcessor)
        .with_repo_io(repo.provider, repo_io)
        .with_message_io(MessageProvider::Log, LogMessageIo);

    let runtime = Runtime::new(kernel, config)?;
    let resumed = runtime.resume_all().await?;
    info!(repo_id = %repo.id, resumed, "trunkline started, reading signals from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => deliver(&runtime, &repo, &line).await,
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            },
        }
    }

    runtime.shutdown_all().await;
    Ok(())
}

async fn deliver<A: trunkline::activities::Activities>(
    runtime: &Runtime<A>,
    repo: &Repository,
    line: &str,
) {
    let signal: Signal = match serde_json::from_str(line) {
        Ok(signal) => signal,
        Err(e) => {
            warn!(error = %e, "Skipping malformed signal");
            return;
        }
    };
    let args = ControlArgs::Repo { repo: repo.clone() };
    if let Err(e) = runtime.signal_with_start(args, signal).await {
        error!(error = %e, "Failed to deliver signal");
    }
}

fn load_repository() -> Result<Repository, StartupError> {
    let path: PathBuf = std::env::var("TRUNKLINE_REPO_FILE")
        .map_err(|_| StartupError::MissingEnv("TRUNKLINE_REPO_FILE"))?
        .into();
    let raw = std::fs::read_to_string(&path).map_err(|source| StartupError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StartupError::Repository { path, source })
}
