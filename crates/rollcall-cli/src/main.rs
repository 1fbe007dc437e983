//! Rollcall CLI - inspect and drive the offline sync queue
//!
//! Operator tooling for deployments: list what is stuck, retry or discard
//! failed actions, and run a one-shot drain against the API.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rollcall_sync::{
    ActionId, ActionKind, ActionQueue, AutoSyncDriver, ConnectivityMonitor, Database,
    DrainOutcome, HttpApiClient, HttpMethod, LibSqlActionQueue, PendingAction, StatusAggregator,
    SyncConfig,
};
use thiserror::Error;

const API_BASE_URL_ENV: &str = "ROLLCALL_API_BASE_URL";

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Inspect and drive the Rollcall offline sync queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local queue database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending/failed counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued actions in delivery order
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently confirmed actions
    Synced {
        /// Number of actions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset a failed action for another round of automatic delivery
    Retry {
        /// Action ID
        id: String,
    },
    /// Permanently discard a failed action
    Discard {
        /// Action ID
        id: String,
    },
    /// Run one drain pass against the API
    Drain {
        /// API base URL (defaults to ROLLCALL_API_BASE_URL)
        #[arg(long)]
        api_base_url: Option<String>,
    },
    /// Enqueue a test action (smoke-testing a deployment)
    Enqueue {
        /// Action kind (CLOCK_IN, CLOCK_OUT, CREATE_RECORD, UPDATE_RECORD, DELETE_RECORD)
        kind: String,
        /// Target endpoint path
        endpoint: String,
        /// HTTP method (POST, PUT, PATCH, DELETE)
        #[arg(long, default_value = "POST")]
        method: String,
        /// JSON request body
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] rollcall_sync::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid {0}: {1}")]
    InvalidArgument(&'static str, String),
    #[error(
        "No API base URL configured. Pass --api-base-url or set ROLLCALL_API_BASE_URL to enable `rollcall drain`."
    )]
    ApiNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rollcall=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Pending { json } => run_pending(json, &db_path).await?,
        Commands::Synced { limit, json } => run_synced(limit, json, &db_path).await?,
        Commands::Retry { id } => run_retry(&id, &db_path).await?,
        Commands::Discard { id } => run_discard(&id, &db_path).await?,
        Commands::Drain { api_base_url } => run_drain(api_base_url, &db_path).await?,
        Commands::Enqueue {
            kind,
            endpoint,
            method,
            payload,
        } => run_enqueue(&kind, &endpoint, &method, &payload, &db_path).await?,
    }

    Ok(())
}

async fn open_queue(db_path: &Path) -> Result<LibSqlActionQueue, CliError> {
    let db = Database::open(db_path).await?;
    Ok(LibSqlActionQueue::new(db.connection().clone()))
}

async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path).await?;
    let counts = queue.count_pending().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        println!("pending: {}", counts.total);
        println!("failed:  {}", counts.failed);
        for (kind, count) in &counts.by_kind {
            println!("  {kind}: {count}");
        }
    }

    Ok(())
}

async fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path).await?;
    let actions = queue.list_pending().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else if actions.is_empty() {
        println!("Queue is empty");
    } else {
        for action in &actions {
            println!("{}", format_action_line(action));
        }
    }

    Ok(())
}

async fn run_synced(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let queue = open_queue(db_path).await?;
    let synced = queue.list_recently_synced(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&synced)?);
    } else if synced.is_empty() {
        println!("No confirmed actions yet");
    } else {
        for action in &synced {
            println!(
                "{}  {}  {}  synced {}",
                action.id,
                action.kind,
                action.endpoint,
                format_timestamp(action.synced_at)
            );
        }
    }

    Ok(())
}

async fn run_retry(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_action_id(id)?;
    let queue = open_queue(db_path).await?;
    queue.retry(id).await?;
    println!("Action {id} reset for automatic delivery");
    Ok(())
}

async fn run_discard(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_action_id(id)?;
    let queue = open_queue(db_path).await?;
    queue.remove(id).await?;
    println!("Action {id} discarded");
    Ok(())
}

async fn run_drain(api_base_url: Option<String>, db_path: &Path) -> Result<(), CliError> {
    let base_url = api_base_url
        .or_else(|| env::var(API_BASE_URL_ENV).ok())
        .ok_or(CliError::ApiNotConfigured)?;

    let api = HttpApiClient::new(&base_url)
        .map_err(|error| CliError::InvalidArgument("API base URL", error.to_string()))?;
    let queue = open_queue(db_path).await?;

    let monitor = ConnectivityMonitor::new(false);
    let status = StatusAggregator::new(false);
    let driver = AutoSyncDriver::new(
        Arc::new(queue),
        Arc::new(api),
        monitor,
        status,
        SyncConfig::default(),
    );

    match driver.drain().await? {
        DrainOutcome::Idle => println!("Queue is empty"),
        DrainOutcome::Drained { delivered, skipped } => {
            println!("Delivered {delivered} action(s), skipped {skipped}");
        }
        DrainOutcome::Halted { delivered, backoff } => {
            println!(
                "Delivered {delivered} action(s), then halted on a transient failure \
                 (next automatic attempt after {backoff:?})"
            );
        }
        DrainOutcome::Conflict => println!("Another context is draining this queue"),
        DrainOutcome::Offline | DrainOutcome::AlreadyDraining => {
            println!("Drain not started");
        }
    }

    Ok(())
}

async fn run_enqueue(
    kind: &str,
    endpoint: &str,
    method: &str,
    payload: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let kind: ActionKind = kind
        .parse()
        .map_err(|error| CliError::InvalidArgument("action kind", error))?;
    let method: HttpMethod = method
        .parse()
        .map_err(|error| CliError::InvalidArgument("HTTP method", error))?;
    let payload: serde_json::Value = serde_json::from_str(payload)?;

    let queue = open_queue(db_path).await?;
    let action = queue.enqueue(kind, endpoint, method, payload).await?;

    println!("{}", action.id);
    Ok(())
}

fn parse_action_id(raw: &str) -> Result<ActionId, CliError> {
    raw.parse()
        .map_err(|_| CliError::InvalidArgument("action ID", raw.to_string()))
}

fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::data_local_dir()
            .map_or_else(|| PathBuf::from("rollcall-queue.db"), |dir| {
                dir.join("rollcall").join("queue.db")
            })
    })
}

fn format_action_line(action: &PendingAction) -> String {
    let error = action
        .last_error
        .as_deref()
        .map(|reason| format!("  [{reason}]"))
        .unwrap_or_default();

    format!(
        "{}  {}  {} {}  {}  attempts={}{}",
        action.id,
        action.status,
        action.method,
        action.endpoint,
        format_timestamp(action.created_at),
        action.attempts,
        error
    )
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
