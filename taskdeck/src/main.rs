//! `TaskDeck`: task list client with optimistic edits.
//!
//! Every command loads the list first (remote fetch merged with the local
//! overlay), applies its change optimistically, reports pending / success /
//! failure, and prints the resulting list. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! # List against the public demo API
//! cargo run --bin taskdeck -- list
//!
//! # Against a local stub server
//! cargo run --bin taskdeck-stub &
//! cargo run --bin taskdeck -- --api-url http://127.0.0.1:8080 add "buy milk"
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::auth::AuthStore;
use taskdeck::config::{CliArgs, ClientConfig, Command, parse_field};
use taskdeck::gateway::http::HttpGateway;
use taskdeck::gateway::{GatewayError, TaskGateway};
use taskdeck::session::TaskSession;
use taskdeck::storage::FileStore;
use taskdeck::tasks::{MutationEvent, MutationPhase, RefreshOutcome, TaskError};
use taskdeck_proto::task::{
    COMPLETED_FIELD, StatusFilter, TEXT_FIELD, Task, TaskDraft, TaskId, TaskPatch,
};
use taskdeck_proto::wire::LoginRequest;

/// Failures reported to the user with a non-zero exit status.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("{0}")]
    Task(#[from] TaskError),
    #[error("{0}")]
    Gateway(#[from] GatewayError),
    #[error("{0}")]
    Usage(String),
}

type Session = TaskSession<Arc<FileStore>, HttpGateway>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout carries command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let command = cli.command.unwrap_or(Command::List {
        status: "all".to_string(),
    });
    tracing::info!(?command, api_url = %config.api_url, "taskdeck starting");

    match run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CommandError> {
    let storage_path = config
        .storage_path
        .clone()
        .or_else(FileStore::default_path)
        .ok_or_else(|| CommandError::Usage("no storage path; pass --storage".into()))?;
    let store = Arc::new(FileStore::open(storage_path));
    let auth = AuthStore::new(Arc::clone(&store));
    let signed_in = auth.load();

    let gateway = HttpGateway::new(config.api_url.clone(), config.request_timeout)
        .with_credential(config.token.clone().or_else(|| auth.token()))
        .with_user_id(signed_in.user_id().unwrap_or(config.user_id));

    match command {
        Command::Login { username, password } => {
            let response = gateway
                .login(&LoginRequest { username, password })
                .await?;
            let state = auth.login_success(response);
            if let Some(user) = state.user {
                println!("signed in as {} (id {})", user.username, user.id);
            }
            return Ok(());
        }
        Command::Logout => {
            auth.logout();
            println!("signed out");
            return Ok(());
        }
        _ => {}
    }

    let (session, mut events) = TaskSession::new(store, gateway, config.session_settings());
    if let RefreshOutcome::Failed(e) = session.refresh().await {
        eprintln!("warning: could not load tasks ({e}); showing local changes only");
    }

    let filter = match command {
        Command::List { status } => status
            .parse::<StatusFilter>()
            .map_err(|e| CommandError::Usage(e.to_string()))?,
        Command::Add { text, fields } => {
            let mut draft = TaskDraft::new()
                .with(TEXT_FIELD, text)
                .with(COMPLETED_FIELD, false);
            for (key, value) in parse_fields(&fields)? {
                draft.insert(key, value);
            }
            let result = session.add_task(draft).await;
            report(&mut events);
            let task = result?;
            println!("added #{}", task.id);
            StatusFilter::All
        }
        Command::Update {
            id,
            fields,
            completed,
        } => {
            let mut patch = TaskPatch::new();
            for (key, value) in parse_fields(&fields)? {
                patch.insert(key, value);
            }
            if let Some(done) = completed {
                patch.insert(COMPLETED_FIELD, done);
            }
            if patch.is_empty() {
                return Err(CommandError::Usage(
                    "nothing to update; pass --field or --completed".into(),
                ));
            }
            let result = session.update_task(TaskId::new(id), patch).await;
            report(&mut events);
            result?;
            StatusFilter::All
        }
        Command::Delete { id } => {
            let result = session.delete_task(TaskId::new(id)).await;
            report(&mut events);
            result?;
            StatusFilter::All
        }
        Command::Login { .. } | Command::Logout => StatusFilter::All,
    };

    print_tasks(&session, filter);
    Ok(())
}

fn parse_fields(raw: &[String]) -> Result<Vec<(String, serde_json::Value)>, CommandError> {
    raw.iter()
        .map(|arg| {
            parse_field(arg)
                .ok_or_else(|| CommandError::Usage(format!("expected KEY=VALUE, got {arg:?}")))
        })
        .collect()
}

/// Prints the pending / success / failure notices emitted so far.
fn report(events: &mut mpsc::Receiver<MutationEvent>) {
    while let Ok(event) = events.try_recv() {
        match event.phase {
            MutationPhase::Pending => println!("{} #{}: pending", event.kind, event.task_id),
            MutationPhase::Committed => println!("{} #{}: saved", event.kind, event.task_id),
            MutationPhase::RolledBack { reason } => {
                println!("{} #{}: failed, reverted ({reason})", event.kind, event.task_id);
            }
        }
    }
}

fn print_tasks(session: &Session, filter: StatusFilter) {
    let tasks = session.get_tasks_filtered(filter);
    if tasks.is_empty() {
        println!("(no tasks)");
        return;
    }
    for task in &tasks {
        println!("{}", render(task));
    }
}

fn render(task: &Task) -> String {
    let mark = if task.completed() { 'x' } else { ' ' };
    format!(
        "[{mark}] #{:<5} {:<12} {}",
        task.id.get(),
        task.status().as_str(),
        task.text().unwrap_or("")
    )
}
