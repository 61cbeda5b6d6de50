mod decision;
mod digest;
mod error;
mod metadata;
mod preferences;
mod query;
mod remote;
mod render;
mod session;
mod store;
mod transcript;
mod types;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use query::QueryService;
use session::Session;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use store::SnapshotStore;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use types::HookInput;

const LOG_ENV: &str = "CONTEXT_KEEPER_LOG";

/// Snapshot a Claude Code session before compaction and restore it when the
/// next session starts.
///
/// Without a subcommand, reads one hook payload from stdin.
#[derive(Parser)]
#[command(name = "context-keeper", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct ProjectArg {
    /// Project whose snapshots to inspect.
    #[arg(long, default_value = ".")]
    project: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// List snapshots, newest first.
    List {
        #[command(flatten)]
        project: ProjectArg,
        /// Only sessions whose id starts with this prefix.
        #[arg(long)]
        session: Option<String>,
        /// One row per session instead of per snapshot.
        #[arg(long)]
        grouped: bool,
    },
    /// Print a snapshot as the context block a new session would receive.
    Load {
        #[command(flatten)]
        project: ProjectArg,
        /// Session id or timestamp prefix. Defaults to the most recent.
        id: Option<String>,
    },
    /// Find snapshots whose summary mentions a keyword.
    Search {
        #[command(flatten)]
        project: ProjectArg,
        keyword: String,
    },
    /// Aggregate counts over every snapshot.
    Stats {
        #[command(flatten)]
        project: ProjectArg,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .init();
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading hook input from stdin")?;
    Ok(buffer)
}

/// Handle one hook event. Returns what to print on stdout, if anything.
fn run_hook() -> Result<Option<String>> {
    let input = read_stdin()?;
    let hook_input: HookInput =
        serde_json::from_str(&input).context("parsing hook input")?;
    let common = hook_input.common();
    debug!(
        event = hook_input.event_name(),
        session = %common.session_id,
        permission_mode = common.permission_mode.as_deref().unwrap_or("default"),
        "hook received"
    );

    match &hook_input {
        HookInput::PreCompact(e) => Session::open(&e.common.cwd, &e.common.session_id)
            .and_then(|s| s.handle_pre_compact(e))
            .map(|()| None),
        HookInput::SessionStart(e) => {
            Session::open_for_restore(&e.common.cwd, &e.common.session_id)
                .handle_session_start(e)
        }
        HookInput::UserPromptSubmit(_) | HookInput::Stop(_) | HookInput::SessionEnd(_) => Ok(None),
    }
}

fn run_query(command: Command) -> Result<String> {
    match command {
        Command::List {
            project,
            session,
            grouped,
        } => {
            let store = SnapshotStore::for_project(&project.project);
            let q = QueryService::new(&store);
            if grouped {
                Ok(query::format_sessions(&q.sessions()))
            } else {
                Ok(query::format_list(&q.list(session.as_deref())))
            }
        }
        Command::Load { project, id } => {
            let store = SnapshotStore::for_project(&project.project);
            let outcome = QueryService::new(&store).load(id.as_deref())?;
            Ok(query::format_load(&outcome, id.as_deref()))
        }
        Command::Search { project, keyword } => {
            let store = SnapshotStore::for_project(&project.project);
            let hits = QueryService::new(&store).search(&keyword);
            Ok(query::format_search(&keyword, &hits))
        }
        Command::Stats { project } => {
            let store = SnapshotStore::for_project(&project.project);
            Ok(query::format_stats(&QueryService::new(&store).stats()))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Some(command) => run_query(command).map(Some),
        None => run_hook(),
    };

    match result {
        Ok(Some(output)) => print!("{}", output),
        Ok(None) => {}
        Err(err) => {
            eprintln!("context-keeper: {err:#}");
            process::exit(2);
        }
    }
}
