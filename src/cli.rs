//! Command-line surface. Per spec.md §6 ("the wrapper is external to this
//! core; the core only observes a project root and a session name"), every
//! subcommand boils down to resolving a project root and a control pane,
//! then handing off to [`crate::manager`] or [`crate::http`] — the same
//! entry points the HTTP API and a future TUI front-end would call.
//!
//! Grounded on `cli::run`'s `Cli`/`Commands` shape in the workmux lineage,
//! narrowed from its many worktree-lifecycle subcommands to the handful
//! this crate's core actually exposes; shell completions, sandbox profiles,
//! and the nerdfont prompt are lineage-only concerns with no counterpart
//! here (see DESIGN.md).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::action::callback::{spawn_sweeper, CallbackRegistry};
use crate::agent::AgentHarness;
use crate::http::{self, AppState};
use crate::manager::{self, CloseMode};
use crate::multiplexer::TmuxService;
use crate::state::StateStore;
use crate::worker::llm::LlmAnalyzer;
use crate::worker::supervisor;

#[derive(Parser)]
#[command(name = "dmux")]
#[command(author, version, about = "Session orchestrator for parallel AI coding agents")]
struct Cli {
    /// Project root. Defaults to the enclosing git repository's top level,
    /// or the current directory if this isn't a git checkout.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the long-lived session: file watcher, per-pane workers, callback
    /// sweeper, and the HTTP/SSE API, until interrupted.
    Serve {
        /// Port for the HTTP/SSE API.
        #[arg(long, default_value_t = 7800)]
        port: u16,

        /// Terminal pane new panes split off of. Defaults to `$TMUX_PANE`
        /// (the pane this command is itself running in).
        #[arg(long)]
        control_pane: Option<String>,
    },

    /// Create a new pane: split a terminal, add a worktree, launch an
    /// agent, optionally inject a prompt.
    Create {
        /// Initial prompt for the agent. Empty starts the agent idle.
        #[arg(default_value = "")]
        prompt: String,

        /// Agent to launch (e.g. `claude`, `codex`). Falls back to the
        /// project's configured default, then to autodetection.
        #[arg(long)]
        agent: Option<String>,

        /// Terminal pane to split the new pane off of. Defaults to
        /// `$TMUX_PANE`.
        #[arg(long)]
        control_pane: Option<String>,
    },

    /// Close a pane.
    Close {
        /// Pane id (as shown by `dmux list`).
        pane_id: String,

        /// How much to clean up alongside the terminal pane.
        #[arg(long, value_enum, default_value_t = CloseModeArg::KillOnly)]
        mode: CloseModeArg,

        /// Anchor for a replacement welcome pane if this closes the last
        /// live pane. Defaults to `$TMUX_PANE`.
        #[arg(long)]
        control_pane: Option<String>,
    },

    /// List panes in this project.
    List {
        /// Print as JSON instead of a text table.
        #[arg(long)]
        json: bool,
    },

    /// Reconcile persisted pane state against what's actually on disk and
    /// alive in the multiplexer. Runs automatically on `serve` startup;
    /// exposed standalone for scripting and recovery.
    Reconcile,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CloseModeArg {
    KillOnly,
    RemoveWorktree,
    DeleteEverything,
}

impl From<CloseModeArg> for CloseMode {
    fn from(value: CloseModeArg) -> Self {
        match value {
            CloseModeArg::KillOnly => CloseMode::KillOnly,
            CloseModeArg::RemoveWorktree => CloseMode::RemoveWorktree,
            CloseModeArg::DeleteEverything => CloseMode::DeleteEverything,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let project_root = resolve_project_root(cli.project)?;

    match cli.command {
        Commands::Serve { port, control_pane } => serve(project_root, port, control_pane.or_else(current_tmux_pane)).await,
        Commands::Create { prompt, agent, control_pane } => create(project_root, prompt, agent, control_pane.or_else(current_tmux_pane)),
        Commands::Close { pane_id, mode, control_pane } => close(project_root, &pane_id, mode.into(), control_pane.or_else(current_tmux_pane)),
        Commands::List { json } => list(project_root, json),
        Commands::Reconcile => reconcile(project_root),
    }
}

fn resolve_project_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(crate::git::repo_root(&cwd).unwrap_or(cwd))
}

fn current_tmux_pane() -> Option<String> {
    std::env::var("TMUX_PANE").ok()
}

fn default_llm_analyzer() -> Arc<LlmAnalyzer> {
    let endpoints: Vec<Arc<dyn AgentHarness>> = crate::agent::profile::builtin_profiles()
        .into_iter()
        .filter(|p| which::which(&p.launch_command).is_ok())
        .map(|p| Arc::new(crate::agent::CliHarness::new(p.launch_command)) as Arc<dyn AgentHarness>)
        .collect();
    Arc::new(LlmAnalyzer::new(endpoints))
}

async fn serve(project_root: PathBuf, port: u16, control_pane_id: Option<String>) -> Result<()> {
    let tmux = Arc::new(TmuxService::new());
    let store = StateStore::load(&project_root)?;
    let callbacks = Arc::new(CallbackRegistry::new());
    let llm = default_llm_analyzer();

    manager::reconcile_orphans(&tmux, &store, &project_root).context("startup orphan reconciliation failed")?;
    crate::state::spawn_watcher(Arc::clone(&store), &project_root).context("failed to start the state file watcher")?;
    spawn_sweeper(Arc::clone(&callbacks));

    let shutdown = CancellationToken::new();
    let supervisor_shutdown = shutdown.clone();
    let supervisor_handle = tokio::spawn(supervisor::run(Arc::clone(&tmux), Arc::clone(&store), llm, supervisor_shutdown));

    let state = AppState {
        tmux,
        store,
        callbacks,
        control_pane_id,
    };
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));

    let server_shutdown = shutdown.clone();
    tokio::select! {
        result = http::serve(state, addr, server_shutdown) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("cli:received ctrl-c, shutting down");
            shutdown.cancel();
        }
    }

    shutdown.cancel();
    let _ = supervisor_handle.await;
    Ok(())
}

fn create(project_root: PathBuf, prompt: String, agent: Option<String>, control_pane_id: Option<String>) -> Result<()> {
    let Some(control_pane_id) = control_pane_id else {
        anyhow::bail!("no control pane: pass --control-pane or run this from inside the tmux pane to split from");
    };
    let tmux = Arc::new(TmuxService::new());
    let store = StateStore::load(&project_root)?;
    let ctx = crate::action::dispatch::ActionContext {
        tmux,
        store,
        control_pane_id: Some(control_pane_id.clone()),
    };
    let result = manager::create(&ctx, &control_pane_id, &project_root, prompt, agent);
    print_action_result(&result);
    Ok(())
}

fn close(project_root: PathBuf, pane_id: &str, mode: CloseMode, control_pane_id: Option<String>) -> Result<()> {
    let tmux = Arc::new(TmuxService::new());
    let store = StateStore::load(&project_root)?;
    let result = manager::close_with_mode(&tmux, &store, pane_id, mode, control_pane_id.as_deref());
    print_action_result(&result);
    Ok(())
}

fn list(project_root: PathBuf, json: bool) -> Result<()> {
    let store = StateStore::load(&project_root)?;
    let panes = store.list_panes();
    if json {
        println!("{}", serde_json::to_string_pretty(&panes)?);
        return Ok(());
    }
    for pane in &panes {
        println!(
            "{}\t{}\t{:?}\t{}",
            pane.id,
            pane.slug,
            pane.agent_status,
            pane.worktree_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
        );
    }
    Ok(())
}

fn reconcile(project_root: PathBuf) -> Result<()> {
    let tmux = TmuxService::new();
    let store = StateStore::load(&project_root)?;
    manager::reconcile_orphans(&tmux, &store, &project_root)?;
    println!("Reconciled {} panes", store.list_panes().len());
    Ok(())
}

fn print_action_result(result: &crate::action::ActionResult) {
    match result {
        crate::action::ActionResult::Success { message, .. } => println!("ok: {message}"),
        crate::action::ActionResult::Error { message, .. } => eprintln!("error: {message}"),
        crate::action::ActionResult::Info { message, .. } => println!("{message}"),
        crate::action::ActionResult::Navigation { target_pane_id } => println!("ok: pane {target_pane_id}"),
        crate::action::ActionResult::Progress { message, .. } => println!("{message}"),
        crate::action::ActionResult::Confirm { message, .. } => println!("needs confirmation: {message}"),
        crate::action::ActionResult::Choice { message, options, .. } => {
            println!("needs a choice: {message}");
            for opt in options {
                println!("  - {} ({})", opt.id, opt.label);
            }
        }
        crate::action::ActionResult::Input { message, .. } => println!("needs input: {message}"),
    }
}
