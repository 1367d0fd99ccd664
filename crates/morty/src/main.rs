//! morty - software-construction driver CLI.
//!
//! Runs one command at a time against a project's `.morty` directory: the
//! tool is invoked per-command (spec.md Section 9: "no in-memory
//! singletons are required across calls"), so every subcommand loads
//! state fresh, does its work, and exits.

mod render;

use clap::{Parser, Subcommand};
use morty_core::engine::{self, EngineContext};
use morty_core::types::{Plan, SelectionMode};
use morty_core::{rollback, scheduler, Config, StateStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "morty")]
#[command(about = "Drives a hierarchical plan to completion, one job at a time")]
#[command(version)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Override the global config.json lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select and run jobs until nothing is runnable (or until --once).
    Run {
        /// Restrict selection to one module.
        #[arg(long, conflicts_with_all = ["job", "restart_all", "restart_module", "restart_job"])]
        module: Option<String>,

        /// Restrict selection to one job (requires --module).
        #[arg(long, requires = "module")]
        job: Option<String>,

        /// Reset every job to PENDING, then run from the top.
        #[arg(long, conflicts_with_all = ["module", "restart_module", "restart_job"])]
        restart_all: bool,

        /// Reset one module's jobs to PENDING, then run it.
        #[arg(long, conflicts_with_all = ["module", "restart_all", "restart_job"])]
        restart_module: Option<String>,

        /// Reset one job to PENDING, then run it. Takes `<module> <job>`.
        #[arg(long, num_args = 2, value_names = ["MODULE", "JOB"], conflicts_with_all = ["module", "restart_all", "restart_module"])]
        restart_job: Option<Vec<String>>,

        /// Run exactly one job, then exit, instead of looping to exhaustion.
        #[arg(long)]
        once: bool,
    },

    /// Print the status of every module and job.
    Status,

    /// Inspect or revert checkpoint commits.
    Rollback {
        #[command(subcommand)]
        action: RollbackAction,
    },
}

#[derive(Subcommand)]
enum RollbackAction {
    /// List the last N checkpoint commits, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reset the repository and state to a prior checkpoint commit.
    Reset {
        /// Commit hash to reset to.
        hash: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let project_root = cli
        .project
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let project_dir = Config::project_dir(&project_root);

    let global_config_path = cli
        .config
        .or_else(|| Some(Config::home_dir().join("config.json")));
    let config = match Config::load(global_config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run {
            module,
            job,
            restart_all,
            restart_module,
            restart_job,
            once,
        } => {
            run_command(
                &project_root,
                &project_dir,
                &config,
                module,
                job,
                restart_all,
                restart_module,
                restart_job,
                once,
            )
            .await
        }
        Command::Status => status_command(&project_dir),
        Command::Rollback { action } => match action {
            RollbackAction::List { limit } => rollback_list_command(&project_root, limit),
            RollbackAction::Reset { hash } => rollback_reset_command(&project_root, &project_dir, &hash),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn discover_plans(project_dir: &Path) -> Result<Vec<Plan>, morty_core::MortyError> {
    let plan_dir = project_dir.join("plan");
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(&plan_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some("README.md"))
            .collect(),
        Err(_) => Vec::new(),
    };
    paths.sort();

    let mut plans = Vec::new();
    for path in paths {
        let outcome = morty_core::plan::parse_file(&path)?;
        for warning in &outcome.warnings {
            tracing::warn!(file = %path.display(), %warning, "plan parse warning");
        }
        plans.push(outcome.plan);
    }
    Ok(plans)
}

fn selection_mode(
    module: Option<String>,
    job: Option<String>,
    restart_all: bool,
    restart_module: Option<String>,
    restart_job: Option<Vec<String>>,
) -> SelectionMode {
    if restart_all {
        return SelectionMode::RestartAll;
    }
    if let Some(module) = restart_module {
        return SelectionMode::RestartModule(module);
    }
    if let Some(pair) = restart_job {
        return SelectionMode::RestartJob {
            module: pair[0].clone(),
            job: pair[1].clone(),
        };
    }
    match (module, job) {
        (Some(module), Some(job)) => SelectionMode::Job { module, job },
        (Some(module), None) => SelectionMode::Module(module),
        (None, _) => SelectionMode::Auto,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    project_root: &Path,
    project_dir: &Path,
    config: &Config,
    module: Option<String>,
    job: Option<String>,
    restart_all: bool,
    restart_module: Option<String>,
    restart_job: Option<Vec<String>>,
    once: bool,
) -> Result<(), morty_core::MortyError> {
    let plans = discover_plans(project_dir)?;
    let store = StateStore::new(project_dir.join("status.json"));

    let mode = selection_mode(module, job, restart_all, restart_module, restart_job);

    if let SelectionMode::RestartAll
    | SelectionMode::RestartModule(_)
    | SelectionMode::RestartJob { .. } = &mode
    {
        reset_jobs(&store, &plans, &mode)?;
    }
    let run_mode = match mode {
        SelectionMode::RestartAll => SelectionMode::Auto,
        SelectionMode::RestartModule(module) => SelectionMode::Module(module),
        SelectionMode::RestartJob { module, job } => SelectionMode::Job { module, job },
        other => other,
    };

    let claude_cli = std::env::var("CLAUDE_CODE_CLI").unwrap_or_else(|_| config.claude_cli.clone());
    let prompts_dir = project_dir.join("prompts");
    let logs_dir = project_dir.join("logs");

    loop {
        let doc = store.load()?;
        let selection = scheduler::select(&plans, &doc, &run_mode, config.max_retries);

        match selection {
            scheduler::Selection::Run { module, job } => {
                let plan = plans
                    .iter()
                    .find(|p| p.module == module)
                    .ok_or_else(|| {
                        morty_core::PlanError::Parse(format!("no plan loaded for module {module}"))
                    })?;

                let ctx = EngineContext {
                    state: &store,
                    plan,
                    plan_dir: &project_dir.join("plan"),
                    prompts_dir: &prompts_dir,
                    logs_dir: &logs_dir,
                    repo_root: project_root,
                    claude_cli: &claude_cli,
                    deadline: std::time::Duration::from_secs(config.timeout_sec as u64),
                    grace_period: std::time::Duration::from_secs(config.kill_grace_sec as u64),
                    capture_cap_bytes: config.capture_cap_bytes,
                    max_retries: config.max_retries,
                    auto_commit: config.auto_commit,
                    commit_identity: config.commit_identity.as_deref(),
                };

                info!(%module, %job, "executing job");
                engine::execute_job(&ctx, &module, &job).await?;
                let job_state = store.get_job(&module, &job)?;
                render::print_job_result(&module, &job, job_state.as_ref());

                if once {
                    return Ok(());
                }
            }
            scheduler::Selection::Blocked { module, job } => {
                render::print_blocked(&module, &job);
                return Ok(());
            }
            scheduler::Selection::Nothing => {
                render::print_nothing_to_run();
                return Ok(());
            }
        }
    }
}

fn reset_jobs(
    store: &StateStore,
    plans: &[Plan],
    mode: &SelectionMode,
) -> Result<(), morty_core::MortyError> {
    let targets = scheduler::reset_targets(plans, mode);
    for (module, job) in targets {
        if let Some(mut state) = store.get_job(&module, &job)? {
            state.status = morty_core::JobStatus::Pending;
            state.tasks_completed = 0;
            for slot in state.task_status.iter_mut() {
                *slot = morty_core::TaskState::Pending;
            }
            let plan_file = plans
                .iter()
                .find(|p| p.module == module)
                .map(|p| p.file.display().to_string())
                .unwrap_or_default();
            store.set_job(&module, &plan_file, &job, state)?;
        }
    }
    Ok(())
}

fn status_command(project_dir: &Path) -> Result<(), morty_core::MortyError> {
    let store = StateStore::new(project_dir.join("status.json"));
    let doc = store.load()?;
    render::print_status(&doc.modules);
    Ok(())
}

fn rollback_list_command(project_root: &Path, limit: usize) -> Result<(), morty_core::MortyError> {
    let commits = rollback::list(project_root, limit)?;
    render::print_rollback_list(&commits);
    Ok(())
}

fn rollback_reset_command(
    project_root: &Path,
    project_dir: &Path,
    hash: &str,
) -> Result<(), morty_core::MortyError> {
    let store = StateStore::new(project_dir.join("status.json"));
    let mut doc = store.load()?;
    let backup_branch = rollback::reset_to_commit(project_root, hash, &mut doc, chrono::Utc::now())?;
    store.save(&doc)?;
    render::print_reset_done(hash, &backup_branch);
    Ok(())
}
