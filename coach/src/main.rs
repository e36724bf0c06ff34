//! Supervised workflow trainer for browser agents.
//!
//! `coach train` pair-works with the agent until it completes the task, asking
//! for a hint whenever it gets stuck, and stores what it learned under
//! `.coach/workflows/`. `coach run` replays a stored workflow unattended.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use coach::core::types::{AttemptEnd, Outcome, SessionStatus, StepAction};
use coach::exit_codes;
use coach::io::agent::CommandAgent;
use coach::io::config::{CoachConfig, default_config_path, load_config, write_config};
use coach::io::hint::ConsoleHintSource;
use coach::io::store::{WorkflowNotFoundError, WorkflowStore};
use coach::logging;
use coach::replay::replay_workflow;
use coach::supervisor::{SupervisorConfig, SupervisorEvent};
use coach::train::{Persisted, TrainReport, TrainRequest, retrain_task, train};

#[derive(Parser)]
#[command(
    name = "coach",
    version,
    about = "Teach a browser agent a workflow by supervising it"
)]
struct Cli {
    /// Config file (defaults to `.coach/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `max_iterations` from the config.
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.coach/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Train a new workflow under supervision.
    Train {
        /// Name to store the workflow under.
        #[arg(long)]
        name: String,
        /// Task description given to the agent.
        #[arg(long, required_unless_present = "task_file", conflicts_with = "task_file")]
        task: Option<String>,
        /// Read the task description from a file.
        #[arg(long)]
        task_file: Option<PathBuf>,
    },
    /// Train an existing workflow again using its stored task.
    Retrain { name: String },
    /// Replay a stored workflow without supervision.
    Run { name: String },
    /// List stored workflows.
    List,
    /// Print a stored workflow.
    Show { name: String },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<WorkflowNotFoundError>().is_some() {
                exit_codes::NOT_FOUND
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&root));

    if let Command::Init { force } = cli.command {
        return cmd_init(&root, &config_path, force);
    }

    let mut cfg = load_config(&config_path)?;
    if let Some(max_iterations) = cli.max_iterations {
        cfg.max_iterations = max_iterations;
        cfg.validate()?;
    }
    let store = WorkflowStore::new(cfg.workflows_path(&root));

    match cli.command {
        Command::Init { .. } => Ok(exit_codes::OK),
        Command::Train {
            name,
            task,
            task_file,
        } => {
            let task = match (task, task_file) {
                (Some(task), _) => task,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("read task file {}", path.display()))?,
                (None, None) => return Err(anyhow!("--task or --task-file is required")),
            };
            cmd_train(&root, &cfg, &store, &name, &task)
        }
        Command::Retrain { name } => {
            let task = retrain_task(&store, &name)?;
            println!("Retraining '{name}': {}", task.trim());
            cmd_train(&root, &cfg, &store, &name, &task)
        }
        Command::Run { name } => cmd_run(&root, &cfg, &store, &name),
        Command::List => cmd_list(&store),
        Command::Show { name } => cmd_show(&store, &name),
    }
}

fn cmd_init(root: &Path, config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(exit_codes::OK);
    }
    let cfg = CoachConfig::default();
    write_config(config_path, &cfg)?;
    let workflows = cfg.workflows_path(root);
    fs::create_dir_all(&workflows)
        .with_context(|| format!("create directory {}", workflows.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_train(
    root: &Path,
    cfg: &CoachConfig,
    store: &WorkflowStore,
    name: &str,
    task: &str,
) -> Result<i32> {
    let agent = CommandAgent::from_config(cfg, root.to_path_buf());
    let mut hints = ConsoleHintSource::new(cfg.hint_timeout());
    let sessions_dir = cfg.sessions_path(root);
    let request = TrainRequest {
        name,
        task: task.trim(),
        supervisor: SupervisorConfig {
            max_iterations: cfg.max_iterations,
            detector: cfg.detector,
        },
        store,
        sessions_dir: &sessions_dir,
    };
    let report = train(&request, &agent, &mut hints, print_event)?;
    print_train_report(name, &report);
    Ok(match report.status {
        SessionStatus::Succeeded => exit_codes::OK,
        SessionStatus::Aborted => exit_codes::ABORTED,
        _ => exit_codes::FAILED,
    })
}

fn print_event(event: &SupervisorEvent<'_>) {
    match event {
        SupervisorEvent::AttemptStarted {
            iteration,
            max_iterations,
        } => println!("--- attempt {iteration}/{max_iterations} ---"),
        SupervisorEvent::Step(step) => println!("  {}. {}", step.index, step.label()),
        SupervisorEvent::Stuck(signal) => {
            println!("  stuck: {} ({})", signal.reason.as_str(), signal.describe());
        }
        SupervisorEvent::HintAccepted(text) => println!("  hint recorded: {text}"),
        SupervisorEvent::AttemptEnded(AttemptEnd::Incomplete { reason }) => {
            println!("  attempt ended without completion: {reason}");
        }
        SupervisorEvent::AttemptEnded(_) => {}
        SupervisorEvent::Finished(status) => println!("training {}", status.as_str()),
    }
}

fn print_train_report(name: &str, report: &TrainReport) {
    println!(
        "session {}: {} after {} attempt(s), {} hint(s)",
        report.session_id,
        report.status.as_str(),
        report.iterations,
        report.hints
    );
    match &report.persisted {
        Persisted::Saved(workflow) => println!(
            "saved workflow '{name}' ({} steps, {} successes, {} failures)",
            workflow.steps.len(),
            workflow.success_count,
            workflow.failure_count
        ),
        Persisted::FailureRecorded(workflow) => println!(
            "kept existing workflow '{name}' ({} failures recorded)",
            workflow.failure_count
        ),
        Persisted::NothingToLearn => println!("nothing to learn; no workflow written"),
        Persisted::NotSaved => println!("no workflow saved"),
    }
    println!("session log: {}", report.session_dir.display());
}

fn cmd_run(root: &Path, cfg: &CoachConfig, store: &WorkflowStore, name: &str) -> Result<i32> {
    let agent = CommandAgent::from_config(cfg, root.to_path_buf());
    let report = replay_workflow(store, &agent, name, |obs| {
        println!(
            "  {} {}{}",
            obs.kind.as_str(),
            obs.target.as_deref().unwrap_or(""),
            if obs.succeeded { "" } else { " (failed)" }
        );
    })?;
    match report.outcome {
        Outcome::Succeeded => {
            println!("replay succeeded: {}", report.detail);
        }
        Outcome::Failed => {
            println!("replay failed: {}", report.detail);
        }
    }
    println!(
        "'{}': {} successes, {} failures",
        report.name, report.workflow.success_count, report.workflow.failure_count
    );
    Ok(match report.outcome {
        Outcome::Succeeded => exit_codes::OK,
        Outcome::Failed => exit_codes::FAILED,
    })
}

fn cmd_list(store: &WorkflowStore) -> Result<i32> {
    let names = store.list()?;
    if names.is_empty() {
        println!("no workflows in {}", store.dir().display());
        return Ok(exit_codes::OK);
    }
    for name in names {
        match store.load(&name) {
            Ok(workflow) => println!(
                "{name}\t{} steps\t{}/{} succeeded\t{}",
                workflow.steps.len(),
                workflow.success_count,
                workflow.success_count + workflow.failure_count,
                workflow.last_trained.format("%Y-%m-%d %H:%M")
            ),
            Err(err) => println!("{name}\tunreadable: {err:#}"),
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_show(store: &WorkflowStore, name: &str) -> Result<i32> {
    let workflow = store.load(name)?;
    println!("{}", workflow.name);
    println!("task: {}", workflow.description);
    println!(
        "created {} / last trained {}",
        workflow.created_at.to_rfc3339(),
        workflow.last_trained.to_rfc3339()
    );
    println!(
        "successes: {} / failures: {}",
        workflow.success_count, workflow.failure_count
    );
    for step in &workflow.steps {
        let marker = if step.action == StepAction::Guidance {
            "*"
        } else {
            " "
        };
        println!(
            "{marker}{:>3}. [{}] {}",
            step.step_number,
            step.action.as_str(),
            step.description
        );
    }
    Ok(exit_codes::OK)
}
