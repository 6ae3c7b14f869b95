use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use guided_setup::config::{expand_home, Config};
use guided_setup::env_vars::env_vars_by_category;
use guided_setup::executor::{Executor, ExecutorOptions, ProcessEnv};
use guided_setup::logging;
use guided_setup::matcher::Matcher;
use guided_setup::render::{self, Renderer};
use guided_setup::runner::{self, Outcome, RunOptions, Runner};
use guided_setup::state::{ExecutionState, StateStore};
use guided_setup::steps::{expand_step_paths, load_step_files, StepDefinition};
use guided_setup::workflow::Workflow;

#[derive(Parser)]
#[command(name = "guided-setup")]
#[command(about = "Guided, resumable execution of multi-step setup workflows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow, resuming where the last run stopped
    #[command(after_help = "Example: guided-setup run setup.workflow steps/*.yml")]
    Run {
        /// Workflow file, one step reference per line
        workflow: PathBuf,

        /// Step files or glob patterns
        #[arg(required = true)]
        steps: Vec<String>,

        /// Shell rc file sourced before every step script (empty disables)
        #[arg(long)]
        rcfile: Option<String>,

        /// State document (default: .guided-setup-state.json)
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Never prompt; fail on missing inputs and failed steps
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Render a workflow as documentation
    Render {
        /// Workflow file, one step reference per line
        workflow: PathBuf,

        /// Step files or glob patterns
        #[arg(required = true)]
        steps: Vec<String>,

        /// Output format (asciidoc, markdown)
        #[arg(short, long)]
        format: Option<String>,

        /// Document title
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show the recorded progress of a workflow
    Status {
        /// State document (default: .guided-setup-state.json)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },

    /// List environment variables understood by guided-setup and step scripts
    Env,

    /// Write the default configuration to .guided-setup/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    // Running a workflow logs to the run log, everything else to stderr
    let is_run_mode = matches!(cli.command, Commands::Run { .. });
    let logging_handle = logging::init_logging(&config, is_run_mode, cli.debug)?;

    match cli.command {
        Commands::Run {
            workflow,
            steps,
            rcfile,
            state_file,
            yes,
        } => {
            let outcome = cmd_run(&config, &workflow, &steps, rcfile, state_file, yes).await?;

            if let Some(log_path) = logging_handle.log_file_path {
                eprintln!("Run log: {}", log_path.display());
            }
            // Flush the log before a non-zero exit skips destructors
            drop(logging_handle._guard);
            match outcome {
                Outcome::Completed | Outcome::Quit => {}
                Outcome::Cancelled => std::process::exit(130),
            }
        }
        Commands::Render {
            workflow,
            steps,
            format,
            title,
        } => {
            cmd_render(&config, &workflow, &steps, format, title)?;
        }
        Commands::Status { state_file } => {
            cmd_status(&config, state_file)?;
        }
        Commands::Env => {
            cmd_env();
        }
        Commands::Init { force } => {
            cmd_init(&config, force)?;
        }
    }

    Ok(())
}

/// Load the workflow and the step library from the command line arguments
fn load_sources(workflow: &Path, steps: &[String]) -> Result<(Workflow, Vec<StepDefinition>)> {
    let workflow = Workflow::load(workflow)?;
    let step_paths = expand_step_paths(steps)?;
    let definitions = load_step_files(&step_paths)?;
    tracing::debug!(
        references = workflow.len(),
        definitions = definitions.len(),
        "Loaded workflow sources"
    );
    Ok((workflow, definitions))
}

async fn cmd_run(
    config: &Config,
    workflow: &Path,
    steps: &[String],
    rcfile: Option<String>,
    state_file: Option<PathBuf>,
    yes: bool,
) -> Result<Outcome> {
    let (workflow, definitions) = load_sources(workflow, steps)?;

    let state_path = state_file.unwrap_or_else(|| config.state_file_path());
    let store = StateStore::open(&state_path).context("Failed to open state file")?;

    let shell_rc_file = match rcfile {
        Some(raw) if raw.trim().is_empty() => None,
        Some(raw) => Some(expand_home(raw.trim())),
        None => config.rcfile_path(),
    };
    let options = ExecutorOptions {
        shell: config.execution.shell.clone(),
        shell_rc_file,
        scratch_dir: config.scratch_dir_path(),
    };

    let mut executor = Executor::new(Matcher::new(workflow, definitions), store, options);
    executor
        .prepare(&ProcessEnv)
        .context("Failed to prepare executor")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted");
            on_interrupt.cancel();
        }
    });

    let runner = Runner::new(
        executor,
        runner::stdin_lines(),
        std::io::stdout(),
        cancel,
        RunOptions { assume_yes: yes },
    );
    let outcome = runner.run().await?;

    match outcome {
        Outcome::Completed => {}
        Outcome::Quit | Outcome::Cancelled => {
            eprintln!("Progress saved to {}", state_path.display());
        }
    }
    Ok(outcome)
}

fn cmd_render(
    config: &Config,
    workflow: &Path,
    steps: &[String],
    format: Option<String>,
    title: Option<String>,
) -> Result<()> {
    let format = format.unwrap_or_else(|| config.render.format.clone());
    let formatter = render::formatter_for(&format)?;

    let (workflow, definitions) = load_sources(workflow, steps)?;
    let mut matcher = Matcher::new(workflow, definitions);
    matcher.prepare().context("Failed to prepare steps")?;

    let title = title.unwrap_or_else(|| config.render.title.clone());
    let document = Renderer::new(&matcher, formatter.as_ref())
        .with_title(title)
        .render()?;
    print!("{}", document);
    Ok(())
}

fn cmd_status(config: &Config, state_file: Option<PathBuf>) -> Result<()> {
    let state_path = state_file.unwrap_or_else(|| config.state_file_path());
    let state = ExecutionState::read(&state_path)?;

    println!("State file: {}", state_path.display());
    println!("{}", "─".repeat(60));

    let current = if state.is_final() {
        "completed"
    } else if state.current_step.is_empty() {
        "not started"
    } else {
        state.current_step.as_str()
    };
    println!("Current step: {}", current);

    if !state.completed_steps.is_empty() {
        println!("\nCompleted steps ({}):", state.completed_steps.len());
        for (i, step) in state.completed_steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    if !state.outputs.is_empty() {
        println!("\nOutputs:");
        for (name, output) in &state.outputs {
            println!("  {} = {}", name, output.value);
        }
    }

    if !state.artifacts.is_empty() {
        println!("\nArtifacts:");
        for (name, artifact) in &state.artifacts {
            println!("  {} -> {}", name, artifact.path);
        }
    }

    Ok(())
}

fn cmd_env() {
    for (category, vars) in env_vars_by_category() {
        println!("{}", category.display_name());
        println!("{}", "─".repeat(60));
        for var in vars {
            println!("  {}", var.name);
            println!("      {}", var.description);
            if let Some(default) = var.default {
                println!("      default: {}", default);
            }
            if let Some(example) = var.example {
                println!("      example: {}", example);
            }
        }
        println!();
    }
}

fn cmd_init(config: &Config, force: bool) -> Result<()> {
    let config_path = Config::project_config_path();
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let written = config.save()?;
    println!("Wrote {}", written.display());
    Ok(())
}
