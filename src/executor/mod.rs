//! Resumable execution of a workflow.
//!
//! The [`Executor`] binds a prepared [`Matcher`] to a [`StateStore`]. The
//! store is the only source of truth for the position in the workflow: a
//! restarted run picks up at the step recorded on disk.

mod command;
mod outputs;

pub use command::{CommandError, OutputChunk, StepCommand, StreamKind};
pub use outputs::{parse_output_lines, OutputLine, OutputSink};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit;
use crate::env_vars::{INPUT_PREFIX, MATCH_PREFIX};
use crate::errors::ErrorList;
use crate::matcher::{MatchError, MatchErrors, Matcher, ResolvedStep};
use crate::state::{self, Artifact, Output, SharedState, StateError, StateStore, FINAL_STEP};
use crate::workflow::Workflow;
use command::CommandSpec;

/// Name of the file handed to step scripts as `$OUTPUT`
pub const OUTPUT_FILE_NAME: &str = "outputs.env";

const SCRATCH_DIR_PREFIX: &str = "outputs-";

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("workflow uses reserved step reference {0:?}")]
    ReservedReference(String),

    #[error("{0}")]
    Match(#[from] MatchErrors),

    #[error(transparent)]
    NotPrepared(#[from] MatchError),

    #[error("workflow already completed")]
    AlreadyCompleted,

    #[error("current step {0:?} not found in workflow")]
    StepNotInWorkflow(String),

    #[error("failed to seed predefined inputs: {0}")]
    SeedInputs(ErrorList<StateError>),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to create outputs dir in {path:?}: {source}")]
    ScratchDir { path: PathBuf, source: io::Error },

    #[error("executor not prepared")]
    Unprepared,
}

/// Source of values for declared inputs known before the run starts
pub trait PredefinedInputs {
    fn predefined(&self, name: &str) -> Option<String>;
}

/// Reads `INPUT_<name>` from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl PredefinedInputs for ProcessEnv {
    fn predefined(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{}", INPUT_PREFIX, name)).ok()
    }
}

impl PredefinedInputs for HashMap<String, String> {
    fn predefined(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl PredefinedInputs for BTreeMap<String, String> {
    fn predefined(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Shell invoked as `<shell> -c <script>`
    pub shell: String,
    /// Sourced before every step script when it exists and is readable
    pub shell_rc_file: Option<PathBuf>,
    /// Parent of the per-invocation scratch dirs, the system temp dir if unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            shell_rc_file: None,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Unprepared,
    At(usize),
    Completed,
}

/// The step at the current workflow position
#[derive(Debug, Clone, Copy)]
pub struct CurrentStep<'a> {
    /// Zero-based position in the workflow
    pub index: usize,
    pub reference: &'a str,
    pub step: &'a ResolvedStep,
}

/// Result of moving forward
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    Step(CurrentStep<'a>),
    /// The last step was left; the workflow is done
    Completed,
}

#[derive(Debug)]
pub struct Executor {
    matcher: Matcher,
    state: SharedState,
    options: ExecutorOptions,
    position: Position,
}

impl Executor {
    pub fn new(matcher: Matcher, store: StateStore, options: ExecutorOptions) -> Self {
        Self {
            matcher,
            state: Arc::new(Mutex::new(store)),
            options,
            position: Position::Unprepared,
        }
    }

    /// Resolve the workflow, seed predefined inputs and restore the position
    pub fn prepare(&mut self, predefined: &dyn PredefinedInputs) -> Result<(), ExecutorError> {
        let workflow = self.matcher.workflow();
        if workflow.is_empty() {
            return Err(ExecutorError::EmptyWorkflow);
        }
        if workflow.position(FINAL_STEP).is_some() {
            return Err(ExecutorError::ReservedReference(FINAL_STEP.to_string()));
        }

        self.matcher.prepare()?;
        self.seed_inputs(predefined)?;

        let index = self.restore_position()?;
        self.position = Position::At(index);
        info!(
            step = index + 1,
            total = self.matcher.workflow().len(),
            reference = %self.matcher.workflow().steps[index],
            "Executor prepared"
        );
        Ok(())
    }

    fn seed_inputs(&self, predefined: &dyn PredefinedInputs) -> Result<(), ExecutorError> {
        let mut seen = HashSet::new();
        let mut errors = ErrorList::new();

        for step in self.matcher.prepared_steps()? {
            for input in &step.definition.inputs {
                if !seen.insert(input.name.as_str()) {
                    continue;
                }
                let Some(value) = predefined
                    .predefined(&input.name)
                    .filter(|value| !value.is_empty())
                else {
                    continue;
                };
                debug!(input = %input.name, "Seeding predefined input");
                if let Err(e) = outputs::record_output(&self.state, &input.name, &value) {
                    errors.push(e);
                }
            }
        }

        errors.into_result().map_err(ExecutorError::SeedInputs)
    }

    fn restore_position(&self) -> Result<usize, ExecutorError> {
        let workflow = self.matcher.workflow();
        let mut store = state::lock(&self.state);
        let current = store.current_step().to_string();

        if current.is_empty() {
            let first = &workflow.steps[0];
            store.advance(first)?;
            audit::step_change("", first);
            return Ok(0);
        }
        if current == FINAL_STEP {
            return Err(ExecutorError::AlreadyCompleted);
        }
        let index = workflow
            .position(&current)
            .ok_or(ExecutorError::StepNotInWorkflow(current))?;
        info!(step = index + 1, "Resuming workflow");
        Ok(index)
    }

    fn index(&self) -> Result<usize, ExecutorError> {
        match self.position {
            Position::Unprepared => Err(ExecutorError::Unprepared),
            Position::At(index) => Ok(index),
            Position::Completed => Err(ExecutorError::AlreadyCompleted),
        }
    }

    /// The step at the current position. Never changes state.
    pub fn current_step(&self) -> Result<CurrentStep<'_>, ExecutorError> {
        let index = self.index()?;
        let reference = self
            .matcher
            .workflow()
            .steps
            .get(index)
            .ok_or(ExecutorError::Unprepared)?;
        let step = self.matcher.resolved(reference)?;
        Ok(CurrentStep {
            index,
            reference,
            step,
        })
    }

    /// Move forward one step, persisting the new position first.
    ///
    /// Leaving the last step marks the workflow completed.
    pub fn next_step(&mut self) -> Result<Progress<'_>, ExecutorError> {
        let index = self.index()?;
        let workflow = self.matcher.workflow();
        let from = workflow.steps[index].clone();

        if index + 1 >= workflow.len() {
            state::lock(&self.state).set_final()?;
            self.position = Position::Completed;
            audit::step_change(&from, FINAL_STEP);
            info!("Workflow completed");
            return Ok(Progress::Completed);
        }

        let to = workflow.steps[index + 1].clone();
        state::lock(&self.state).advance(&to)?;
        self.position = Position::At(index + 1);
        audit::step_change(&from, &to);
        info!(step = index + 2, reference = %to, "Advanced");

        self.current_step().map(Progress::Step)
    }

    pub fn is_completed(&self) -> bool {
        self.position == Position::Completed
    }

    /// Build the process for the current step.
    ///
    /// Each call creates a fresh scratch dir, so a failed step can simply be
    /// run again with a new command.
    pub fn current_step_cmd(&self, cancel: CancellationToken) -> Result<StepCommand, ExecutorError> {
        let current = self.current_step()?;
        let definition = &current.step.definition;

        let mut script = if definition.run.is_empty() {
            ":".to_string()
        } else {
            definition.run.clone()
        };
        if let Some(rc_file) = &self.options.shell_rc_file {
            script = format!("{}\n{}", source_if_readable(rc_file), script);
        }

        let mut env = Vec::new();
        {
            let store = state::lock(&self.state);
            for input in &definition.inputs {
                env.push((
                    format!("{}{}", INPUT_PREFIX, input.name),
                    store.output_value(&input.name),
                ));
            }
        }
        for (group, value) in &current.step.captures {
            env.push((format!("{}{}", MATCH_PREFIX, group), value.clone()));
        }

        let parent = self
            .options
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch_err = |source| ExecutorError::ScratchDir {
            path: parent.clone(),
            source,
        };
        let scratch_dir = tempfile::Builder::new()
            .prefix(SCRATCH_DIR_PREFIX)
            .tempdir_in(&parent)
            .map_err(scratch_err)?;
        let output_file =
            std::path::absolute(scratch_dir.path().join(OUTPUT_FILE_NAME)).map_err(scratch_err)?;

        debug!(reference = current.reference, output_file = %output_file.display(), "Built step command");
        Ok(StepCommand::new(
            CommandSpec {
                reference: current.reference.to_string(),
                shell: self.options.shell.clone(),
                script,
                env,
                scratch_dir,
                output_file,
            },
            Box::new(Arc::clone(&self.state)),
            cancel,
        ))
    }

    pub fn workflow(&self) -> &Workflow {
        self.matcher.workflow()
    }

    /// Shared handle to the state store
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn outputs(&self) -> BTreeMap<String, Output> {
        state::lock(&self.state).outputs()
    }

    pub fn artifacts(&self) -> BTreeMap<String, Artifact> {
        state::lock(&self.state).artifacts()
    }

    /// Set an output on behalf of the operator
    pub fn set_output(&self, name: &str, value: &str) -> Result<(), StateError> {
        outputs::record_output(&self.state, name, value)
    }

    pub fn close(&self) -> Result<(), StateError> {
        state::lock(&self.state).close()
    }
}

/// Shell snippet sourcing `path` when it is a readable file
fn source_if_readable(path: &Path) -> String {
    let quoted = shell_quote(&path.to_string_lossy());
    format!(
        "if [ -f {0} ] && [ -r {0} ]; then . {0}; fi",
        quoted
    )
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
