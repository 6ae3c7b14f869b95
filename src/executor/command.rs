//! Process adapter for a single step invocation.
//!
//! A [`StepCommand`] owns the child process, its per-invocation scratch
//! directory and the sink receiving the step's outputs. Output reconciliation
//! runs after every exit, including failed ones, so a step that reported some
//! values before failing still records them.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::outputs::{parse_output_lines, OutputLine, OutputSink};
use crate::env_vars::OUTPUT_VAR;
use crate::errors::ErrorList;
use crate::state::StateError;

const READ_CHUNK_SIZE: usize = 1024;

/// Errors of a step invocation
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command already started")]
    AlreadyStarted,

    #[error("command not started")]
    NotStarted,

    #[error("failed to launch step script: {0}")]
    Launch(#[source] io::Error),

    #[error("failed to wait for command: {0}")]
    Wait(#[source] io::Error),

    #[error("command failed: {0}")]
    Failed(ExitStatus),

    #[error("command cancelled")]
    Cancelled,

    #[error("failed to read outputs file {path:?}: {source}")]
    ReadOutputs { path: PathBuf, source: io::Error },

    #[error("invalid state line: {0}")]
    InvalidOutputLine(String),

    #[error("failed to store outputs: {0}")]
    StoreOutputs(ErrorList<StateError>),

    #[error("failed to remove outputs dir {path:?}: {source}")]
    Cleanup { path: PathBuf, source: io::Error },

    #[error("{0}")]
    Multiple(ErrorList<CommandError>),
}

impl CommandError {
    /// Collapse collected errors: none is success, one is returned as is
    fn collect(mut errors: Vec<CommandError>) -> Result<(), CommandError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CommandError::Multiple(ErrorList(errors))),
        }
    }

    fn any(&self, predicate: &dyn Fn(&CommandError) -> bool) -> bool {
        match self {
            CommandError::Multiple(errors) => errors.iter().any(|e| e.any(predicate)),
            other => predicate(other),
        }
    }

    /// The step script ran and exited unsuccessfully
    pub fn is_command_failure(&self) -> bool {
        self.any(&|e| matches!(e, CommandError::Failed(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.any(&|e| matches!(e, CommandError::Cancelled))
    }

    /// Output file contained malformed lines
    pub fn is_parse_error(&self) -> bool {
        self.any(&|e| matches!(e, CommandError::InvalidOutputLine(_)))
    }

    /// Exit status of a failed script, if any
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            CommandError::Failed(status) => Some(*status),
            CommandError::Multiple(errors) => errors.iter().find_map(CommandError::exit_status),
            _ => None,
        }
    }
}

/// Which pipe a chunk was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Raw bytes read from the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: Vec<u8>,
}

/// A runnable step script
pub struct StepCommand {
    reference: String,
    script: String,
    command: Command,
    output_file: PathBuf,
    scratch_dir: Option<TempDir>,
    sink: Box<dyn OutputSink>,
    cancel: CancellationToken,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    started: bool,
}

impl std::fmt::Debug for StepCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCommand")
            .field("reference", &self.reference)
            .field("output_file", &self.output_file)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Everything needed to build a [`StepCommand`]
pub(crate) struct CommandSpec {
    pub reference: String,
    pub shell: String,
    pub script: String,
    pub env: Vec<(String, String)>,
    pub scratch_dir: TempDir,
    pub output_file: PathBuf,
}

impl StepCommand {
    pub(crate) fn new(
        spec: CommandSpec,
        sink: Box<dyn OutputSink>,
        cancel: CancellationToken,
    ) -> Self {
        let mut command = Command::new(&spec.shell);
        command
            .arg("-c")
            .arg(&spec.script)
            .envs(spec.env)
            .env(OUTPUT_VAR, &spec.output_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Self {
            reference: spec.reference,
            script: spec.script,
            command,
            output_file: spec.output_file,
            scratch_dir: Some(spec.scratch_dir),
            sink,
            cancel,
            child: None,
            stdout: None,
            stderr: None,
            started: false,
        }
    }

    /// Workflow reference of the step being run
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Effective script, including any shell-init prelude
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Path handed to the script as `$OUTPUT`
    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Launch the child process
    #[instrument(skip_all, fields(step = %self.reference))]
    pub fn start(&mut self) -> Result<(), CommandError> {
        if self.started {
            return Err(CommandError::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        let mut child = self.command.spawn().map_err(CommandError::Launch)?;
        self.started = true;
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        self.child = Some(child);
        debug!(output_file = %self.output_file.display(), "Started step script");
        Ok(())
    }

    /// Raw stdout of the running child, available once after `start`.
    /// Pipes still unclaimed when `wait` is called are discarded.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Raw stderr of the running child, available once after `start`
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Drain stdout and stderr on two tasks into one channel.
    ///
    /// The channel closes once both pipes reach EOF.
    pub fn stream_output(&mut self) -> mpsc::UnboundedReceiver<OutputChunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(self.stdout.take(), StreamKind::Stdout, tx.clone());
        spawn_reader(self.stderr.take(), StreamKind::Stderr, tx);
        rx
    }

    /// Wait for the child, then reconcile outputs and remove the scratch dir.
    ///
    /// Every failure along the way is reported; a failed exit does not skip
    /// reconciliation.
    #[instrument(skip_all, fields(step = %self.reference))]
    pub async fn wait(&mut self) -> Result<(), CommandError> {
        let mut child = self.child.take().ok_or(CommandError::NotStarted)?;
        let mut errors = Vec::new();

        // Unclaimed pipes would fill up and block the child
        spawn_discard(self.stdout.take());
        spawn_discard(self.stderr.take());

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = self.cancel.cancelled() => None,
        };

        match waited {
            Some(Ok(status)) if status.success() => {
                info!(%status, "Step script finished");
            }
            Some(Ok(status)) => {
                warn!(%status, "Step script failed");
                errors.push(CommandError::Failed(status));
            }
            Some(Err(e)) => errors.push(CommandError::Wait(e)),
            None => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill cancelled step script");
                }
                warn!("Step script cancelled");
                errors.push(CommandError::Cancelled);
            }
        }

        if let Err(e) = self.reconcile_outputs() {
            errors.push(e);
        }
        if let Err(e) = self.remove_scratch_dir() {
            errors.push(e);
        }

        CommandError::collect(errors)
    }

    /// Apply the output file through the sink
    fn reconcile_outputs(&mut self) -> Result<(), CommandError> {
        let raw = match std::fs::read_to_string(&self.output_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Step reported no outputs");
                return Ok(());
            }
            Err(source) => {
                return Err(CommandError::ReadOutputs {
                    path: self.output_file.clone(),
                    source,
                })
            }
        };

        let mut errors = Vec::new();
        let mut store_errors = ErrorList::new();
        let mut applied = 0usize;

        for line in parse_output_lines(&raw) {
            match line {
                OutputLine::Pair { key, value } => match self.sink.set_output(key, value) {
                    Ok(()) => applied += 1,
                    Err(e) => store_errors.push(e),
                },
                OutputLine::Invalid(line) => {
                    errors.push(CommandError::InvalidOutputLine(line.to_string()));
                }
            }
        }
        debug!(applied, "Reconciled step outputs");

        if !store_errors.is_empty() {
            errors.push(CommandError::StoreOutputs(store_errors));
        }
        CommandError::collect(errors)
    }

    fn remove_scratch_dir(&mut self) -> Result<(), CommandError> {
        let Some(dir) = self.scratch_dir.take() else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        dir.close().map_err(|source| {
            warn!(path = %path.display(), error = %source, "Failed to remove outputs dir");
            CommandError::Cleanup { path, source }
        })
    }
}

/// Read a child pipe to EOF, dropping what it yields
fn spawn_discard<R>(stream: Option<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
            debug!(error = %e, "Stopped discarding step output");
        }
    });
}

/// Forward a child pipe to the channel in fixed-size chunks
fn spawn_reader<R>(stream: Option<R>, kind: StreamKind, tx: mpsc::UnboundedSender<OutputChunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut stream) = stream else {
        return;
    };
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        stream: kind,
                        data: buf[..n].to_vec(),
                    };
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
