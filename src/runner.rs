//! Line-oriented console driver for `guided-setup run`.
//!
//! Walks the operator through the workflow one step at a time: asks for
//! missing inputs, runs the step with its output streamed to the console and
//! advances on success. A failed step can be rerun, its inputs edited, or it
//! can be skipped.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit;
use crate::executor::{CommandError, Executor, Progress};
use crate::steps::StepVariable;

/// Upper bound for draining output still buffered after the script exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Quit,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Never prompt; missing inputs and failed steps abort the run
    pub assume_yes: bool,
}

/// Lines typed on stdin, read on a background task
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Step data copied out of the executor so it can be mutated while prompting
struct StepView {
    index: usize,
    reference: String,
    description: String,
    inputs: Vec<StepVariable>,
    outputs: Vec<StepVariable>,
}

enum Answer {
    Line(String),
    Closed,
    Cancelled,
}

enum FailureChoice {
    Rerun,
    Next,
    Quit,
}

pub struct Runner<W: Write> {
    executor: Executor,
    input: mpsc::Receiver<String>,
    out: W,
    cancel: CancellationToken,
    options: RunOptions,
}

impl<W: Write> Runner<W> {
    /// `executor` must already be prepared
    pub fn new(
        executor: Executor,
        input: mpsc::Receiver<String>,
        out: W,
        cancel: CancellationToken,
        options: RunOptions,
    ) -> Self {
        Self {
            executor,
            input,
            out,
            cancel,
            options,
        }
    }

    /// Drive the workflow to the end, then close the state store
    pub async fn run(mut self) -> Result<Outcome> {
        let outcome = self.drive().await;
        let closed = self.executor.close().context("Failed to close state file");
        let outcome = outcome?;
        closed?;
        Ok(outcome)
    }

    async fn drive(&mut self) -> Result<Outcome> {
        let total = self.executor.workflow().len();
        let mut step = self.view()?;

        loop {
            writeln!(
                self.out,
                "\n[{}/{}] {}",
                step.index + 1,
                total,
                step.reference
            )?;
            if !step.description.is_empty() {
                writeln!(self.out, "{}", step.description.trim_end())?;
            }

            if let Some(outcome) = self.fill_empty_inputs(&step).await? {
                return Ok(outcome);
            }

            let result = self.run_current(&step).await?;
            let advance = match result {
                Ok(()) => {
                    writeln!(self.out, "Step succeeded.")?;
                    true
                }
                Err(e) if e.is_cancelled() => {
                    writeln!(self.out, "Step cancelled.")?;
                    return Ok(Outcome::Cancelled);
                }
                Err(e) => {
                    writeln!(self.out, "Step failed: {}", e)?;
                    if self.options.assume_yes {
                        bail!("Step {:?} failed: {}", step.reference, e);
                    }
                    match self.on_failure(&step).await? {
                        Ok(FailureChoice::Rerun) => false,
                        Ok(FailureChoice::Next) => true,
                        Ok(FailureChoice::Quit) => return Ok(Outcome::Quit),
                        Err(outcome) => return Ok(outcome),
                    }
                }
            };

            if advance {
                match self.executor.next_step()? {
                    Progress::Completed => {
                        writeln!(self.out, "\nWorkflow completed.")?;
                        return Ok(Outcome::Completed);
                    }
                    Progress::Step(_) => {}
                }
                step = self.view()?;
            }
        }
    }

    fn view(&self) -> Result<StepView> {
        let current = self.executor.current_step()?;
        let definition = &current.step.definition;
        Ok(StepView {
            index: current.index,
            reference: current.reference.to_string(),
            description: definition.description.clone(),
            inputs: definition.inputs.clone(),
            outputs: definition.outputs.clone(),
        })
    }

    fn value_of(&self, name: &str) -> String {
        self.executor
            .outputs()
            .get(name)
            .map(|o| o.value.clone())
            .unwrap_or_default()
    }

    async fn read_answer(&mut self) -> Answer {
        self.out.flush().ok();
        tokio::select! {
            line = self.input.recv() => match line {
                Some(line) => Answer::Line(line.trim().to_string()),
                None => Answer::Closed,
            },
            () = self.cancel.cancelled() => Answer::Cancelled,
        }
    }

    /// Ask for every declared input without a value
    async fn fill_empty_inputs(&mut self, step: &StepView) -> Result<Option<Outcome>> {
        for input in &step.inputs {
            if !self.value_of(&input.name).is_empty() {
                continue;
            }
            if self.options.assume_yes {
                bail!(
                    "Input {:?} of step {:?} has no value",
                    input.name,
                    step.reference
                );
            }
            match self.prompt_value(input, "").await? {
                Ok(()) => {}
                Err(outcome) => return Ok(Some(outcome)),
            }
        }
        Ok(None)
    }

    /// Prompt for a new value, an empty answer keeps `current`
    async fn prompt_value(
        &mut self,
        input: &StepVariable,
        current: &str,
    ) -> Result<std::result::Result<(), Outcome>> {
        if input.description.is_empty() {
            write!(self.out, "{}", input.name)?;
        } else {
            write!(self.out, "{} ({})", input.name, input.description)?;
        }
        if !current.is_empty() {
            write!(self.out, " [{}]", current)?;
        }
        write!(self.out, ": ")?;

        let value = match self.read_answer().await {
            Answer::Line(line) if line.is_empty() => current.to_string(),
            Answer::Line(line) => line,
            Answer::Closed => return Ok(Err(Outcome::Quit)),
            Answer::Cancelled => return Ok(Err(Outcome::Cancelled)),
        };
        if value != current {
            self.executor.set_output(&input.name, &value)?;
        }
        Ok(Ok(()))
    }

    async fn on_failure(
        &mut self,
        step: &StepView,
    ) -> Result<std::result::Result<FailureChoice, Outcome>> {
        loop {
            write!(self.out, "[r]erun, [e]dit input, [n]ext (skip), [q]uit: ")?;
            let answer = match self.read_answer().await {
                Answer::Line(line) => line.to_lowercase(),
                Answer::Closed => return Ok(Err(Outcome::Quit)),
                Answer::Cancelled => return Ok(Err(Outcome::Cancelled)),
            };
            match answer.as_str() {
                "r" | "rerun" | "" => return Ok(Ok(FailureChoice::Rerun)),
                "n" | "next" => {
                    warn!(step = %step.reference, "Skipping failed step");
                    return Ok(Ok(FailureChoice::Next));
                }
                "q" | "quit" => return Ok(Ok(FailureChoice::Quit)),
                "e" | "edit" => {
                    if let Err(outcome) = self.edit_input(step).await? {
                        return Ok(Err(outcome));
                    }
                }
                other => writeln!(self.out, "Unknown choice {:?}", other)?,
            }
        }
    }

    async fn edit_input(&mut self, step: &StepView) -> Result<std::result::Result<(), Outcome>> {
        if step.inputs.is_empty() {
            writeln!(self.out, "This step has no inputs.")?;
            return Ok(Ok(()));
        }
        for (i, input) in step.inputs.iter().enumerate() {
            writeln!(
                self.out,
                "  {}) {} = {}",
                i + 1,
                input.name,
                self.value_of(&input.name)
            )?;
        }
        write!(self.out, "Input number: ")?;
        let selected = match self.read_answer().await {
            Answer::Line(line) => line,
            Answer::Closed => return Ok(Err(Outcome::Quit)),
            Answer::Cancelled => return Ok(Err(Outcome::Cancelled)),
        };
        let input = match selected
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| step.inputs.get(i))
        {
            Some(input) => input.clone(),
            None => {
                writeln!(self.out, "No input {:?}", selected)?;
                return Ok(Ok(()));
            }
        };
        let current = self.value_of(&input.name);
        self.prompt_value(&input, &current).await
    }

    /// Run the current step, streaming its output to the console
    async fn run_current(
        &mut self,
        step: &StepView,
    ) -> Result<std::result::Result<(), CommandError>> {
        let mut cmd = self.executor.current_step_cmd(self.cancel.clone())?;
        let script = cmd.script().to_string();
        info!(step = %step.reference, "Running step");

        if let Err(e) = cmd.start() {
            return Ok(Err(e));
        }
        let mut rx = cmd.stream_output();
        let mut combined = Vec::new();

        let result = {
            let wait = cmd.wait();
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    result = &mut wait => break result,
                    Some(chunk) = rx.recv() => {
                        self.out.write_all(&chunk.data)?;
                        self.out.flush()?;
                        combined.extend_from_slice(&chunk.data);
                    }
                }
            }
        };
        while let Ok(Some(chunk)) = tokio::time::timeout(DRAIN_TIMEOUT, rx.recv()).await {
            self.out.write_all(&chunk.data)?;
            combined.extend_from_slice(&chunk.data);
        }
        self.out.flush()?;

        let values = |vars: &[StepVariable]| -> BTreeMap<String, String> {
            vars.iter()
                .map(|v| (v.name.clone(), self.value_of(&v.name)))
                .collect()
        };
        audit::command_finished(
            &script,
            &values(step.inputs.as_slice()),
            &values(step.outputs.as_slice()),
            &String::from_utf8_lossy(&combined),
            &result,
        );
        Ok(result)
    }
}
