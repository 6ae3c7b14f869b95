//! Integration tests for workflow execution
//!
//! These tests drive the public library API end to end:
//! - loading the workflow and step files from `tests/testdata`
//! - preparing the executor with predefined inputs
//! - running step scripts and threading outputs between steps
//! - resuming a run from the state document

#![cfg(unix)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use guided_setup::executor::{Executor, ExecutorError, ExecutorOptions, Progress};
use guided_setup::matcher::{MatchError, Matcher};
use guided_setup::state::{ExecutionState, StateStore, FINAL_STEP};
use guided_setup::steps::{expand_step_paths, load_step_files, StepDefinition};
use guided_setup::workflow::Workflow;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn testdata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("testdata")
}

fn load_library() -> (Workflow, Vec<StepDefinition>) {
    let workflow = Workflow::load(&testdata().join("cluster.workflow")).unwrap();
    let pattern = testdata().join("steps").join("*.yml");
    let paths = expand_step_paths(&[pattern.to_string_lossy().to_string()]).unwrap();
    (workflow, load_step_files(&paths).unwrap())
}

struct Run {
    dir: TempDir,
}

impl Run {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join(".guided-setup-state.json")
    }

    fn executor(&self) -> Executor {
        let (workflow, steps) = load_library();
        let store = StateStore::open(self.state_path()).unwrap();
        Executor::new(
            Matcher::new(workflow, steps),
            store,
            ExecutorOptions {
                scratch_dir: Some(self.dir.path().to_path_buf()),
                ..Default::default()
            },
        )
    }
}

fn token() -> HashMap<String, String> {
    [("token".to_string(), "s3cret".to_string())]
        .into_iter()
        .collect()
}

async fn run_current(executor: &Executor) {
    let mut cmd = executor.current_step_cmd(CancellationToken::new()).unwrap();
    cmd.start().unwrap();
    cmd.wait().await.unwrap();
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn test_library_loads_in_file_order() {
    let (workflow, steps) = load_library();
    assert_eq!(workflow.len(), 3);
    assert_eq!(workflow.steps[1], "And the monitoring stack");
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2].pattern.as_str(), "^Then deploy the application$");
}

#[tokio::test]
async fn test_full_run_threads_outputs_between_steps() {
    let run = Run::new();
    let mut executor = run.executor();
    executor.prepare(&token()).unwrap();
    assert_eq!(executor.outputs()["token"].value, "s3cret");

    let current = executor.current_step().unwrap();
    assert_eq!(current.step.captures["cluster"], "prod");
    assert_eq!(current.step.captures["region"], "eu1");
    run_current(&executor).await;
    assert_eq!(executor.outputs()["cluster_id"].value, "prod-eu1");

    loop {
        match executor.next_step().unwrap() {
            Progress::Step(_) => {}
            Progress::Completed => break,
        }
        run_current(&executor).await;
    }
    executor.close().unwrap();

    let state = ExecutionState::read(&run.state_path()).unwrap();
    assert_eq!(state.current_step, FINAL_STEP);
    assert_eq!(state.completed_steps.len(), 3);
    assert_eq!(state.outputs.len(), 2);

    // Only the state document is left behind
    let leftovers: Vec<_> = std::fs::read_dir(run.dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![".guided-setup-state.json"]);
}

#[tokio::test]
async fn test_restart_resumes_with_outputs() {
    let run = Run::new();
    {
        let mut executor = run.executor();
        executor.prepare(&token()).unwrap();
        run_current(&executor).await;
        executor.next_step().unwrap();
        executor.close().unwrap();
    }

    // No predefined inputs the second time; stored outputs carry over
    let mut executor = run.executor();
    executor.prepare(&HashMap::new()).unwrap();
    let current = executor.current_step().unwrap();
    assert_eq!(current.index, 1);
    assert_eq!(current.reference, "And the monitoring stack");
    assert_eq!(executor.outputs()["cluster_id"].value, "prod-eu1");
    assert_eq!(executor.outputs()["token"].value, "s3cret");
}

#[tokio::test]
async fn test_failed_step_can_be_rerun() {
    let run = Run::new();
    let mut executor = run.executor();
    executor.prepare(&token()).unwrap();
    executor.next_step().unwrap();
    executor.next_step().unwrap();

    // deploy requires cluster_id, which the skipped first step never produced
    let mut cmd = executor.current_step_cmd(CancellationToken::new()).unwrap();
    cmd.start().unwrap();
    let err = cmd.wait().await.unwrap_err();
    assert!(err.is_command_failure());

    executor.set_output("cluster_id", "manual").unwrap();
    run_current(&executor).await;
    assert!(matches!(executor.next_step().unwrap(), Progress::Completed));
}

#[test]
fn test_unknown_reference_reported_before_running() {
    let run = Run::new();
    let (_, steps) = load_library();
    let workflow = Workflow::new(["Given a cluster named a in region b", "Then celebrate"]);
    let mut executor = Executor::new(
        Matcher::new(workflow, steps),
        StateStore::open(run.state_path()).unwrap(),
        ExecutorOptions::default(),
    );

    match executor.prepare(&HashMap::new()) {
        Err(ExecutorError::Match(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(
                errors.0[0],
                MatchError::Unmatched("Then celebrate".to_string())
            );
        }
        other => panic!("expected match errors, got {:?}", other.err()),
    }
    assert!(ExecutionState::read(&run.state_path())
        .unwrap()
        .current_step
        .is_empty());
}
