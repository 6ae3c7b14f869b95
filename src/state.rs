//! Durable execution state.
//!
//! The state document records the current workflow position, the steps that
//! were left behind and every captured output. Each mutation rewrites the
//! whole document through a sibling temp file that replaces the original, so
//! the file on disk is always a complete document. The replacement keeps the
//! permissions of the previous document, but a symlinked state path is
//! replaced by a regular file.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Marker stored as current step once the workflow has completed.
/// Workflows using it as a reference are rejected during preparation.
pub const FINAL_STEP: &str = "__FINAL_STEP__";

/// Default state document name, relative to the working directory
pub const DEFAULT_STATE_FILE: &str = ".guided-setup-state.json";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to open state file {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read state file {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to decode state file {path:?}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode state file {path:?}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write state file {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("state file {0:?} is closed")]
    Closed(PathBuf),
}

/// A file produced by a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
}

/// A value produced by a step or supplied by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: String,
}

/// On-disk state document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Step currently being executed, empty on a fresh run
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_step: String,

    /// Steps left behind, informational only
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_steps: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub outputs: BTreeMap<String, Output>,

    /// Reserved, not consumed by the engine
    #[serde(default, deserialize_with = "null_as_default")]
    pub artifacts: BTreeMap<String, Artifact>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExecutionState {
    /// Read a state document without taking ownership of the file.
    /// A missing or empty file is a fresh state.
    pub fn read(path: &Path) -> Result<Self, StateError> {
        match fs::read_to_string(path) {
            Ok(raw) => Self::decode(&raw, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn decode(raw: &str, path: &Path) -> Result<Self, StateError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|source| StateError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_final(&self) -> bool {
        self.current_step == FINAL_STEP
    }
}

/// Owner of the state document for the lifetime of a run
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    file: Option<File>,
    state: ExecutionState,
}

impl StateStore {
    /// Open (creating if needed) and load the state document at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| StateError::Open {
                path: path.clone(),
                source,
            })?;

        let mut store = Self {
            path,
            file: Some(file),
            state: ExecutionState::default(),
        };
        store.load()?;
        Ok(store)
    }

    /// Reload the document from the held file handle
    pub fn load(&mut self) -> Result<(), StateError> {
        let path = self.path.clone();
        let file = self.file.as_mut().ok_or(StateError::Closed(path.clone()))?;

        let read_err = |source| StateError::Read {
            path: path.clone(),
            source,
        };
        let mut raw = String::new();
        file.rewind().map_err(read_err)?;
        file.read_to_string(&mut raw).map_err(read_err)?;

        self.state = ExecutionState::decode(&raw, &path)?;
        debug!(
            path = %path.display(),
            current_step = %self.state.current_step,
            outputs = self.state.outputs.len(),
            "Loaded state"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_step(&self) -> &str {
        &self.state.current_step
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.state.completed_steps
    }

    /// Move to `step`, recording the previous step as completed
    pub fn advance(&mut self, step: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        if !self.state.current_step.is_empty() {
            let previous = std::mem::take(&mut self.state.current_step);
            self.state.completed_steps.push(previous);
        }
        self.state.current_step = step.to_string();
        self.sync()
    }

    pub fn set_final(&mut self) -> Result<(), StateError> {
        self.advance(FINAL_STEP)
    }

    pub fn set_output(&mut self, name: &str, value: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        self.state.outputs.insert(
            name.to_string(),
            Output {
                value: value.to_string(),
            },
        );
        self.sync()
    }

    /// Copy of all outputs
    pub fn outputs(&self) -> BTreeMap<String, Output> {
        self.state.outputs.clone()
    }

    /// Value of a single output, empty when unset
    pub fn output_value(&self, name: &str) -> String {
        self.state
            .outputs
            .get(name)
            .map(|o| o.value.clone())
            .unwrap_or_default()
    }

    pub fn set_artifact(&mut self, name: &str, path: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        self.state.artifacts.insert(
            name.to_string(),
            Artifact {
                path: path.to_string(),
            },
        );
        self.sync()
    }

    /// Copy of all artifacts
    pub fn artifacts(&self) -> BTreeMap<String, Artifact> {
        self.state.artifacts.clone()
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> ExecutionState {
        self.state.clone()
    }

    /// Write the document one last time and release the file
    pub fn close(&mut self) -> Result<(), StateError> {
        if self.file.is_none() {
            return Ok(());
        }
        self.sync()?;
        self.file = None;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.file.is_none() {
            return Err(StateError::Closed(self.path.clone()));
        }
        Ok(())
    }

    /// Rewrite the entire document
    fn sync(&mut self) -> Result<(), StateError> {
        self.ensure_open()?;

        let mut contents =
            serde_json::to_vec_pretty(&self.state).map_err(|source| StateError::Encode {
                path: self.path.clone(),
                source,
            })?;
        contents.push(b'\n');

        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        // Keep the mode of an existing document instead of the temp file's 0600
        if let Ok(metadata) = fs::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(metadata.permissions())
                .map_err(write_err)?;
        }
        tmp.write_all(&contents).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        let file = tmp
            .persist(&self.path)
            .map_err(|e| write_err(e.error))?;
        self.file = Some(file);
        Ok(())
    }
}

/// State store shared between the engine and the output callbacks of
/// running step commands
pub type SharedState = Arc<Mutex<StateStore>>;

/// Lock a shared store.
///
/// A panic while holding the lock cannot leave a half-written document on
/// disk, so a poisoned lock is recovered.
pub fn lock(state: &SharedState) -> MutexGuard<'_, StateStore> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join(DEFAULT_STATE_FILE)).unwrap()
    }

    #[test]
    fn test_fresh_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.current_step(), "");
        assert!(store.completed_steps().is_empty());
        assert!(store.outputs().is_empty());
        assert!(!store.is_final());
    }

    #[test]
    fn test_empty_file_is_fresh_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "  \n").unwrap();
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.snapshot(), ExecutionState::default());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StateStore::open(&path),
            Err(StateError::Decode { .. })
        ));
    }

    #[test]
    fn test_advance_records_completed_steps() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        store.advance("build").unwrap();
        assert!(store.completed_steps().is_empty());

        store.advance("test").unwrap();
        store.set_final().unwrap();
        assert_eq!(store.completed_steps(), ["build", "test"]);
        assert_eq!(store.current_step(), FINAL_STEP);
        assert!(store.is_final());
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();

        store.advance("build").unwrap();
        let on_disk = ExecutionState::read(&path).unwrap();
        assert_eq!(on_disk.current_step, "build");

        store.set_output("version", "1.2.3").unwrap();
        let on_disk = ExecutionState::read(&path).unwrap();
        assert_eq!(on_disk.outputs["version"].value, "1.2.3");
    }

    #[test]
    fn test_outputs_round_trip_through_fresh_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut store = StateStore::open(&path).unwrap();
            for i in 0..5 {
                store
                    .set_output(&format!("key{}", i), &format!("value {}", i))
                    .unwrap();
            }
            store.set_output("key0", "overwritten").unwrap();
            store.close().unwrap();
        }

        let reopened = StateStore::open(&path).unwrap();
        let outputs = reopened.outputs();
        assert_eq!(outputs.len(), 5);
        assert_eq!(outputs["key0"].value, "overwritten");
        assert_eq!(outputs["key4"].value, "value 4");
    }

    #[test]
    fn test_outputs_returns_independent_copy() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.set_output("a", "1").unwrap();

        let mut copy = store.outputs();
        copy.insert(
            "b".to_string(),
            Output {
                value: "2".to_string(),
            },
        );
        copy.get_mut("a").unwrap().value = "changed".to_string();

        assert_eq!(store.outputs().len(), 1);
        assert_eq!(store.output_value("a"), "1");
        assert_eq!(store.output_value("missing"), "");
    }

    #[test]
    fn test_artifacts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();
        store.set_artifact("kubeconfig", "/tmp/kubeconfig").unwrap();

        let on_disk = ExecutionState::read(&path).unwrap();
        assert_eq!(on_disk.artifacts["kubeconfig"].path, "/tmp/kubeconfig");
        assert_eq!(store.artifacts().len(), 1);
    }

    #[test]
    fn test_closed_store_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.set_output("a", "b"),
            Err(StateError::Closed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);
        let mut store = StateStore::open(&path).unwrap();
        store.advance("build").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        store.set_output("region", "eu1").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        assert_eq!(ExecutionState::read(&path).unwrap().outputs["region"].value, "eu1");
    }

    #[test]
    fn test_document_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();
        store.advance("build").unwrap();
        store.set_output("region", "eu1").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["current_step"], "build");
        assert_eq!(json["completed_steps"], serde_json::json!([]));
        assert_eq!(json["outputs"]["region"]["value"], "eu1");
        assert_eq!(json["artifacts"], serde_json::json!({}));
    }

    #[test]
    fn test_null_collections_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"current_step":"deploy","completed_steps":null,"outputs":null,"artifacts":null}"#,
        )
        .unwrap();

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.current_step(), "deploy");
        assert!(store.outputs().is_empty());
    }

    #[test]
    fn test_read_missing_document() {
        let dir = TempDir::new().unwrap();
        let state = ExecutionState::read(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state, ExecutionState::default());
    }
}
