//! Filesystem loading for step files

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StepDefinition, StepsFile};

/// Load the step definitions of a single YAML step file
pub fn load_step_file(path: &Path) -> Result<Vec<StepDefinition>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read step file: {}", path.display()))?;

    let file: StepsFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse step file: {}", path.display()))?;

    debug!(
        "Loaded {} step definitions from {}",
        file.steps.len(),
        path.display()
    );
    Ok(file.steps)
}

/// Load and concatenate step definitions, preserving file order
pub fn load_step_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<StepDefinition>> {
    let mut steps = Vec::new();
    for path in paths {
        steps.extend(load_step_file(path.as_ref())?);
    }
    Ok(steps)
}

/// Expand step file arguments.
///
/// Arguments containing glob metacharacters are expanded (sorted); anything
/// else is taken verbatim so a missing file surfaces as a read error.
pub fn expand_step_paths(args: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for arg in args {
        if !arg.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(arg));
            continue;
        }

        let mut matched: Vec<PathBuf> = glob::glob(arg)
            .with_context(|| format!("Invalid step file pattern: {}", arg))?
            .filter_map(std::result::Result::ok)
            .filter(|p| p.is_file())
            .collect();
        if matched.is_empty() {
            anyhow::bail!("No step files match pattern: {}", arg);
        }
        matched.sort();
        paths.extend(matched);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_multiple_files_in_order() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.yml", "steps:\n  - match: ^first$\n");
        let b = write(&dir, "b.yml", "steps:\n  - match: ^second$\n  - match: ^third$\n");

        let steps = load_step_files(&[a, b]).unwrap();
        let patterns: Vec<&str> = steps.iter().map(|s| s.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["^first$", "^second$", "^third$"]);
    }

    #[test]
    fn test_invalid_regex_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "broken.yml", "steps:\n  - match: \"(oops\"\n");

        let err = load_step_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.yml"));
    }

    #[test]
    fn test_empty_file_has_no_steps() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.yml", "steps: []\n");
        assert!(load_step_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_expand_glob() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.yml", "steps: []\n");
        write(&dir, "a.yml", "steps: []\n");
        write(&dir, "notes.txt", "");

        let pattern = format!("{}/*.yml", dir.path().display());
        let paths = expand_step_paths(&[pattern]).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.yml"));
        assert!(paths[1].ends_with("b.yml"));
    }

    #[test]
    fn test_expand_literal_and_empty_glob() {
        let paths = expand_step_paths(&["steps/base.yml".to_string()]).unwrap();
        assert_eq!(paths, vec![PathBuf::from("steps/base.yml")]);

        let dir = TempDir::new().unwrap();
        let pattern = format!("{}/*.yml", dir.path().display());
        assert!(expand_step_paths(&[pattern]).is_err());
    }
}
