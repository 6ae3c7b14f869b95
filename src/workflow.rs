//! Workflow definition files.
//!
//! A workflow is a plain text file with one step reference per line.
//! Surrounding whitespace is trimmed, empty lines and `#` comments are skipped.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Ordered list of step references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workflow {
    pub steps: Vec<String>,
}

impl Workflow {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a raw workflow definition
    pub fn parse(raw: &str) -> Self {
        let steps = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect();
        Self { steps }
    }

    /// Read and parse a workflow file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the first occurrence of a reference
    pub fn position(&self, reference: &str) -> Option<usize> {
        self.steps.iter().position(|s| s == reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let raw = "# Cluster setup\n\n  Given I have a cluster  \nThen I deploy app\n\t\n# done\n";
        let wf = Workflow::parse(raw);
        assert_eq!(wf.steps, vec!["Given I have a cluster", "Then I deploy app"]);
    }

    #[test]
    fn test_parse_keeps_duplicates() {
        let wf = Workflow::parse("build\nbuild\n");
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.position("build"), Some(0));
    }

    #[test]
    fn test_parse_empty() {
        assert!(Workflow::parse("\n# nothing\n").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Workflow::load(Path::new("/nonexistent/setup.workflow")).unwrap_err();
        assert!(err.to_string().contains("Failed to read workflow file"));
    }
}
