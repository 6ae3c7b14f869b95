//! Step library: reusable, pattern-addressed step definitions

mod loader;
mod pattern;

use serde::{Deserialize, Serialize};

pub use loader::{expand_step_paths, load_step_file, load_step_files};
pub use pattern::StepPattern;

/// Top-level layout of a step file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepsFile {
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// A declared input or output variable of a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepVariable {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A single reusable step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Pattern matched against workflow references
    #[serde(rename = "match")]
    pub pattern: StepPattern,

    #[serde(default)]
    pub description: String,

    /// Shell script executed for this step (may be empty)
    #[serde(default)]
    pub run: String,

    #[serde(default)]
    pub inputs: Vec<StepVariable>,

    #[serde(default)]
    pub outputs: Vec<StepVariable>,
}

impl StepDefinition {
    pub fn new(pattern: StepPattern) -> Self {
        Self {
            pattern,
            description: String::new(),
            run: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = run.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.inputs.push(StepVariable {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.outputs.push(StepVariable {
            name: name.into(),
            description: description.into(),
        });
        self
    }
}
