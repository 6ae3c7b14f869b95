//! Resolution of workflow references to step definitions.
//!
//! Every reference must be matched by exactly one step definition. Errors for
//! all failing references are collected so an operator can fix the step
//! library in one pass.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::errors::ErrorList;
use crate::steps::StepDefinition;
use crate::workflow::Workflow;

/// Errors raised while resolving a single workflow reference
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("unmatched step {0:?}")]
    Unmatched(String),

    #[error("multiple matching steps for {reference:?}: {}", .patterns.join(", "))]
    Ambiguous {
        reference: String,
        patterns: Vec<String>,
    },

    #[error("step {0:?} not prepared")]
    NotPrepared(String),
}

impl MatchError {
    pub fn reference(&self) -> &str {
        match self {
            MatchError::Unmatched(reference) => reference,
            MatchError::Ambiguous { reference, .. } => reference,
            MatchError::NotPrepared(reference) => reference,
        }
    }
}

/// All resolution failures of a workflow
pub type MatchErrors = ErrorList<MatchError>;

/// A workflow reference bound to its unique step definition
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    /// The workflow line this step was resolved from
    pub reference: String,
    pub definition: StepDefinition,
    /// Named capture groups of the step pattern
    pub captures: BTreeMap<String, String>,
}

/// Binds a workflow to a step library
#[derive(Debug, Clone)]
pub struct Matcher {
    workflow: Workflow,
    steps: Vec<StepDefinition>,
    prepared: HashMap<String, ResolvedStep>,
}

impl Matcher {
    pub fn new(workflow: Workflow, steps: Vec<StepDefinition>) -> Self {
        Self {
            workflow,
            steps,
            prepared: HashMap::new(),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Resolve every workflow reference.
    ///
    /// Repeated references are resolved once.
    pub fn prepare(&mut self) -> Result<(), MatchErrors> {
        let mut prepared = HashMap::new();
        let mut errors = Vec::new();

        for reference in &self.workflow.steps {
            if prepared.contains_key(reference) {
                continue;
            }
            match self.resolve(reference) {
                Ok(step) => {
                    prepared.insert(reference.clone(), step);
                }
                Err(e) => {
                    if !errors.contains(&e) {
                        errors.push(e);
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(ErrorList(errors));
        }

        self.prepared = prepared;
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<ResolvedStep, MatchError> {
        let mut candidates: Vec<ResolvedStep> = self
            .steps
            .iter()
            .filter_map(|definition| {
                definition
                    .pattern
                    .captures(reference)
                    .map(|captures| ResolvedStep {
                        reference: reference.to_string(),
                        definition: definition.clone(),
                        captures,
                    })
            })
            .collect();

        match candidates.len() {
            0 => Err(MatchError::Unmatched(reference.to_string())),
            1 => {
                let step = candidates.remove(0);
                debug!(
                    reference,
                    pattern = step.definition.pattern.as_str(),
                    "Resolved step"
                );
                Ok(step)
            }
            _ => Err(MatchError::Ambiguous {
                reference: reference.to_string(),
                patterns: candidates
                    .iter()
                    .map(|c| c.definition.pattern.as_str().to_string())
                    .collect(),
            }),
        }
    }

    /// Memoized resolution of a reference
    pub fn resolved(&self, reference: &str) -> Result<&ResolvedStep, MatchError> {
        self.prepared
            .get(reference)
            .ok_or_else(|| MatchError::NotPrepared(reference.to_string()))
    }

    /// Resolved steps in workflow order, one per workflow line
    pub fn prepared_steps(&self) -> Result<Vec<&ResolvedStep>, MatchError> {
        self.workflow
            .steps
            .iter()
            .map(|reference| self.resolved(reference))
            .collect()
    }
}
