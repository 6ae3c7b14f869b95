//! guided-setup - guided, resumable execution of multi-step setup workflows
//!
//! A workflow is an ordered list of step references. Each reference is
//! resolved against a library of step definitions, then run as a shell script
//! whose outputs are persisted so later steps (and later runs) can use them.

pub mod audit;
pub mod config;
pub mod env_vars;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod matcher;
pub mod render;
pub mod runner;
pub mod state;
pub mod steps;
pub mod workflow;
