//! Audit trail of a guided run.
//!
//! Audit records are ordinary tracing events under the `audit` target, so
//! they land in whatever sink logging was initialised with (the run log file
//! for `run`).

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::executor::CommandError;

/// The workflow position moved
pub fn step_change(from: &str, to: &str) {
    info!(target: "audit", from, to, "STEP CHANGE");
}

/// An output value was set, by a step script or by the operator
pub fn variable_change(name: &str, from: &str, to: &str) {
    info!(target: "audit", name, from, to, "VARIABLE CHANGE");
}

/// A step script finished, successfully or not
pub fn command_finished(
    script: &str,
    inputs: &BTreeMap<String, String>,
    outputs: &BTreeMap<String, String>,
    combined_output: &str,
    result: &Result<(), CommandError>,
) {
    match result {
        Ok(()) => info!(
            target: "audit",
            script,
            exit_code = 0,
            ?inputs,
            ?outputs,
            output = combined_output,
            "COMMAND FINISHED"
        ),
        Err(e) => match e.exit_status().and_then(|status| status.code()) {
            Some(code) => warn!(
                target: "audit",
                script,
                exit_code = code,
                ?inputs,
                ?outputs,
                output = combined_output,
                "COMMAND FINISHED"
            ),
            None => warn!(
                target: "audit",
                script,
                error = %e,
                ?inputs,
                ?outputs,
                output = combined_output,
                "COMMAND FINISHED"
            ),
        },
    }
}
