//! Scratch output file protocol.
//!
//! Step scripts append `KEY=VALUE` lines to the file named by `$OUTPUT`.
//! There is no quoting; a value runs to the end of its line and may itself
//! contain `=`.

use std::collections::BTreeMap;

use crate::audit;
use crate::state::{self, SharedState, StateError};

/// Receives the outputs reported by a finished step
pub trait OutputSink: Send {
    fn set_output(&mut self, name: &str, value: &str) -> Result<(), StateError>;
}

impl OutputSink for SharedState {
    fn set_output(&mut self, name: &str, value: &str) -> Result<(), StateError> {
        record_output(self, name, value)
    }
}

/// Persist an output and write the change to the audit log
pub(crate) fn record_output(state: &SharedState, name: &str, value: &str) -> Result<(), StateError> {
    let mut store = state::lock(state);
    let previous = store.output_value(name);
    store.set_output(name, value)?;
    audit::variable_change(name, &previous, value);
    Ok(())
}

impl OutputSink for BTreeMap<String, String> {
    fn set_output(&mut self, name: &str, value: &str) -> Result<(), StateError> {
        self.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// One non-blank line of an output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine<'a> {
    Pair { key: &'a str, value: &'a str },
    Invalid(&'a str),
}

/// Split an output file into lines.
///
/// A final line without a terminating newline is accepted. Trailing `\r`
/// is stripped and blank lines are skipped. A line without `=`, or with an
/// empty key, is invalid.
pub fn parse_output_lines(raw: &str) -> impl Iterator<Item = OutputLine<'_>> {
    raw.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => OutputLine::Pair { key, value },
            _ => OutputLine::Invalid(line),
        })
}
