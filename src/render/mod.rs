//! Documentation rendering of a resolved workflow.
//!
//! The document has a title, a linked table of contents and one section per
//! workflow line with the step's description, inputs, outputs and script.

pub mod asciidoc;
pub mod markdown;

use thiserror::Error;

use crate::matcher::{MatchError, Matcher};

pub use asciidoc::AsciiDocFormatter;
pub use markdown::MarkdownFormatter;

/// Names accepted by [`formatter_for`], sorted
pub const SUPPORTED_FORMATS: &[&str] = &["asciidoc", "markdown"];

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("unknown format {format:?}, supported formats are: {}", SUPPORTED_FORMATS.join(", "))]
    UnknownFormat { format: String },

    #[error("failed to get prepared steps: {0}")]
    Match(#[from] MatchError),
}

/// Markup primitives of an output format
pub trait Formatter {
    /// Format name as accepted on the command line
    fn name(&self) -> &'static str;
    fn h1(&self, text: &str) -> String;
    fn h2(&self, text: &str) -> String;
    fn h3(&self, text: &str) -> String;
    fn list_item(&self, text: &str) -> String;
    /// A paragraph of free text
    fn text(&self, text: &str) -> String;
    fn inline_code(&self, code: &str) -> String;
    fn code_block(&self, code: &str) -> String;
    /// Attach an anchor to a heading
    fn add_section_id(&self, title: &str, id: &str) -> String;
    fn section_link(&self, title: &str, id: &str) -> String;
}

/// Look up a formatter by name, case-insensitively
pub fn formatter_for(name: &str) -> Result<Box<dyn Formatter>, RenderError> {
    match name.to_lowercase().as_str() {
        "asciidoc" => Ok(Box::new(AsciiDocFormatter)),
        "markdown" => Ok(Box::new(MarkdownFormatter)),
        _ => Err(RenderError::UnknownFormat {
            format: name.to_string(),
        }),
    }
}

/// Default document title
pub const DEFAULT_TITLE: &str = "Workflow";

pub struct Renderer<'a> {
    matcher: &'a Matcher,
    formatter: &'a dyn Formatter,
    title: String,
}

impl<'a> Renderer<'a> {
    /// `matcher` must already be prepared
    pub fn new(matcher: &'a Matcher, formatter: &'a dyn Formatter) -> Self {
        Self {
            matcher,
            formatter,
            title: DEFAULT_TITLE.to_string(),
        }
    }

    /// Document title, the default is kept when empty
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.is_empty() {
            self.title = title;
        }
        self
    }

    pub fn render(&self) -> Result<String, RenderError> {
        let steps = self.matcher.prepared_steps()?;
        let f = self.formatter;
        let mut out = f.h1(&self.title);

        for (i, step) in steps.iter().enumerate() {
            let mut link = f.section_link(&step.reference, &section_id(i));
            if step.reference.to_lowercase().starts_with("and") {
                link = format!("&nbsp;&nbsp;{}", link);
            }
            out.push_str(&f.list_item(&link));
        }
        out.push('\n');

        for (i, step) in steps.iter().enumerate() {
            let definition = &step.definition;
            out.push_str(&f.add_section_id(&f.h2(&step.reference), &section_id(i)));
            out.push_str(&f.text(&definition.description));

            for (heading, variables) in [("Inputs", &definition.inputs), ("Outputs", &definition.outputs)] {
                if variables.is_empty() {
                    continue;
                }
                out.push_str(&f.h3(heading));
                for variable in variables {
                    let mut item = f.inline_code(&variable.name);
                    if !variable.description.is_empty() {
                        item.push_str(": ");
                        item.push_str(&f.text(&variable.description));
                    }
                    out.push_str(&f.list_item(&item));
                }
                out.push('\n');
            }

            if !definition.run.is_empty() {
                out.push_str(&f.h3("Script"));
                out.push_str(&f.code_block(&definition.run));
            }
        }

        Ok(out)
    }
}

fn section_id(index: usize) -> String {
    format!("step-{}", index + 1)
}
