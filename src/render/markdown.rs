//! Markdown output.

use super::Formatter;

pub struct MarkdownFormatter;

/// Format a heading with the specified level
pub fn heading(level: u8, text: &str) -> String {
    let hashes = "#".repeat(level as usize);
    format!("{} {}\n\n", hashes, text)
}

/// Format a code block with optional language
pub fn code_block(code: &str, language: Option<&str>) -> String {
    let lang = language.unwrap_or("");
    format!("```{}\n{}\n```\n\n", lang, code)
}

/// Format an inline code span
pub fn inline_code(text: &str) -> String {
    format!("`{}`", text)
}

impl Formatter for MarkdownFormatter {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn h1(&self, text: &str) -> String {
        heading(1, text)
    }

    fn h2(&self, text: &str) -> String {
        heading(2, text)
    }

    fn h3(&self, text: &str) -> String {
        heading(3, text)
    }

    fn list_item(&self, text: &str) -> String {
        format!("- {}\n", text)
    }

    fn text(&self, text: &str) -> String {
        format!("{}\n\n", text)
    }

    fn inline_code(&self, code: &str) -> String {
        inline_code(code)
    }

    fn code_block(&self, code: &str) -> String {
        code_block(code, Some("bash"))
    }

    fn add_section_id(&self, title: &str, id: &str) -> String {
        format!("<a name=\"{}\"></a>\n{}", id, title)
    }

    fn section_link(&self, title: &str, id: &str) -> String {
        format!("[{}](#{})", title, id)
    }
}
