//! AsciiDoc output.

use super::Formatter;

pub struct AsciiDocFormatter;

impl Formatter for AsciiDocFormatter {
    fn name(&self) -> &'static str {
        "asciidoc"
    }

    fn h1(&self, text: &str) -> String {
        format!("= {}\n\n", text)
    }

    fn h2(&self, text: &str) -> String {
        format!("== {}\n\n", text)
    }

    fn h3(&self, text: &str) -> String {
        format!("=== {}\n\n", text)
    }

    fn list_item(&self, text: &str) -> String {
        format!("* {}\n", text)
    }

    fn text(&self, text: &str) -> String {
        format!("{}\n\n", separate_lists_in_text(text))
    }

    fn inline_code(&self, code: &str) -> String {
        format!("`{}`", code)
    }

    fn code_block(&self, code: &str) -> String {
        format!("[source,bash]\n----\n{}\n----\n\n", code)
    }

    fn add_section_id(&self, title: &str, id: &str) -> String {
        format!("[[{}]]\n{}", id, title)
    }

    fn section_link(&self, title: &str, id: &str) -> String {
        format!("<<{},{}>>", id, title)
    }
}

/// Surround lists embedded in free text with blank lines.
///
/// AsciiDoc only starts a list after a blank line. A line starting with `- `
/// or `* ` opens or continues a list, an indented line continues an open one.
fn separate_lists_in_text(text: &str) -> String {
    let mut in_list = false;
    let mut result = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let line_in_list = line.starts_with("- ")
            || line.starts_with("* ")
            || (in_list && line.starts_with(' '));
        if line_in_list != in_list {
            result.push('\n');
            in_list = line_in_list;
        }
        result.push_str(line);
    }
    result
}
