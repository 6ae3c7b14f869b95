//! Integration tests for documentation rendering
//!
//! Renders the workflow in `tests/testdata` with every supported format.

use std::path::{Path, PathBuf};

use guided_setup::matcher::Matcher;
use guided_setup::render::{formatter_for, Renderer, SUPPORTED_FORMATS};
use guided_setup::steps::load_step_files;
use guided_setup::workflow::Workflow;

fn testdata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("testdata")
}

fn prepared_matcher() -> Matcher {
    let workflow = Workflow::load(&testdata().join("cluster.workflow")).unwrap();
    let steps = load_step_files(&[
        testdata().join("steps").join("cluster.yml"),
        testdata().join("steps").join("deploy.yml"),
    ])
    .unwrap();
    let mut matcher = Matcher::new(workflow, steps);
    matcher.prepare().unwrap();
    matcher
}

fn render(format: &str) -> String {
    let matcher = prepared_matcher();
    let formatter = formatter_for(format).unwrap();
    Renderer::new(&matcher, formatter.as_ref())
        .with_title("Cluster Setup")
        .render()
        .unwrap()
}

#[test]
fn test_asciidoc_document() {
    let doc = render("asciidoc");

    assert!(doc.starts_with("= Cluster Setup\n\n"));
    assert!(doc.contains("* <<step-1,Given a cluster named prod in region eu1>>\n"));
    assert!(doc.contains("* &nbsp;&nbsp;<<step-2,And the monitoring stack>>\n"));
    assert!(doc.contains("[[step-3]]\n== Then deploy the application\n\n"));
    // Embedded list in the description gets separated
    assert!(doc.contains("Requires:\n\n- a cloud account\n- quota for three nodes\n"));
    assert!(doc.contains("=== Inputs\n\n* `token`: Cloud API token\n\n\n"));
    assert!(doc.contains("[source,bash]\n----\ntest -n \"$INPUT_cluster_id\"\n----\n"));
}

#[test]
fn test_markdown_document() {
    let doc = render("markdown");

    assert!(doc.starts_with("# Cluster Setup\n\n"));
    assert!(doc.contains("- [Given a cluster named prod in region eu1](#step-1)\n"));
    assert!(doc.contains("- &nbsp;&nbsp;[And the monitoring stack](#step-2)\n"));
    assert!(doc.contains("<a name=\"step-2\"></a>\n## And the monitoring stack\n\n"));
    assert!(doc.contains("Requires:\n- a cloud account\n"));
    assert!(doc.contains("### Outputs\n\n- `cluster_id`: ID of the created cluster\n\n\n"));
    assert!(doc.contains("```bash\ntest -n \"$INPUT_cluster_id\"\n```\n"));
}

#[test]
fn test_step_without_script_has_no_script_section() {
    let doc = render("markdown");
    let monitoring = doc
        .split("## And the monitoring stack")
        .nth(1)
        .and_then(|rest| rest.split("## Then deploy").next())
        .unwrap();
    assert!(monitoring.contains("### Inputs"));
    assert!(!monitoring.contains("### Script"));
}

#[test]
fn test_every_supported_format_renders() {
    for format in SUPPORTED_FORMATS {
        assert!(!render(format).is_empty(), "{} rendered nothing", format);
    }
}
