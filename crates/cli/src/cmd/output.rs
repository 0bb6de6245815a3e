//! Shared output formatting for the campaign commands.

use std::collections::BTreeMap;

use color_eyre::eyre::Result;
use flowvars_core::graph::NodeRef;
use flowvars_core::runtime::{Diagnostic, NodeOutcome, NodeStatus};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// One evaluated or previewed section, for JSON output.
#[derive(Debug, Serialize)]
pub struct SectionOutput {
    pub section: String,
    pub status: NodeStatus,
    pub rendered: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&NodeOutcome> for SectionOutput {
    fn from(outcome: &NodeOutcome) -> Self {
        let section = NodeRef::parse(&outcome.node).as_section().unwrap_or(&outcome.node).to_string();
        Self {
            section,
            status: outcome.status,
            rendered: outcome.rendered.clone(),
            outputs: outcome.outputs.clone(),
            diagnostics: outcome.diagnostics.clone(),
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a section block:
///
/// ```text
/// [intro] evaluated
///   body: Hello Ada
///   ! unknown variable '@nobody'
/// ```
pub fn print_section(out: &SectionOutput) {
    println!("[{}] {}", out.section, status_label(out.status));
    for (field, text) in &out.rendered {
        println!("  {field}: {}", indent_continuation(text));
    }
    for (name, value) in &out.outputs {
        println!("  -> @{name} = {value}");
    }
    for diag in &out.diagnostics {
        println!("  ! {diag}");
    }
    if let Some(err) = &out.error {
        println!("  error: {err}");
    }
}

pub fn status_label(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Evaluated => "evaluated",
        NodeStatus::Cached => "cached",
        NodeStatus::Failed => "FAILED",
        NodeStatus::Blocked => "blocked",
        NodeStatus::Cancelled => "cancelled",
    }
}

fn indent_continuation(text: &str) -> String {
    text.replace('\n', "\n    ")
}
