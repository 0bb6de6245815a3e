use std::collections::BTreeMap;

use color_eyre::eyre::Result;
use flowvars_core::config::EngineConfig;
use flowvars_core::graph::NodeRef;
use serde::Serialize;
use serde_json::Value;

use super::open_session;
use super::output::{OutputFormat, SectionOutput, print_json, print_section};
use crate::EvalArgs;

#[derive(Debug, Serialize)]
struct EvalOutput {
    success: bool,
    sections: Vec<SectionOutput>,
    committed: BTreeMap<String, Value>,
}

/// Evaluate one section with everything it depends on. Logic sections are
/// answered from the document's fixtures. Returns false when any node failed.
pub async fn run(config: EngineConfig, args: EvalArgs, format: OutputFormat) -> Result<bool> {
    let session = open_session(config, &args.campaign, args.sets)?;
    let report = session.evaluate_section(&args.section).await?;

    let sections: Vec<SectionOutput> = report
        .order
        .iter()
        .filter(|node| NodeRef::parse(node).as_section().is_some())
        .filter_map(|node| report.outcomes.get(node))
        .map(SectionOutput::from)
        .collect();
    let committed: BTreeMap<String, Value> =
        report.committed.iter().map(|change| (change.name.clone(), change.new.clone())).collect();
    let success = report.is_success();

    match format {
        OutputFormat::Json => print_json(&EvalOutput { success, sections, committed })?,
        OutputFormat::Text => {
            sections.iter().for_each(print_section);
            if !committed.is_empty() {
                println!("committed:");
                for (name, value) in &committed {
                    println!("  @{name} = {value}");
                }
            }
            if let Some(err) = &report.commit_error {
                println!("commit failed: {err}");
            }
        }
    }
    Ok(success)
}
