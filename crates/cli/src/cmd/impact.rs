use std::path::Path;

use color_eyre::eyre::{Result, bail};
use flowvars_core::config::EngineConfig;
use flowvars_core::graph::var_node;

use super::open_session;
use super::output::{OutputFormat, print_json};

pub fn run(config: EngineConfig, path: &Path, variable: &str, format: OutputFormat) -> Result<bool> {
    let session = open_session(config, path, Vec::new())?;
    let variable = variable.trim_start_matches('@');
    let node = var_node(variable);
    if !session.tracker().contains(&node) {
        bail!("no section declares or reads '@{variable}'");
    }

    let impact = session.tracker().removal_impact(&node);
    match format {
        OutputFormat::Json => print_json(&impact)?,
        OutputFormat::Text if impact.is_safe() => println!("nothing depends on @{variable}"),
        OutputFormat::Text => {
            println!("removing @{variable} affects {} node(s):", impact.dependents.len());
            for node in &impact.dependents {
                println!("  {node}");
            }
        }
    }
    Ok(true)
}
