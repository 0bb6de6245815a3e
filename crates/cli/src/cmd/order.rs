use std::path::Path;

use color_eyre::eyre::Result;
use flowvars_core::config::EngineConfig;
use serde::Serialize;

use super::open_session;
use super::output::{OutputFormat, print_json};

#[derive(Debug, Serialize)]
struct OrderOutput {
    order: Vec<String>,
    /// Groups of nodes with no dependencies on each other.
    waves: Vec<Vec<String>>,
}

pub fn run(config: EngineConfig, path: &Path, format: OutputFormat) -> Result<bool> {
    let session = open_session(config, path, Vec::new())?;
    let tracker = session.tracker();
    let order = tracker.topological_order()?;

    match format {
        OutputFormat::Json => {
            let waves = tracker.evaluation_waves(&order);
            print_json(&OrderOutput { order, waves })?;
        }
        OutputFormat::Text => {
            for (i, node) in order.iter().enumerate() {
                println!("{:>3}. {node}", i + 1);
            }
        }
    }
    Ok(true)
}
