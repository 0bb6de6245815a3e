use color_eyre::eyre::Result;
use flowvars_core::config::EngineConfig;

use super::open_session;
use super::output::{OutputFormat, SectionOutput, print_json, print_section};
use crate::RenderArgs;

/// Preview sections. Problems show up as diagnostics; only an unknown
/// section id fails the command.
pub fn run(config: EngineConfig, args: RenderArgs, format: OutputFormat) -> Result<bool> {
    let session = open_session(config, &args.campaign, args.sets)?;

    let ids = match args.section {
        Some(id) => vec![id],
        None => session.sections().ids().to_vec(),
    };

    let mut rendered = Vec::with_capacity(ids.len());
    for id in &ids {
        let outcome = session.render_preview(id)?;
        rendered.push(SectionOutput::from(&outcome));
    }

    match format {
        OutputFormat::Json => print_json(&rendered)?,
        OutputFormat::Text => rendered.iter().for_each(print_section),
    }
    Ok(true)
}
