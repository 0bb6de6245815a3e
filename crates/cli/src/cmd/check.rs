use std::path::Path;

use color_eyre::eyre::Result;
use flowvars_core::CampaignReport;
use flowvars_core::config::EngineConfig;
use serde::Serialize;

use super::open_session;
use super::output::{OutputFormat, print_json};

#[derive(Debug, Serialize)]
struct CheckOutput<'a> {
    campaign: String,
    publishable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a CampaignReport>,
}

/// Validate a campaign. Returns whether it can be published.
pub fn run(config: EngineConfig, path: &Path, format: OutputFormat) -> Result<bool> {
    let campaign = path.display().to_string();

    let session = match open_session(config, path, Vec::new()) {
        Ok(session) => session,
        Err(e) => {
            let rejected = format!("{e:#}");
            match format {
                OutputFormat::Json => print_json(&CheckOutput {
                    campaign,
                    publishable: false,
                    rejected: Some(rejected),
                    warnings: Vec::new(),
                    errors: Vec::new(),
                    report: None,
                })?,
                OutputFormat::Text => {
                    println!("FAIL fv check");
                    println!("campaign: {campaign}");
                    println!("rejected: {rejected}");
                }
            }
            return Ok(false);
        }
    };

    let report = session.validate();
    let warnings = report.warnings();
    let errors = report.errors();

    match format {
        OutputFormat::Json => print_json(&CheckOutput {
            campaign,
            publishable: report.publishable,
            rejected: None,
            warnings,
            errors,
            report: Some(&report),
        })?,
        OutputFormat::Text => {
            println!("{} fv check", if report.publishable { "OK  " } else { "FAIL" });
            println!("campaign: {campaign}");
            println!("sections: {}", session.sections().len());
            println!("variables: {}", session.registry().len());
            for w in &warnings {
                println!("warning: {w}");
            }
            for e in &errors {
                println!("error: {e}");
            }
            if report.publishable && !warnings.is_empty() && !session.config().publish.block_on_warnings {
                println!("(warnings do not block publishing; set [publish] block_on_warnings to enforce)");
            }
        }
    }

    Ok(report.publishable)
}
