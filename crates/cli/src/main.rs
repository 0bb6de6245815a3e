mod cmd;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use flowvars_core::config::ConfigLoader;
use serde_json::Value;

use crate::cmd::output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "fv", version, about = "Check, order and evaluate interpolated campaign documents")]
struct Cli {
    /// Engine configuration file (defaults to ~/.config/flowvars/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a campaign: graph warnings, template errors, publishability
    Check(DocArgs),

    /// Print the order sections and variables resolve in
    Order(DocArgs),

    /// Show what breaks if a variable is removed
    Impact(ImpactArgs),

    /// Preview sections against the document's values
    Render(RenderArgs),

    /// Evaluate a section and its dependencies, answering logic from fixtures
    Eval(EvalArgs),
}

#[derive(Debug, Args)]
pub struct DocArgs {
    /// Campaign document (YAML)
    pub campaign: PathBuf,
}

#[derive(Debug, Args)]
pub struct ImpactArgs {
    /// Campaign document (YAML)
    pub campaign: PathBuf,

    /// Variable name, without the leading '@'
    pub variable: String,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Campaign document (YAML)
    pub campaign: PathBuf,

    /// Only render this section
    #[arg(long)]
    pub section: Option<String>,

    /// Override a value, e.g. --set price=10 or --set name=Ada
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = cmd::parse_assignment)]
    pub sets: Vec<(String, Value)>,
}

#[derive(Debug, Args)]
pub struct EvalArgs {
    /// Campaign document (YAML)
    pub campaign: PathBuf,

    /// Section to evaluate
    #[arg(long)]
    pub section: String,

    /// Override a value, e.g. --set price=10 or --set name=Ada
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = cmd::parse_assignment)]
    pub sets: Vec<(String, Value)>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.as_deref()).wrap_err("failed to load engine configuration")?;
    logging::init(&config.logging)?;

    let format = if cli.json { OutputFormat::Json } else { OutputFormat::Text };
    let ok = match cli.command {
        Commands::Check(args) => cmd::check::run(config, &args.campaign, format)?,
        Commands::Order(args) => cmd::order::run(config, &args.campaign, format)?,
        Commands::Impact(args) => cmd::impact::run(config, &args.campaign, &args.variable, format)?,
        Commands::Render(args) => cmd::render::run(config, args, format)?,
        Commands::Eval(args) => cmd::eval::run(config, args, format).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
