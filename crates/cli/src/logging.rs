use color_eyre::eyre::{Result, WrapErr};
use flowvars_core::config::LoggingConfig;
use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

static LOG_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(None);

/// Install the stderr layer and, when `[logging] file` is set, a
/// non-blocking file layer with its own level.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    let stderr_level = parse_level(&cfg.level).unwrap_or(LevelFilter::INFO);
    let stderr_filter = EnvFilter::builder().with_default_directive(stderr_level.into()).from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_filter(stderr_filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let Some(ref path) = cfg.file else {
        registry.init();
        return Ok(());
    };

    let file_level_str = cfg.file_level.as_deref().unwrap_or(&cfg.level);
    let file_level = parse_level(file_level_str).unwrap_or(LevelFilter::DEBUG);
    let file_filter = EnvFilter::builder().with_default_directive(file_level.into()).from_env_lossy();

    let file = File::create(path).wrap_err_with(|| format!("failed to create log file {}", path.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // keep the writer thread alive for the whole process
    if let Ok(mut g) = LOG_GUARD.lock() {
        *g = Some(guard);
    }

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(file_filter);

    registry.with(file_layer).init();
    Ok(())
}

fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}
