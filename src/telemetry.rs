use tracing_subscriber::{fmt, filter::EnvFilter};
use crate::config::Config;
use crate::error::Result;

/// Initialize global logging based on env or config.
/// Order: VMHEALTH_LOG env -> cfg.log_level -> "warn".
/// Logs go to stderr; stdout carries the operator-facing report.
pub fn init_telemetry(cfg: &Config) -> Result<()> {
    let filter = build_filter(std::env::var("VMHEALTH_LOG").ok(), &cfg.log_level);

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    tracing::debug!("telemetry initialized");
    Ok(())
}

fn build_filter(from_env: Option<String>, configured: &str) -> EnvFilter {
    match from_env {
        Some(s) => EnvFilter::try_new(s),
        None => EnvFilter::try_new(configured),
    }
    .unwrap_or_else(|_| EnvFilter::new("warn"))
}
