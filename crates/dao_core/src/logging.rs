use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::DeployerConfig;

const LOG_FILE_PREFIX: &str = "dao-deployer";

/// Default filter when `RUST_LOG` is unset. `config.log_level` sets the floor.
fn default_filter(level: &str) -> String {
    format!("{level},dao_chain=debug,dao_core=debug")
}

/// Initializes logging with a daily-rotated file under `<data_dir>/logs` plus
/// compact console output. The returned guard must outlive the process' work.
pub fn init_logging(config: &DeployerConfig) -> Result<WorkerGuard> {
    let logs_dir = config.logs_dir();
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// Initialize file-only logging to a custom directory with a custom filter.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}
