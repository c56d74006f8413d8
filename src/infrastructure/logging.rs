//! Logging setup.
//!
//! Env-filtered `tracing` with a console layer and an optional daily-rolled
//! file layer. The returned [`WorkerGuard`] must be held by the caller for as
//! long as file logging should keep flushing; dropping it closes the writer.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::infrastructure::config::ConfigManager;
pub use crate::infrastructure::config::LoggingConfig;

/// Directory for rolled log files.
pub fn get_log_directory() -> PathBuf {
    ConfigManager::get_data_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(level);
        // Keep dependency chatter down unless TRACE is requested explicitly
        if !level.eq_ignore_ascii_case("trace") {
            for directive in [
                "sqlx::query=warn",
                "sqlx::sqlite=warn",
                "reqwest=info",
                "hyper=warn",
                "h2=warn",
                "tokio=info",
                "runtime=warn",
            ] {
                if let Ok(parsed) = directive.parse() {
                    filter = filter.add_directive(parsed);
                }
            }
            if let Ok(parsed) = format!("fieldtrace={level}").parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter
    })
}

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string())
}

/// Initialize the global subscriber from configuration.
///
/// Returns the file writer guard when file output is enabled; hold it for the
/// lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let registry = Registry::default().with(build_env_filter(&config.level));

    match (config.file_output, config.console_output) {
        (true, console) => {
            let log_dir = get_log_directory();
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create log directory {log_dir:?}"))?;

            let file_appender =
                rolling::daily(&log_dir, format!("{}.log", config.file_prefix));
            let (file_writer, guard) = non_blocking(file_appender);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(timer())
                    .with_target(true)
                    .with_ansi(false);
                if console {
                    let console_layer = fmt::Layer::new()
                        .with_writer(std::io::stderr)
                        .with_timer(timer())
                        .with_target(false);
                    registry
                        .with(file_layer)
                        .with(console_layer)
                        .try_init()
                        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
                } else {
                    registry
                        .with(file_layer)
                        .try_init()
                        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
                }
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(timer())
                    .with_target(false)
                    .with_ansi(false);
                if console {
                    let console_layer = fmt::Layer::new()
                        .with_writer(std::io::stderr)
                        .with_timer(timer())
                        .with_target(false);
                    registry
                        .with(file_layer)
                        .with(console_layer)
                        .try_init()
                        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
                } else {
                    registry
                        .with(file_layer)
                        .try_init()
                        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
                }
            }

            info!("Logging initialized (level={}, file={:?})", config.level, log_dir);
            Ok(Some(guard))
        }
        (false, true) => {
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_timer(timer())
                .with_target(false);
            registry
                .with(console_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
            info!("Logging initialized (level={}, console only)", config.level);
            Ok(None)
        }
        (false, false) => Err(anyhow!("No logging output configured")),
    }
}
