use std::fs;

use anyhow::{Context, Result};
use tallyman_recorder::config::LoggingConfig;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber. The returned guard flushes the log file
/// and must live as long as the program.
pub fn initialize_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let log_level = parse_level(&config.level);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("tallyman_recorder={log_level}").parse()?)
        .add_directive(format!("tallyctl={log_level}").parse()?)
        .add_directive("tokio=warn".parse()?);

    let (writer, guard) = match &config.file_path {
        Some(path) => {
            let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty());
            if let Some(directory) = directory {
                fs::create_dir_all(directory)
                    .with_context(|| format!("creating log directory {}", directory.display()))?;
            }
            let file_name = path
                .file_name()
                .with_context(|| format!("log path has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(directory.unwrap_or_else(|| ".".as_ref()), file_name);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
            .context("installing the tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(writer))
            .try_init()
            .context("installing the tracing subscriber")?;
    }

    Ok(guard)
}
