//! Process-wide tracing setup.
//!
//! Console output is compact and filtered by `RUST_LOG` (default `info`).
//! When a log directory is given, the same events are also written to a
//! daily rolling file named after the config, keeping the last few days.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Rolled log files kept per config.
pub const MAX_LOG_FILES: usize = 5;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it until the
/// process exits.
pub fn init(log_dir: Option<&Path>, file_prefix: &str) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().compact().with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(file_prefix)
                .filename_suffix("log")
                .max_log_files(MAX_LOG_FILES)
                .build(dir)
                .with_context(|| format!("opening log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

/// File prefix for a config path: its file stem, or `sftp-relay`.
pub fn file_prefix(config_path: &Path) -> String {
    config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
