//! Tracing subscriber setup shared by the binaries.
//!
//! Filter precedence: `NHC_DEBUG_LOG=1` forces debug, then `RUST_LOG`, then
//! the configured level, then `info`. Logs go to stderr unless a file is
//! configured; stdout stays reserved for notifications.

use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::{is_truthy, LoggingConfig};

pub const DEBUG_ENV: &str = "NHC_DEBUG_LOG";

fn filter_for(config: &LoggingConfig) -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false);
    if debug_enabled {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.level.as_deref().unwrap_or("info");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Installs the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = filter_for(config);

    if let Some(path) = &config.file {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| parent.to_path_buf())
            .unwrap_or_else(|| ".".into());
        if let (Some(name), Ok(())) = (path.file_name(), fs_err::create_dir_all(&dir)) {
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .is_ok();
            return installed.then_some(guard);
        }
        eprintln!(
            "nhcwatch: cannot open log file {}; logging to stderr",
            path.display()
        );
        return init_stderr(filter_for(config));
    }

    init_stderr(filter)
}

fn init_stderr(filter: EnvFilter) -> Option<WorkerGuard> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    None
}
