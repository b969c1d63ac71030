//! Logging setup for the scanner and CLI
//!
//! Installs `env_logger` behind the `log` facade, writing
//! `[millis] [LEVEL] [target] message` lines to `mftindex.log` next to the
//! executable. Falls back to stderr when the file cannot be created.
//! `RUST_LOG` overrides the requested level.

use log::{info, LevelFilter};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

/// Log file path (same directory as executable)
pub fn log_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mftindex.log")
}

/// Initialize the global logger. Returns the log file path when logging to
/// a file. Later calls leave the first logger in place.
pub fn init(level: LevelFilter) -> Option<PathBuf> {
    let path = log_path();
    let file = File::create(&path).ok();

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            writeln!(
                buf,
                "[{:013}] [{:5}] [{}] {}",
                timestamp,
                record.level(),
                record.target(),
                record.args()
            )
        });

    let logged_to = match file {
        Some(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            Some(path)
        }
        None => {
            builder.target(env_logger::Target::Stderr);
            None
        }
    };

    builder.try_init().ok().and(logged_to)
}

/// Write a separator line for readability
pub fn separator(label: &str) {
    info!(target: "---", "========== {} ==========", label);
}
