//! Utility functions and helpers
//!
//! Logging setup and human-readable formatting.

use crate::config::{LogFormat, LogLevel};
use crate::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level` when set. With a `log_file` the returned guard
/// must be kept alive for buffered lines to be flushed.
pub fn init_logging(
    level: LogLevel,
    format: LogFormat,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from(tracing::Level::from(level)).into())
    });

    let stdout_layer = match format {
        LogFormat::Plain => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::config(format!("Invalid log file: {}", path.display())))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to initialise logging: {}", e)))?;

    Ok(guard)
}

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hash_rate() {
        assert_eq!(format_hash_rate(500.0), "500.00 H/s");
        assert_eq!(format_hash_rate(1500.0), "1.50 KH/s");
        assert_eq!(format_hash_rate(2_500_000.0), "2.50 MH/s");
        assert_eq!(format_hash_rate(1e21), "1000000.00 PH/s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(384), "384 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
