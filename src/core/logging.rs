// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Logging setup, run once at startup

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;

/// Dependencies that are far too chatty at `info`
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "tower_http", "rustls", "tungstenite", "lettre"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. `RUST_LOG` wins over the configured level;
/// `debug` forces debug output.
pub fn init(settings: &LoggingSettings, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { level_directive(&settings.level) };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(level)?,
    };

    let mut layers: Vec<BoxedLayer> = vec![if settings.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).with_file(debug).with_line_number(debug).boxed()
    }];

    if let Some(path) = &settings.file_path {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("cannot create log directory {}", dir.display()))?;
        }
        rotate(path, settings.max_file_size_mb * 1024 * 1024, settings.backup_count)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        let writer = Arc::new(file);
        layers.push(if settings.json {
            fmt::layer().json().with_writer(writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(writer).boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("logging already initialized")?;
    Ok(())
}

/// Map configured level names onto tracing directives
pub fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level)?;
    for target in NOISY_TARGETS {
        filter = filter.add_directive(format!("{}=warn", target).parse()?);
    }
    Ok(filter)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Roll `path` over to `path.1` (shifting older backups) when it has grown
/// past `max_bytes`. At most `backups` old files are kept.
pub fn rotate(path: &Path, max_bytes: u64, backups: usize) -> std::io::Result<bool> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if max_bytes == 0 || size < max_bytes {
        return Ok(false);
    }

    if backups == 0 {
        std::fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for index in (1..backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("warning"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("verbose"), "info");
        assert!(default_filter("debug").is_ok());
    }

    #[test]
    fn test_rotation_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("smartobd.log");

        for round in 0..4 {
            std::fs::write(&log, format!("round {}", round)).unwrap();
            assert!(rotate(&log, 4, 2).unwrap());
        }

        assert!(!log.exists());
        assert_eq!(std::fs::read_to_string(backup_path(&log, 1)).unwrap(), "round 3");
        assert_eq!(std::fs::read_to_string(backup_path(&log, 2)).unwrap(), "round 2");
        assert!(!backup_path(&log, 3).exists());
    }

    #[test]
    fn test_small_or_missing_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("smartobd.log");
        assert!(!rotate(&log, 1024, 5).unwrap());

        std::fs::write(&log, "short").unwrap();
        assert!(!rotate(&log, 1024, 5).unwrap());
        assert!(log.exists());
    }
}
