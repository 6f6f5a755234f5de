// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! SmartOBD - Vehicle Telemetry and Predictive Maintenance
//!
//! Polls an ELM327-compatible OBD-II adapter, stores the readings, trains
//! per-maintenance-kind classifiers on the history, and raises alerts that
//! are delivered over e-mail, SMS, push and webhooks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         App (core)                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌────────┐ │
//! │  │ ObdConn.  │ → │ Collector  │ → │ Database  │ → │ Export │ │
//! │  │ (ELM327)  │   │ (batches)  │   │ (SQLite)  │   │ csv/js │ │
//! │  └───────────┘   └────────────┘   └───────────┘   └────────┘ │
//! │        ↓               ↓                ↓                    │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                       Event Bus                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │        ↓               ↓                ↓                    │
//! │  ┌───────────┐   ┌────────────┐   ┌───────────────────────┐  │
//! │  │ Dashboard │   │ Predictor  │ → │ Notification channels │  │
//! │  │ HTTP + WS │   │ (forests)  │   │ email/sms/push/hook   │  │
//! │  └───────────┘   └────────────┘   └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod ml;
pub mod notify;
pub mod obd;
pub mod streaming;
pub mod web;

// Re-exports for convenience
pub use config::Config;
pub use core::{App, EventBus};
pub use db::Database;
pub use ml::Predictor;
pub use notify::NotificationManager;
pub use obd::{DataCollector, ObdConnection};

/// SmartOBD version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// SmartOBD name
pub const NAME: &str = "SmartOBD";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: String,
    pub target: String,
    pub os: String,
    pub features: Vec<String>,
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "serial")]
    features.push("serial".to_string());

    features
}
