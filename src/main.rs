// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! SmartOBD - Predictive Vehicle Maintenance Powered by OBD-II
//!
//! Modes:
//! - `--connect`: connect to the adapter and collect data
//! - `--dashboard`: serve the web dashboard
//! - `--monitor`: collect, predict and notify in the background
//! - no flag: interactive shell

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use smartobd::cli::Shell;
use smartobd::core::logging;
use smartobd::{build_info, App, Config, VERSION};

/// SmartOBD - Predictive Vehicle Maintenance Powered by OBD-II
#[derive(Parser, Debug)]
#[command(name = "smartobd")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Vehicle OBD-II telemetry collection and predictive maintenance")]
#[command(after_help = "Examples:
  smartobd --connect                   Connect to OBD-II device
  smartobd --dashboard --port 8080     Start web dashboard
  smartobd --monitor                   Start monitoring mode
  smartobd --config config_local.toml  Use custom config")]
struct Args {
    /// Connect to OBD-II device and start data collection
    #[arg(long)]
    connect: bool,

    /// Start web dashboard server
    #[arg(long)]
    dashboard: bool,

    /// Start monitoring mode (background collection, prediction, alerts)
    #[arg(long)]
    monitor: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Port for web dashboard (default from config, 5000)
    #[arg(long)]
    port: Option<u16>,

    /// Host for web dashboard (default from config, 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Logging level
    #[arg(long, value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    log_level: Option<String>,

    /// Write a default configuration file to --config and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init_config {
        Config::write_default(&args.config)
            .with_context(|| format!("failed to write {}", args.config.display()))?;
        println!("Default configuration written to {}", args.config.display());
        return Ok(());
    }

    let config = Config::load(&args.config)?;
    config.validate()?;

    let mut log_settings = config.settings().logging.clone();
    if let Some(level) = &args.log_level {
        log_settings.level = level.clone();
    }
    logging::init(&log_settings, args.debug)?;

    let info = build_info();
    info!("Starting SmartOBD v{} ({}/{})", info.version, info.os, info.target);
    info!("Configuration loaded from {}", args.config.display());

    let app = App::new(config)?;
    let host = args.host.clone().unwrap_or_else(|| app.settings().app.host.clone());
    let port = args.port.unwrap_or(app.settings().app.port);

    let result = if args.connect {
        info!("Starting OBD-II connection mode...");
        run_until_interrupted(&app, async {
            if !app.connect_obd().await {
                anyhow::bail!("failed to connect to OBD-II device");
            }
            app.start_data_collection()?;
            Ok::<(), anyhow::Error>(())
        })
        .await
    } else if args.dashboard {
        info!("Starting web dashboard...");
        run_until_interrupted(&app, async {
            app.start_dashboard(&host, port).await?;
            Ok::<(), anyhow::Error>(())
        })
        .await
    } else if args.monitor {
        info!("Starting monitoring mode...");
        run_until_interrupted(&app, app.start_monitoring()).await
    } else {
        info!("Starting interactive CLI mode...");
        Shell::new(app.clone()).run().await
    };

    if let Err(e) = &result {
        error!("Application error: {:#}", e);
    }
    result
}

/// Run `start`, then keep the process alive until Ctrl+C and shut down
async fn run_until_interrupted<F>(app: &Arc<App>, start: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    if let Err(e) = start.await {
        app.shutdown().await;
        return Err(e);
    }

    info!("Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("Application interrupted by user");

    app.shutdown().await;
    Ok(())
}
