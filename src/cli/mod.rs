// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Interactive shell
//!
//! Each line is parsed into a [`Command`] and executed against the running
//! [`App`]. Errors are printed and the shell keeps going; only `quit` (or end
//! of input) leaves it, and leaving always shuts the application down.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::core::App;
use crate::db::{title_case, Severity};

const DEFAULT_DATA_LIMIT: usize = 10;
const DEFAULT_CLEAR_DAYS: u32 = 365;
const DATA_PREVIEW: usize = 5;

/// Shell verbs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Connect,
    Disconnect,
    Start,
    Stop,
    Dashboard(Option<u16>),
    Data(usize),
    Alerts { resolved: bool },
    Predictions,
    Train(Option<String>),
    Export { start: String, end: String, format: String },
    Clear(u32),
    Test,
    Config,
    Dtc { clear: bool },
    Quit,
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "status" => Command::Status,
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "start" => Command::Start,
        "stop" => Command::Stop,
        "dashboard" => Command::Dashboard(parse_arg(args.first(), "port")?),
        "data" => Command::Data(parse_arg(args.first(), "limit")?.unwrap_or(DEFAULT_DATA_LIMIT)),
        "alerts" => Command::Alerts {
            resolved: args.iter().any(|a| a.eq_ignore_ascii_case("resolved")),
        },
        "predictions" => Command::Predictions,
        "train" => Command::Train(args.first().map(|s| s.to_string())),
        "export" => match args.as_slice() {
            [start, end, rest @ ..] => Command::Export {
                start: start.to_string(),
                end: end.to_string(),
                format: rest.first().map(|f| f.to_ascii_lowercase()).unwrap_or_else(|| "csv".to_string()),
            },
            _ => return Err("Usage: export <start_date> <end_date> [format]".to_string()),
        },
        "clear" => Command::Clear(parse_arg(args.first(), "days")?.unwrap_or(DEFAULT_CLEAR_DAYS)),
        "test" => Command::Test,
        "config" => Command::Config,
        "dtc" => Command::Dtc {
            clear: args.first().is_some_and(|a| a.eq_ignore_ascii_case("clear")),
        },
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&&str>, name: &str) -> Result<Option<T>, String> {
    arg.map(|s| s.parse::<T>().map_err(|_| format!("Invalid {}: {}", name, s)))
        .transpose()
}

fn flag(ok: bool) -> ColoredString {
    if ok {
        "✓".green()
    } else {
        "✗".red()
    }
}

fn show(value: Option<f64>, unit: &str) -> String {
    value.map(|v| format!("{:.1}{}", v, unit)).unwrap_or_else(|| "N/A".to_string())
}

/// Whether the shell should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    app: Arc<App>,
}

impl Shell {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Read commands from stdin until `quit` or end of input, then shut the
    /// application down
    pub async fn run(&self) -> Result<()> {
        println!("{}", "SmartOBD - Predictive Vehicle Maintenance".cyan());
        println!("{}", "Type 'help' for available commands".yellow());
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout.write_all(format!("{} ", "SmartOBD>".green()).as_bytes()).await?;
            stdout.flush().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", "Use 'quit' to exit".yellow());
                    continue;
                }
            };
            let Some(line) = line else { break };

            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(command)) => {
                    if self.execute(command).await == Flow::Exit {
                        println!("{}", "Goodbye!".yellow());
                        break;
                    }
                }
                Err(message) => {
                    println!("{}", message.red());
                    println!("Type 'help' for available commands");
                }
            }
        }

        info!("Interactive shell closed");
        self.app.shutdown().await;
        Ok(())
    }

    /// Run one command, printing its result or error
    pub async fn execute(&self, command: Command) -> Flow {
        if command == Command::Quit {
            return Flow::Exit;
        }
        if let Err(e) = self.dispatch(command).await {
            println!("{}", format!("Error: {:#}", e).red());
        }
        Flow::Continue
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        let app = &self.app;
        match command {
            Command::Help => print_help(),
            Command::Status => self.show_status().await,
            Command::Connect => {
                println!("{}", "Connecting to OBD-II device...".yellow());
                if !app.connect_obd().await {
                    anyhow::bail!("failed to connect to OBD-II device");
                }
                println!("{}", "Successfully connected to OBD-II device".green());
                if let Some(info) = app.vehicle_info().await {
                    println!("{}", "Vehicle Information:".cyan());
                    if let Some(vin) = info.vin {
                        println!("  VIN: {}", vin);
                    }
                    println!("  Adapter: {}", info.adapter);
                    println!("  Supported Commands: {}", info.supported_commands.len());
                }
            }
            Command::Disconnect => {
                println!("{}", "Disconnecting from OBD-II device...".yellow());
                app.disconnect_obd().await;
                println!("{}", "Disconnected from OBD-II device".green());
            }
            Command::Start => {
                println!("{}", "Starting monitoring mode...".yellow());
                app.start_monitoring().await?;
                println!("{}", "Monitoring mode started".green());
            }
            Command::Stop => {
                println!("{}", "Stopping monitoring mode...".yellow());
                app.stop_monitoring().await;
                println!("{}", "Monitoring mode stopped".green());
            }
            Command::Dashboard(port) => {
                let settings = &app.settings().app;
                let port = port.unwrap_or(settings.port);
                println!("{}", format!("Starting web dashboard on port {}...", port).yellow());
                let addr = app.start_dashboard(&settings.host, port).await?;
                println!("{}", format!("Open your browser to: http://localhost:{}", addr.port()).cyan());
            }
            Command::Data(limit) => self.show_data(limit).await?,
            Command::Alerts { resolved } => self.show_alerts(resolved).await?,
            Command::Predictions => {
                let predictions = app.predictions().await?;
                println!("\n{}", "Maintenance Predictions:".cyan());
                for (kind, status) in predictions {
                    let state = if status.model_loaded { "Loaded".green() } else { "Not Loaded".red() };
                    print!("  {}: {}", title_case(&kind), state);
                    if let (Some(trained), Some(accuracy)) = (status.last_training, status.accuracy) {
                        print!(" (trained {}, accuracy {:.1}%)", trained.format("%Y-%m-%d %H:%M"), accuracy * 100.0);
                    }
                    println!();
                }
            }
            Command::Train(vehicle_id) => {
                println!("{}", "Training maintenance prediction models...".yellow());
                let report = app.train_models(vehicle_id).await?;
                println!("{}", format!("Model training completed on {} readings", report.rows).green());
                for (kind, accuracy) in &report.trained {
                    println!("  {}: accuracy {:.1}%", title_case(kind), accuracy * 100.0);
                }
                for (kind, reason) in &report.skipped {
                    println!("  {}: {}", title_case(kind), format!("skipped ({})", reason).yellow());
                }
            }
            Command::Export { start, end, format } => {
                println!("{}", format!("Exporting data from {} to {}...", start, end).yellow());
                match app.export_data(&start, &end, &format).await? {
                    Some(path) => println!("{}", format!("Data exported to: {}", path.display()).green()),
                    None => println!("{}", "No data in that range, nothing exported".yellow()),
                }
            }
            Command::Clear(days) => {
                println!("{}", format!("Clearing data older than {} days...", days).yellow());
                let deleted = app.clear_old_data(days).await?;
                println!("{}", format!("Cleared {} old records", deleted).green());
            }
            Command::Test => {
                println!("{}", "Testing notification systems...".yellow());
                let results = app.test_notifications().await;
                println!("\n{}", "Notification Test Results:".cyan());
                if results.is_empty() {
                    println!("  No notification channels enabled");
                }
                for (channel, ok) in results {
                    println!("  {}: {}", title_case(&channel), if ok { "PASS".green() } else { "FAIL".red() });
                }
            }
            Command::Config => self.show_config()?,
            Command::Dtc { clear } => {
                if clear {
                    let cleared = app.clear_dtc_codes().await?;
                    if cleared {
                        println!("{}", "Diagnostic trouble codes cleared".green());
                    } else {
                        println!("{}", "Adapter did not confirm the clear".yellow());
                    }
                } else {
                    let codes = app.dtc_codes().await?;
                    if codes.is_empty() {
                        println!("{}", "No diagnostic trouble codes stored".green());
                    } else {
                        println!("\n{}", "Diagnostic Trouble Codes:".cyan());
                        for code in codes {
                            println!("  {}", code.red());
                        }
                    }
                }
            }
            Command::Quit => {}
        }
        Ok(())
    }

    async fn show_status(&self) {
        let status = self.app.status().await;
        println!("\n{}", "System Status:".cyan());
        println!("  Application Running: {}", flag(status.is_running));
        println!("  OBD Connected: {}", flag(status.obd_connected));
        println!("  Data Collection: {}", flag(status.data_collection_active));
        println!("  Dashboard Running: {}", flag(status.dashboard_running));
        println!("  Database Connected: {}", flag(status.database_connected));
        println!("  Pending Alerts: {}", status.pending_alerts);
        println!(
            "  Collected / Flushed: {} / {} (buffered {})",
            status.collection.total_collected, status.collection.total_flushed, status.collection.buffer_size
        );
        if let Some(ts) = status.last_prediction {
            println!("  Last Prediction: {}", ts.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    async fn show_data(&self, limit: usize) -> Result<()> {
        let readings = self.app.recent_readings(limit).await?;
        if readings.is_empty() {
            println!("{}", "No data available".yellow());
            return Ok(());
        }

        println!("\n{}", format!("Recent OBD Data (Last {} records):", readings.len()).cyan());
        for (i, reading) in readings.iter().take(DATA_PREVIEW).enumerate() {
            let s = &reading.sensors;
            println!("\n{}", format!("Record {}:", i + 1).green());
            println!("  Timestamp: {}", reading.timestamp.format("%Y-%m-%d %H:%M:%S"));
            println!("  Vehicle: {}", reading.vehicle_id);
            println!("  RPM: {}", show(s.rpm, ""));
            println!("  Speed: {}", show(s.speed, " km/h"));
            println!("  Engine Load: {}", show(s.engine_load, "%"));
            println!("  Coolant Temp: {}", show(s.coolant_temp, "°C"));
            println!("  Fuel Level: {}", show(s.fuel_level, "%"));
        }
        if readings.len() > DATA_PREVIEW {
            println!("\n{}", format!("... and {} more records", readings.len() - DATA_PREVIEW).yellow());
        }
        Ok(())
    }

    async fn show_alerts(&self, resolved: bool) -> Result<()> {
        let alerts = self.app.alerts(resolved).await?;
        if alerts.is_empty() {
            println!("{}", format!("No {} alerts", if resolved { "resolved" } else { "active" }).yellow());
            return Ok(());
        }

        println!("\n{}", "Maintenance Alerts:".cyan());
        for alert in alerts {
            let title = alert.title();
            let title = match alert.severity {
                Severity::Low => title.green(),
                Severity::Medium => title.yellow(),
                Severity::High => title.red(),
                Severity::Critical => title.magenta(),
            };
            println!("\n{}", title);
            println!("  Message: {}", alert.message);
            println!("  Severity: {}", alert.severity);
            println!("  Confidence: {:.1}%", alert.confidence * 100.0);
            println!("  Created: {}", alert.created_at.format("%Y-%m-%d %H:%M:%S"));
        }
        Ok(())
    }

    fn show_config(&self) -> Result<()> {
        let config = self.app.config();
        let settings = config.settings();
        println!("\n{}", "Configuration:".cyan());
        println!("  File: {}", config.path().display());
        println!("  App Name: {}", settings.app.name);
        println!("  Version: {}", settings.app.version);
        println!("  Database: {}", settings.database.kind);
        println!("  OBD Connection: {}", settings.obd.connection_type);
        println!("  Log Level: {}", settings.logging.level);

        let channels: Vec<String> = self
            .app
            .notification_status()
            .into_iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, s)| if s.configured { name } else { format!("{} (unconfigured)", name) })
            .collect();
        println!(
            "  Notifications: {}",
            if channels.is_empty() { "none".to_string() } else { channels.join(", ") }
        );
        Ok(())
    }
}

fn print_help() {
    println!(
        r#"
{}

{}
  status                    - Show system status
  connect                   - Connect to OBD-II device
  disconnect                - Disconnect from OBD-II device
  start                     - Start monitoring mode
  stop                      - Stop monitoring mode
  dashboard [port]          - Start web dashboard (default port: 5000)
  dtc [clear]               - Read (or clear) diagnostic trouble codes

{}
  data [limit]              - Show recent OBD data (default: 10 records)
  alerts [resolved]         - Show maintenance alerts ('resolved' for resolved ones)
  predictions               - Show maintenance model status
  export <start> <end> [format] - Export data (format: csv/json)

{}
  train [vehicle_id]        - Train maintenance prediction models

{}
  clear [days]              - Clear old data (default: 365 days)
  test                      - Test notification channels
  config                    - Show configuration
  help                      - Show this help
  quit/exit/q               - Exit application

{}
  SmartOBD> connect
  SmartOBD> dashboard 8080
  SmartOBD> export 2024-01-01 2024-12-31 csv
"#,
        "Available Commands:".cyan(),
        "System Commands:".green(),
        "Data Commands:".green(),
        "ML Commands:".green(),
        "Utility Commands:".green(),
        "Examples:".yellow(),
    );
}
