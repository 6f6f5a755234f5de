// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! OBD-II adapter access and data collection
//!
//! Layers, bottom-up:
//! - [`ObdTransport`]: raw byte channel to an ELM327 (TCP, serial, simulator)
//! - [`Elm327`]: AT/OBD command framing and response decoding
//! - [`ObdConnection`]: lifecycle, retries and locking around one adapter
//! - [`DataCollector`]: the background polling loop

mod collector;
mod connection;
mod elm327;
mod pid;
mod simulator;
mod transport;

pub use collector::{CollectionStats, CollectorError, DataCollector, UNKNOWN_VEHICLE};
pub use connection::{ConnectionState, ObdConnection, SensorSnapshot, TransportFactory, VehicleMetadata};
pub use elm327::{decode_dtcs, decode_mode01, decode_vin, response_lines, Elm327};
pub use pid::{Pid, SensorValues};
pub use simulator::{SimulatedTransport, SimulatorControl};
pub use transport::{transport_for, ObdTransport, TcpTransport};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

use std::time::Duration;
use thiserror::Error;

/// Adapter errors
#[derive(Debug, Error)]
pub enum ObdError {
    #[error("adapter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("adapter did not answer within {0:?}")]
    Timeout(Duration),

    #[error("adapter transport is not open")]
    NotOpen,

    #[error("not connected to a vehicle")]
    NotConnected,

    #[error("adapter rejected command {0}")]
    Rejected(String),

    #[error("unexpected response to {command}: {response:?}")]
    BadResponse { command: String, response: String },

    #[error("vehicle did not respond: {0}")]
    VehicleUnavailable(String),

    #[error("transport unavailable: {0}")]
    Unsupported(String),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
