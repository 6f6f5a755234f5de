// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Streaming module - WebSocket push channel and data export

mod export;
mod websocket;

pub use export::{export_readings, parse_datetime, ExportError, ExportFormat};
pub use websocket::{PushContext, PushServer};
