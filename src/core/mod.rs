// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Core module - orchestration, events and background workers

mod app;
mod event_bus;
pub mod logging;
mod worker;

pub use app::{App, AppStatus, CycleReport};
pub use event_bus::{Event, EventBus, EventPayload, EventType};
pub use worker::Worker;

#[cfg(test)]
pub(crate) use app::tests::test_app;
