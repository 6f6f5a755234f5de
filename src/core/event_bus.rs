// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Event bus for inter-component communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::db::{MaintenanceAlert, Reading};

/// Event types in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Reading,
    Alert,
    Status,
    Error,
}

/// Generic event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Reading(Reading),
    Alert(MaintenanceAlert),
    Status { key: String, value: String },
    Error { message: String },
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    reading_tx: broadcast::Sender<Reading>,
    alert_tx: broadcast::Sender<MaintenanceAlert>,
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (reading_tx, _) = broadcast::channel(capacity);
        let (alert_tx, _) = broadcast::channel(capacity);
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            reading_tx,
            alert_tx,
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn publish_reading(&self, reading: Reading) {
        let _ = self.reading_tx.send(reading.clone());
        self.publish_event(EventType::Reading, EventPayload::Reading(reading));
    }

    pub fn publish_alert(&self, alert: MaintenanceAlert) {
        let _ = self.alert_tx.send(alert.clone());
        self.publish_event(EventType::Alert, EventPayload::Alert(alert));
    }

    pub fn publish_status(&self, key: &str, value: impl ToString) {
        self.publish_event(
            EventType::Status,
            EventPayload::Status {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub fn publish_error(&self, message: &str) {
        self.publish_event(
            EventType::Error,
            EventPayload::Error {
                message: message.to_string(),
            },
        );
    }

    fn publish_event(&self, event_type: EventType, payload: EventPayload) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.reading_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<MaintenanceAlert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_reaches_both_channels() {
        let bus = EventBus::new(16);
        let mut alerts = bus.subscribe_alerts();
        let mut events = bus.subscribe_events();

        bus.publish_alert(MaintenanceAlert::test_alert());

        assert_eq!(alerts.recv().await.unwrap().alert_type, "test_alert");
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Alert);
        assert_eq!(event.id, 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish_status("collector", "stopped");
        bus.publish_error("nothing listening");
    }
}
