// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Alert delivery over e-mail, SMS, push and webhook channels.
//!
//! Only channels enabled in configuration are constructed. A channel that is
//! enabled but missing credentials is skipped with a warning, and a failure
//! on one channel never stops delivery on the others.

mod email;
mod push;
mod sms;
mod webhook;

pub use email::EmailChannel;
pub use push::PushChannel;
pub use sms::SmsChannel;
pub use webhook::WebhookChannel;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::NotificationSettings;
use crate::db::MaintenanceAlert;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} channel is not configured")]
    NotConfigured(&'static str),

    #[error("no recipients configured for {0}")]
    NoRecipients(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned HTTP {status}: {body}")]
    Status {
        channel: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid e-mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build e-mail: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A delivery channel for maintenance alerts
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel type name (`email`, `sms`, `push`, `webhook`)
    fn name(&self) -> &'static str;

    /// Whether the credentials needed to send are present
    fn is_configured(&self) -> bool;

    async fn send(&self, alert: &MaintenanceAlert) -> Result<(), NotifyError>;
}

/// Per-channel delivery counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTally {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub alerts: usize,
    pub channels: BTreeMap<String, ChannelTally>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.channels.values().map(|t| t.sent).sum()
    }

    pub fn failed(&self) -> usize {
        self.channels.values().map(|t| t.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.channels.values().map(|t| t.skipped).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub enabled: bool,
    pub configured: bool,
}

pub struct NotificationManager {
    channels: Vec<Box<dyn NotificationChannel>>,
    status: BTreeMap<String, ChannelStatus>,
}

impl NotificationManager {
    /// Build the enabled channels from configuration
    pub fn new(settings: &NotificationSettings) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if settings.email.enabled {
            match EmailChannel::new(&settings.email) {
                Ok(channel) => channels.push(Box::new(channel)),
                Err(e) => error!("E-mail channel unavailable: {}", e),
            }
        }
        if settings.sms.enabled {
            channels.push(Box::new(SmsChannel::new(&settings.sms)));
        }
        if settings.push.enabled {
            channels.push(Box::new(PushChannel::new(&settings.push)));
        }
        if settings.webhook.enabled {
            channels.push(Box::new(WebhookChannel::new(&settings.webhook)));
        }

        let mut manager = Self::with_channels(channels);
        manager.status = status_from_settings(settings);
        info!("Notification manager ready with {} channel(s)", manager.channels.len());
        manager
    }

    pub fn with_channels(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        let status = channels
            .iter()
            .map(|c| {
                (
                    c.name().to_string(),
                    ChannelStatus {
                        enabled: true,
                        configured: c.is_configured(),
                    },
                )
            })
            .collect();
        Self { channels, status }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver every alert on every enabled channel
    pub async fn send_alerts(&self, alerts: &[MaintenanceAlert]) -> DispatchReport {
        let mut report = DispatchReport {
            alerts: alerts.len(),
            ..DispatchReport::default()
        };
        if alerts.is_empty() {
            return report;
        }

        info!("Sending {} maintenance alerts", alerts.len());
        for alert in alerts {
            for channel in &self.channels {
                let tally = report.channels.entry(channel.name().to_string()).or_default();

                if !channel.is_configured() {
                    warn!("{} credentials not configured, skipping", channel.name());
                    tally.skipped += 1;
                    continue;
                }

                match channel.send(alert).await {
                    Ok(()) => {
                        info!("{} alert sent for {}", channel.name(), alert.alert_type);
                        tally.sent += 1;
                    }
                    Err(e) => {
                        error!("Error sending {} alert for {}: {}", channel.name(), alert.alert_type, e);
                        tally.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Send a synthetic alert through each enabled channel, all at once
    pub async fn test_notifications(&self) -> BTreeMap<String, bool> {
        let alert = MaintenanceAlert::test_alert();

        let sends = self.channels.iter().map(|channel| {
            let alert = &alert;
            async move {
                let ok = if channel.is_configured() {
                    match channel.send(alert).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Test notification via {} failed: {}", channel.name(), e);
                            false
                        }
                    }
                } else {
                    false
                };
                (channel.name().to_string(), ok)
            }
        });

        join_all(sends).await.into_iter().collect()
    }

    /// Enabled/configured flags per channel
    pub fn status(&self) -> BTreeMap<String, ChannelStatus> {
        self.status.clone()
    }
}

fn status_from_settings(settings: &NotificationSettings) -> BTreeMap<String, ChannelStatus> {
    let entries = [
        (
            "email",
            settings.email.enabled,
            !settings.email.username.is_empty() && !settings.email.password.is_empty(),
        ),
        (
            "sms",
            settings.sms.enabled,
            !settings.sms.twilio_account_sid.is_empty() && !settings.sms.twilio_auth_token.is_empty(),
        ),
        ("push", settings.push.enabled, !settings.push.pushbullet_api_key.is_empty()),
        ("webhook", settings.webhook.enabled, !settings.webhook.webhook_url.is_empty()),
    ];

    entries
        .into_iter()
        .map(|(name, enabled, configured)| (name.to_string(), ChannelStatus { enabled, configured }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn hook_server(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(move |State(store): State<Received>, Json(body): Json<serde_json::Value>| async move {
                    store.lock().push(body);
                    status
                }),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), received)
    }

    fn alert(kind: &str) -> MaintenanceAlert {
        MaintenanceAlert {
            alert_type: kind.to_string(),
            ..MaintenanceAlert::test_alert()
        }
    }

    fn webhook_only(url: &str) -> NotificationSettings {
        let mut settings = NotificationSettings::default();
        settings.webhook.enabled = true;
        settings.webhook.webhook_url = url.to_string();
        settings
    }

    #[tokio::test]
    async fn test_webhook_only_dispatch() {
        let (url, received) = hook_server(StatusCode::OK).await;
        let manager = NotificationManager::new(&webhook_only(&url));
        assert_eq!(manager.channel_names(), vec!["webhook"]);

        let report = manager.send_alerts(&[alert("oil_change"), alert("brake_check")]).await;
        assert_eq!(report.sent(), 2);
        assert_eq!(report.failed(), 0);

        let bodies = received.lock().clone();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["alert_type"], "oil_change");
        assert_eq!(bodies[0]["source"], "SmartOBD");
        assert_eq!(bodies[1]["severity"], "medium");
    }

    #[tokio::test]
    async fn test_failing_webhook_is_isolated() {
        let (url, _) = hook_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let manager = NotificationManager::new(&webhook_only(&url));

        let report = manager.send_alerts(&[alert("air_filter")]).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.sent(), 0);

        let results = manager.test_notifications().await;
        assert_eq!(results.get("webhook"), Some(&false));
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_skipped() {
        let mut settings = NotificationSettings::default();
        settings.push.enabled = true;
        let manager = NotificationManager::new(&settings);

        let report = manager.send_alerts(&[alert("oil_change")]).await;
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.sent(), 0);

        let status = manager.status();
        assert_eq!(
            status["push"],
            ChannelStatus {
                enabled: true,
                configured: false
            }
        );
        assert!(!status["email"].enabled);
    }

    #[tokio::test]
    async fn test_disabled_channels_are_not_built() {
        let manager = NotificationManager::new(&NotificationSettings::default());
        assert!(manager.channel_names().is_empty());
        assert_eq!(manager.send_alerts(&[alert("oil_change")]).await.sent(), 0);
        assert!(manager.test_notifications().await.is_empty());
    }
}
