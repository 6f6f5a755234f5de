// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::{NotificationChannel, NotifyError};
use crate::config::WebhookSettings;
use crate::db::MaintenanceAlert;

/// JSON POST to a user-supplied URL
pub struct WebhookChannel {
    client: reqwest::Client,
    settings: WebhookSettings,
}

impl WebhookChannel {
    pub fn new(settings: &WebhookSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    pub fn payload(alert: &MaintenanceAlert) -> serde_json::Value {
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "alert_type": alert.alert_type,
            "severity": alert.severity,
            "message": alert.message,
            "confidence": alert.confidence,
            "source": "SmartOBD",
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn is_configured(&self) -> bool {
        !self.settings.webhook_url.is_empty()
    }

    async fn send(&self, alert: &MaintenanceAlert) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured("webhook"));
        }

        let resp = self
            .client
            .post(&self.settings.webhook_url)
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .json(&Self::payload(alert))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 | 202 => Ok(()),
            status => Err(NotifyError::Status {
                channel: "webhook",
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}
