// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{NotificationChannel, NotifyError};
use crate::config::PushSettings;
use crate::db::MaintenanceAlert;

/// Pushbullet `note` push
pub struct PushChannel {
    client: reqwest::Client,
    settings: PushSettings,
}

impl PushChannel {
    pub fn new(settings: &PushSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    pub fn payload(alert: &MaintenanceAlert) -> serde_json::Value {
        serde_json::json!({
            "type": "note",
            "title": format!("SmartOBD: {}", alert.title()),
            "body": alert.message,
        })
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    fn is_configured(&self) -> bool {
        !self.settings.pushbullet_api_key.is_empty()
    }

    async fn send(&self, alert: &MaintenanceAlert) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured("push"));
        }

        let resp = self
            .client
            .post(&self.settings.api_url)
            .header("Access-Token", &self.settings.pushbullet_api_key)
            .json(&Self::payload(alert))
            .send()
            .await?;

        if resp.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(NotifyError::Status {
                channel: "push",
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload() {
        let alert = MaintenanceAlert {
            alert_type: "brake_check".into(),
            message: "Brake Check maintenance needed".into(),
            ..MaintenanceAlert::test_alert()
        };
        let payload = PushChannel::payload(&alert);
        assert_eq!(payload["type"], "note");
        assert_eq!(payload["title"], "SmartOBD: Brake Check");
        assert_eq!(payload["body"], "Brake Check maintenance needed");
    }
}
