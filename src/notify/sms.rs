// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{NotificationChannel, NotifyError};
use crate::config::SmsSettings;
use crate::db::MaintenanceAlert;

/// Twilio SMS to the first configured recipient
pub struct SmsChannel {
    client: reqwest::Client,
    settings: SmsSettings,
}

impl SmsChannel {
    pub fn new(settings: &SmsSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    pub fn format_message(alert: &MaintenanceAlert) -> String {
        format!("SmartOBD Alert: {} needed. {}", alert.title(), alert.message)
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.twilio_account_sid
        )
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn is_configured(&self) -> bool {
        !self.settings.twilio_account_sid.is_empty() && !self.settings.twilio_auth_token.is_empty()
    }

    async fn send(&self, alert: &MaintenanceAlert) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured("sms"));
        }
        let to = self
            .settings
            .recipient_numbers
            .first()
            .ok_or(NotifyError::NoRecipients("sms"))?;

        let body = Self::format_message(alert);
        let form = [
            ("From", self.settings.twilio_phone_number.as_str()),
            ("To", to.as_str()),
            ("Body", body.as_str()),
        ];

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.settings.twilio_account_sid, Some(&self.settings.twilio_auth_token))
            .form(&form)
            .send()
            .await?;

        if resp.status() == StatusCode::CREATED {
            Ok(())
        } else {
            Err(NotifyError::Status {
                channel: "sms",
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
    fn test_message_and_url() {
        let alert = MaintenanceAlert {
            alert_type: "tire_rotation".into(),
            message: "Tire Rotation maintenance needed".into(),
            ..MaintenanceAlert::test_alert()
        };
        assert_eq!(
            SmsChannel::format_message(&alert),
            "SmartOBD Alert: Tire Rotation needed. Tire Rotation maintenance needed"
        );

        let channel = SmsChannel::new(&SmsSettings {
            twilio_account_sid: "AC123".into(),
            ..SmsSettings::default()
        });
        assert_eq!(
            channel.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        assert!(!channel.is_configured());
    }

    #[tokio::test]
    async fn test_no_recipient() {
        let channel = SmsChannel::new(&SmsSettings {
            twilio_account_sid: "AC123".into(),
            twilio_auth_token: "token".into(),
            ..SmsSettings::default()
        });
        assert!(matches!(
            channel.send(&MaintenanceAlert::test_alert()).await,
            Err(NotifyError::NoRecipients("sms"))
        ));
    }
}
