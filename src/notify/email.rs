// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{NotificationChannel, NotifyError};
use crate::config::EmailSettings;
use crate::db::MaintenanceAlert;

/// SMTP delivery with STARTTLS and an HTML body
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: EmailSettings,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)?
            .port(settings.smtp_port);

        if !settings.username.is_empty() && !settings.password.is_empty() {
            builder = builder.credentials(Credentials::new(settings.username.clone(), settings.password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            settings: settings.clone(),
        })
    }

    pub fn subject(alert: &MaintenanceAlert) -> String {
        format!("SmartOBD Maintenance Alert: {}", alert.title())
    }

    pub fn body(alert: &MaintenanceAlert) -> String {
        let color = alert.severity.color();
        format!(
            r#"<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .alert {{ border: 2px solid {color}; border-radius: 5px; padding: 15px; margin: 10px 0; }}
        .severity {{ color: {color}; font-weight: bold; }}
        .timestamp {{ color: #666; font-size: 12px; }}
    </style>
</head>
<body>
    <h2>SmartOBD Maintenance Alert</h2>
    <div class="alert">
        <h3 class="severity">{title}</h3>
        <p><strong>Message:</strong> {message}</p>
        <p><strong>Severity:</strong> {severity}</p>
        <p><strong>Confidence:</strong> {confidence:.1}%</p>
        <p class="timestamp">Alert generated: {generated}</p>
    </div>
    <p>Please schedule maintenance for your vehicle as soon as possible.</p>
    <p>Best regards,<br>SmartOBD Team</p>
</body>
</html>"#,
            color = color,
            title = alert.title(),
            message = alert.message,
            severity = crate::db::title_case(alert.severity.as_str()),
            confidence = alert.confidence * 100.0,
            generated = Utc::now().format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn is_configured(&self) -> bool {
        !self.settings.username.is_empty() && !self.settings.password.is_empty()
    }

    async fn send(&self, alert: &MaintenanceAlert) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured("email"));
        }
        if self.settings.to_addresses.is_empty() {
            return Err(NotifyError::NoRecipients("email"));
        }

        let mut builder = Message::builder()
            .from(self.settings.from_address.parse::<Mailbox>()?)
            .subject(Self::subject(alert))
            .header(ContentType::TEXT_HTML);
        for to in &self.settings.to_addresses {
            builder = builder.to(to.parse::<Mailbox>()?);
        }
        let email = builder.body(Self::body(alert))?;

        self.transport.send(email).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Severity;

    #[test]
    fn test_subject_and_body() {
        let alert = MaintenanceAlert {
            alert_type: "oil_change".into(),
            severity: Severity::High,
            confidence: 0.873,
            message: "Oil Change maintenance needed".into(),
            ..MaintenanceAlert::test_alert()
        };
        assert_eq!(EmailChannel::subject(&alert), "SmartOBD Maintenance Alert: Oil Change");

        let body = EmailChannel::body(&alert);
        assert!(body.contains("#fd7e14"));
        assert!(body.contains("87.3%"));
        assert!(body.contains("<strong>Severity:</strong> High"));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let channel = EmailChannel::new(&EmailSettings::default()).unwrap();
        assert!(!channel.is_configured());
        assert!(matches!(
            channel.send(&MaintenanceAlert::test_alert()).await,
            Err(NotifyError::NotConfigured("email"))
        ));
    }
}
