use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use shellymgr_domain::{EmailConfig, NotificationChannel, NotificationHistory};
use tracing::debug;

use crate::driver::ChannelDriver;
use crate::error::NotifyError;

/// Delivers history records over SMTP, one message per recipient.
///
/// The first failed recipient aborts delivery with the SMTP error; earlier
/// recipients keep their copies.
pub struct EmailDriver;

impl EmailDriver {
    pub fn new() -> Self {
        Self
    }

    fn transport(
        cfg: &EmailConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let mut builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
                .map_err(|e| NotifyError::Delivery(format!("smtp relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.smtp_host)
        };
        builder = builder.port(cfg.smtp_port);
        if !cfg.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()));
        }
        Ok(builder.build())
    }
}

impl Default for EmailDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{{.Subject}}`, `{{.Message}}`, and `{{.AlertLevel}}`
/// placeholders in a body template.
pub(crate) fn render_template(template: &str, history: &NotificationHistory) -> String {
    template
        .replace("{{.Subject}}", &history.subject)
        .replace("{{.Message}}", &history.message)
        .replace("{{.AlertLevel}}", &history.alert_level.to_string())
}

#[async_trait]
impl ChannelDriver for EmailDriver {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(
        &self,
        channel: &NotificationChannel,
        history: &NotificationHistory,
    ) -> Result<(), NotifyError> {
        let cfg: EmailConfig = serde_json::from_value(channel.config.clone())
            .map_err(|e| NotifyError::Delivery(format!("email config: {e}")))?;

        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| NotifyError::Delivery(format!("from address: {e}")))?;

        let body = match &cfg.template {
            Some(t) => render_template(t, history),
            None => history.message.clone(),
        };

        let mailer = Self::transport(&cfg)?;
        for recipient in &cfg.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| NotifyError::Delivery(format!("recipient {recipient}: {e}")))?;
            let email = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&history.subject)
                .body(body.clone())
                .map_err(|e| NotifyError::Delivery(e.to_string()))?;
            mailer
                .send(email)
                .await
                .map_err(|e| NotifyError::Delivery(format!("smtp send to {recipient}: {e}")))?;
            debug!(recipient = %recipient, "email delivered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shellymgr_domain::{AlertLevel, HistoryStatus};

    fn history() -> NotificationHistory {
        NotificationHistory {
            id: 1,
            rule_id: None,
            channel_id: 1,
            trigger_type: "test".into(),
            device_id: None,
            subject: "Disk full".into(),
            message: "volume /data at 97%".into(),
            alert_level: AlertLevel::Critical,
            affected_devices: vec![],
            status: HistoryStatus::Pending,
            error: None,
            retry_count: 0,
            sent_at: None,
            next_retry_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let rendered = render_template(
            "[{{.AlertLevel}}] {{.Subject}}: {{.Message}}",
            &history(),
        );
        assert_eq!(rendered, "[critical] Disk full: volume /data at 97%");
    }

    #[test]
    fn template_without_placeholders_is_untouched() {
        let rendered = render_template("static body", &history());
        assert_eq!(rendered, "static body");
    }
}
