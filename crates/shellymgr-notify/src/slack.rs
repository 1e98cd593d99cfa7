use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use shellymgr_domain::{AlertLevel, NotificationChannel, NotificationHistory, SlackConfig};
use tracing::debug;

use crate::driver::{ChannelDriver, DRIVER_TIMEOUT_SECS};
use crate::error::NotifyError;

/// Delivers history records to a Slack-style incoming webhook.
pub struct SlackDriver {
    client: reqwest::Client,
}

impl SlackDriver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DRIVER_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for SlackDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Attachment color for an alert level.
pub(crate) fn level_color(level: AlertLevel) -> &'static str {
    match level {
        AlertLevel::Critical => "danger",
        AlertLevel::Warning => "warning",
        AlertLevel::Info => "good",
    }
}

#[async_trait]
impl ChannelDriver for SlackDriver {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn deliver(
        &self,
        channel: &NotificationChannel,
        history: &NotificationHistory,
    ) -> Result<(), NotifyError> {
        let cfg: SlackConfig = serde_json::from_value(channel.config.clone())
            .map_err(|e| NotifyError::Delivery(format!("slack config: {e}")))?;

        let mut payload = json!({
            "text": history.subject,
            "attachments": [{
                "color": level_color(history.alert_level),
                "title": history.subject,
                "text": history.message,
                "ts": history.created_at.timestamp(),
                "footer": "shellymgr",
            }],
        });
        if let Some(ch) = &cfg.channel {
            payload["channel"] = json!(ch);
        }
        if let Some(username) = &cfg.username {
            payload["username"] = json!(username);
        }
        if let Some(icon) = &cfg.icon_emoji {
            payload["icon_emoji"] = json!(icon);
        }

        let resp = self
            .client
            .post(&cfg.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(DRIVER_TIMEOUT_SECS)
                } else {
                    NotifyError::Delivery(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(NotifyError::Delivery(format!("slack returned {}", status)));
        }
        debug!(status = %status, "slack delivered");
        Ok(())
    }
}
