use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use shellymgr_domain::{NotificationChannel, NotificationHistory, WebhookConfig};
use tracing::debug;

use crate::driver::{ChannelDriver, DRIVER_TIMEOUT_SECS};
use crate::error::NotifyError;

type HmacSha256 = Hmac<Sha256>;

/// Delivers history records as JSON POSTs (method configurable) to an
/// arbitrary HTTP endpoint. When the channel carries a `secret`, the body is
/// signed with `X-Signature: sha256=<hex HMAC-SHA256>` — header name is a
/// wire-compatible contract.
pub struct WebhookDriver {
    client: reqwest::Client,
}

impl WebhookDriver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DRIVER_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebhookDriver {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256={}", hex)
}

#[async_trait]
impl ChannelDriver for WebhookDriver {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(
        &self,
        channel: &NotificationChannel,
        history: &NotificationHistory,
    ) -> Result<(), NotifyError> {
        let cfg: WebhookConfig = serde_json::from_value(channel.config.clone())
            .map_err(|e| NotifyError::Delivery(format!("webhook config: {e}")))?;

        let payload = json!({
            "type": history.trigger_type,
            "alert_level": history.alert_level,
            "subject": history.subject,
            "message": history.message,
            "timestamp": history.created_at,
            "device_id": history.device_id,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let method: reqwest::Method = cfg
            .method
            .as_deref()
            .unwrap_or("POST")
            .parse()
            .map_err(|_| NotifyError::Delivery(format!(
                "invalid webhook method: {}",
                cfg.method.as_deref().unwrap_or_default()
            )))?;

        let mut req = self
            .client
            .request(method, &cfg.url)
            .header("Content-Type", "application/json");
        for (k, v) in &cfg.headers {
            req = req.header(k, v);
        }
        if let Some(secret) = &cfg.secret {
            req = req.header("X-Signature", sign_body(secret, &body));
        }

        let resp = req.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout(DRIVER_TIMEOUT_SECS)
            } else {
                NotifyError::Delivery(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(NotifyError::Delivery(format!(
                "webhook returned {}", status
            )));
        }
        debug!(url = %cfg.url, status = %status, "webhook delivered");
        Ok(())
    }
}
