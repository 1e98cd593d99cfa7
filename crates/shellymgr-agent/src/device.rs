use std::time::Duration;

use serde_json::{json, Value};
use shellymgr_domain::{CloudConfig, DeviceAuthConfig, MqttConfig, WifiCredentials};
use tracing::debug;

use crate::error::AgentError;

/// Per-call deadline for device HTTP.
const DEVICE_TIMEOUT_SECS: u64 = 10;

/// HTTP client for a single Shelly device, Gen1 (form/REST) and Gen2
/// (JSON-RPC) wire formats.
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
}

impl DeviceClient {
    /// `base_url` like `http://192.168.33.1` (the AP-mode address during
    /// provisioning).
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEVICE_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { http, base_url: base_url.into() }
    }

    fn err(e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::Timeout("device call".into())
        } else {
            AgentError::Device(e.to_string())
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(AgentError::Device(format!("device returned {status}")));
        }
        Ok(resp)
    }

    /// `GET /shelly` works unauthenticated on both generations.
    pub async fn get_info(&self) -> Result<Value, AgentError> {
        let resp = self
            .http
            .get(format!("{}/shelly", self.base_url))
            .send()
            .await
            .map_err(Self::err)?;
        Self::check(resp).await?.json().await.map_err(Self::err)
    }

    async fn gen1_post(&self, path: &str, form: &[(&str, String)]) -> Result<(), AgentError> {
        debug!(path, "gen1 config call");
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .form(form)
            .send()
            .await
            .map_err(Self::err)?;
        Self::check(resp).await.map(|_| ())
    }

    async fn gen2_rpc(&self, method: &str, params: Value) -> Result<(), AgentError> {
        debug!(method, "gen2 rpc call");
        let body = json!({"id": 1, "method": method, "params": params});
        let resp = self
            .http
            .post(format!("{}/rpc", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::err)?;
        Self::check(resp).await.map(|_| ())
    }

    pub async fn configure_wifi(
        &self,
        generation: u8,
        creds: &WifiCredentials,
    ) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc(
                "WiFi.SetConfig",
                json!({"config": {"sta": {
                    "ssid": creds.ssid,
                    "pass": creds.password,
                    "enable": true,
                }}}),
            )
            .await
        } else {
            self.gen1_post(
                "/settings/sta",
                &[
                    ("enabled", "1".to_string()),
                    ("ssid", creds.ssid.clone()),
                    ("key", creds.password.clone()),
                ],
            )
            .await
        }
    }

    pub async fn set_name(&self, generation: u8, name: &str) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc("Sys.SetConfig", json!({"config": {"device": {"name": name}}}))
                .await
        } else {
            self.gen1_post("/settings", &[("name", name.to_string())]).await
        }
    }

    pub async fn configure_auth(
        &self,
        generation: u8,
        auth: &DeviceAuthConfig,
    ) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc(
                "Shelly.SetAuth",
                json!({"user": auth.username, "pass": auth.password}),
            )
            .await
        } else {
            self.gen1_post(
                "/settings/login",
                &[
                    ("enabled", "1".to_string()),
                    ("username", auth.username.clone()),
                    ("password", auth.password.clone()),
                ],
            )
            .await
        }
    }

    pub async fn configure_mqtt(
        &self,
        generation: u8,
        mqtt: &MqttConfig,
    ) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc(
                "MQTT.SetConfig",
                json!({"config": {
                    "enable": true,
                    "server": mqtt.server,
                    "user": mqtt.username,
                    "pass": mqtt.password,
                }}),
            )
            .await
        } else {
            let mut form = vec![
                ("mqtt_enable", "1".to_string()),
                ("mqtt_server", mqtt.server.clone()),
            ];
            if let Some(user) = &mqtt.username {
                form.push(("mqtt_user", user.clone()));
            }
            if let Some(pass) = &mqtt.password {
                form.push(("mqtt_pass", pass.clone()));
            }
            self.gen1_post("/settings", &form).await
        }
    }

    pub async fn configure_cloud(
        &self,
        generation: u8,
        cloud: &CloudConfig,
    ) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc("Cloud.SetConfig", json!({"config": {"enable": cloud.enabled}}))
                .await
        } else {
            self.gen1_post(
                "/settings/cloud",
                &[("enabled", if cloud.enabled { "1" } else { "0" }.to_string())],
            )
            .await
        }
    }

    pub async fn reboot(&self, generation: u8) -> Result<(), AgentError> {
        if generation >= 2 {
            self.gen2_rpc("Shelly.Reboot", json!({})).await
        } else {
            debug!("gen1 reboot");
            let resp = self
                .http
                .get(format!("{}/reboot", self.base_url))
                .send()
                .await
                .map_err(Self::err)?;
            Self::check(resp).await.map(|_| ())
        }
    }
}
