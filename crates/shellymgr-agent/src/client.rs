use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shellymgr_domain::{ProvisioningTask, TaskStatus};
use tracing::debug;

use crate::error::AgentError;

const CLIENT_TIMEOUT_SECS: u64 = 30;

/// What an agent sends when registering.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub hostname: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub metadata: Value,
}

/// Wire form of one discovered device report.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredReport {
    pub mac: String,
    pub ssid: String,
    pub model: Option<String>,
    pub generation: Option<u8>,
    pub ip: String,
    pub signal: i32,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: serde::de::DeserializeOwned")]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

/// HTTP client for the control plane's agent-facing surface.
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ControlPlaneClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { http, base_url: base_url.into(), token }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, AgentError> {
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AgentError::Unauthorized);
        }
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| AgentError::ControlPlane(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "unknown server error".into());
            return Err(AgentError::ControlPlane(message));
        }
        envelope
            .data
            .ok_or_else(|| AgentError::ControlPlane("missing data in response".into()))
    }

    fn send_err(e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::Timeout("control plane call".into())
        } else {
            AgentError::ControlPlane(e.to_string())
        }
    }

    pub async fn register(&self, info: &AgentInfo) -> Result<(), AgentError> {
        let url = format!("{}/api/v1/provisioner/agents/register", self.base_url);
        let resp = self
            .authed(self.http.post(&url))
            .json(info)
            .send()
            .await
            .map_err(Self::send_err)?;
        let _: Value = Self::parse(resp).await?;
        debug!(agent_id = %info.id, "registered with control plane");
        Ok(())
    }

    pub async fn poll_tasks(&self, agent_id: &str) -> Result<Vec<ProvisioningTask>, AgentError> {
        let url = format!("{}/api/v1/provisioner/agents/{}/tasks", self.base_url, agent_id);
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(Self::send_err)?;
        Self::parse(resp).await
    }

    pub async fn update_task_status(
        &self,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProvisioningTask, AgentError> {
        let url = format!("{}/api/v1/provisioner/tasks/{}/status", self.base_url, task_id);
        let body = serde_json::json!({
            "agent_id": agent_id,
            "status": status,
            "result": result,
            "error": error,
        });
        let resp = self
            .authed(self.http.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::send_err)?;
        Self::parse(resp).await
    }

    pub async fn report_discovered(
        &self,
        agent_id: &str,
        task_id: Option<&str>,
        devices: &[DiscoveredReport],
    ) -> Result<(), AgentError> {
        let url = format!("{}/api/v1/provisioner/discovered-devices", self.base_url);
        let body = serde_json::json!({
            "agent_id": agent_id,
            "task_id": task_id,
            "devices": devices,
        });
        let resp = self
            .authed(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::send_err)?;
        let _: Value = Self::parse(resp).await?;
        Ok(())
    }
}
