use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::Mac;
use crate::error::DomainError;

// ── Agents ────────────────────────────────────────────────────────────────────

/// A remote process that physically performs Wi-Fi scanning and device
/// configuration. Ephemeral from the control-plane view; the record persists
/// for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningAgent {
    pub id: String,
    pub hostname: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
    pub last_seen: DateTime<Utc>,
    pub registered: bool,
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Scan,
    Provision,
    Reconfigure,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Scan => write!(f, "scan"),
            TaskType::Provision => write!(f, "provision"),
            TaskType::Reconfigure => write!(f, "reconfigure"),
        }
    }
}

/// Task lifecycle.
///
/// Transitions:
///   pending ─(poll)─► assigned ─(agent starts)─► running
///   running ─(ok)──► completed (terminal)
///   running ─(err)─► failed    (terminal)
///   assigned/running ─(agent timeout, sweeper only)─► pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether an agent-reported transition from `self` to `to` is legal.
    /// The sweeper-only reclaim (`assigned|running → pending`) is not
    /// reachable through this check.
    pub fn agent_transition(&self, to: TaskStatus) -> Result<(), DomainError> {
        let ok = matches!(
            (self, to),
            (TaskStatus::Assigned, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        );
        if ok {
            Ok(())
        } else {
            Err(DomainError::InvalidTaskTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A unit of provisioning work owned by at most one agent at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningTask {
    /// Opaque id, generated at creation and immutable thereafter.
    pub id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub device_mac: Option<Mac>,
    #[serde(default)]
    pub ap_ssid: Option<String>,
    #[serde(default)]
    pub config: Value,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    pub priority: i32,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Provisioning workflow ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub enabled: bool,
    #[serde(default)]
    pub server: Option<String>,
}

/// Config payload of a `provision` / `reconfigure` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub wifi: WifiCredentials,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub auth: Option<DeviceAuthConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    /// Whole-workflow deadline in seconds. Defaults to 300.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 120;

impl ProvisionRequest {
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_WORKFLOW_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Success,
    Failed,
}

/// One recorded step of the per-device workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Serialized into `ProvisioningTask::result` when a provision workflow ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub mac: Mac,
    pub success: bool,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub final_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_transitions() {
        assert!(TaskStatus::Assigned.agent_transition(TaskStatus::Running).is_ok());
        assert!(TaskStatus::Running.agent_transition(TaskStatus::Completed).is_ok());
        assert!(TaskStatus::Running.agent_transition(TaskStatus::Failed).is_ok());

        // Reclaim is sweeper-only; agents cannot move anything back to pending.
        assert!(TaskStatus::Assigned.agent_transition(TaskStatus::Pending).is_err());
        assert!(TaskStatus::Running.agent_transition(TaskStatus::Pending).is_err());
        // Terminal states are frozen.
        assert!(TaskStatus::Completed.agent_transition(TaskStatus::Running).is_err());
        assert!(TaskStatus::Failed.agent_transition(TaskStatus::Running).is_err());
        // No skipping assigned.
        assert!(TaskStatus::Pending.agent_transition(TaskStatus::Running).is_err());
    }

    #[test]
    fn provision_request_defaults() {
        let req: ProvisionRequest = serde_json::from_value(serde_json::json!({
            "wifi": {"ssid": "home"},
        }))
        .unwrap();
        assert_eq!(req.effective_timeout_secs(), 300);
        assert_eq!(req.wifi.password, "");
        assert!(req.mqtt.is_none());
    }
}
