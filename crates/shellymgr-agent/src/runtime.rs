use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shellymgr_domain::{
    classify_ssid, model_generation, Mac, ProvisionRequest, ProvisioningTask, TaskStatus,
    TaskType,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{AgentInfo, ControlPlaneClient, DiscoveredReport};
use crate::error::AgentError;
use crate::net::{NetworkManager, WifiNetwork};
use crate::workflow::{ProvisionTarget, ProvisionWorkflow, WorkflowOptions};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_url: String,
    pub token: Option<String>,
    pub agent_id: String,
    pub hostname: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub poll_interval: Duration,
}

impl AgentConfig {
    pub fn new(server_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: None,
            agent_id: agent_id.into(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into()),
            version: env!("CARGO_PKG_VERSION").into(),
            capabilities: vec!["wifi-scan".into(), "provision".into()],
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// The long-running process on each provisioning host: registers, polls for
/// tasks, performs the scan / provision workflows, and reports status and
/// discoveries back.
pub struct AgentRuntime {
    client: ControlPlaneClient,
    net: Arc<dyn NetworkManager>,
    config: AgentConfig,
    workflow_options: WorkflowOptions,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, net: Arc<dyn NetworkManager>) -> Self {
        let client = ControlPlaneClient::new(&config.server_url, config.token.clone());
        Self { client, net, config, workflow_options: WorkflowOptions::default() }
    }

    pub fn with_workflow_options(mut self, options: WorkflowOptions) -> Self {
        self.workflow_options = options;
        self
    }

    /// Register (with backoff), then poll until shutdown. The in-flight task
    /// finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        let info = AgentInfo {
            id: self.config.agent_id.clone(),
            hostname: self.config.hostname.clone(),
            version: self.config.version.clone(),
            capabilities: self.config.capabilities.clone(),
            metadata: json!({}),
        };

        let mut backoff = Duration::from_secs(1);
        loop {
            tokio::select! {
                result = self.client.register(&info) => match result {
                    Ok(()) => break,
                    Err(AgentError::Unauthorized) => return Err(AgentError::Unauthorized),
                    Err(e) => {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "registration failed");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(60));
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
        info!(agent_id = %self.config.agent_id, "agent running");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll_and_execute().await {
                        warn!(error = %e, "poll cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("agent shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn poll_and_execute(&self) -> Result<(), AgentError> {
        let tasks = self.client.poll_tasks(&self.config.agent_id).await?;
        for task in tasks {
            self.execute_task(task).await;
        }
        Ok(())
    }

    /// Run one task to a terminal status. Errors are reported to the control
    /// plane, never propagated — the poll loop must keep breathing.
    pub async fn execute_task(&self, task: ProvisioningTask) {
        let agent_id = self.config.agent_id.clone();
        if let Err(e) = self
            .client
            .update_task_status(&task.id, &agent_id, TaskStatus::Running, None, None)
            .await
        {
            // Most likely reclaimed from under us; leave it alone.
            warn!(task_id = %task.id, error = %e, "could not start task");
            return;
        }

        let (status, result, error) = match task.task_type {
            TaskType::Scan => match self.run_scan(&task).await {
                Ok(count) => (
                    TaskStatus::Completed,
                    Some(json!({"discovered": count})),
                    None,
                ),
                Err(e) => (TaskStatus::Failed, None, Some(e.to_string())),
            },
            TaskType::Provision | TaskType::Reconfigure => match self.run_provision(&task).await {
                Ok(outcome) => {
                    let status = if outcome.success {
                        TaskStatus::Completed
                    } else {
                        TaskStatus::Failed
                    };
                    let error = (!outcome.success).then(|| {
                        outcome
                            .steps
                            .iter()
                            .rev()
                            .find_map(|s| s.error.clone())
                            .unwrap_or_else(|| "provisioning failed".into())
                    });
                    (status, serde_json::to_value(&outcome).ok(), error)
                }
                Err(e) => (TaskStatus::Failed, None, Some(e.to_string())),
            },
        };

        if let Err(e) = self
            .client
            .update_task_status(&task.id, &agent_id, status, result, error)
            .await
        {
            warn!(task_id = %task.id, error = %e, "final status report failed");
        }
    }

    async fn run_scan(&self, task: &ProvisioningTask) -> Result<usize, AgentError> {
        let networks = self.net.available_networks().await?;
        let reports = shelly_reports(&networks);
        debug!(total = networks.len(), shelly = reports.len(), "scan complete");
        if !reports.is_empty() {
            self.client
                .report_discovered(&self.config.agent_id, Some(&task.id), &reports)
                .await?;
        }
        Ok(reports.len())
    }

    async fn run_provision(
        &self,
        task: &ProvisioningTask,
    ) -> Result<shellymgr_domain::ProvisionOutcome, AgentError> {
        let request: ProvisionRequest = serde_json::from_value(task.config.clone())?;
        let ap_ssid = task
            .ap_ssid
            .clone()
            .ok_or_else(|| AgentError::Device("task has no AP SSID to join".into()))?;
        let mac = match &task.device_mac {
            Some(mac) => mac.clone(),
            None => mac_from_ssid(&ap_ssid)
                .ok_or_else(|| AgentError::Device("cannot derive device MAC".into()))?,
        };
        let model = classify_ssid(&ap_ssid);
        let target = ProvisionTarget {
            mac,
            ap_ssid,
            generation: model_generation(model),
        };

        let workflow = ProvisionWorkflow::new(self.net.clone(), self.workflow_options.clone());
        Ok(workflow.run(&target, &request).await)
    }
}

/// Filter a scan down to Shelly AP-mode networks with a derivable MAC.
pub(crate) fn shelly_reports(networks: &[WifiNetwork]) -> Vec<DiscoveredReport> {
    networks
        .iter()
        .filter(|n| n.ssid.to_ascii_lowercase().starts_with("shelly"))
        .filter_map(|n| {
            let mac = match mac_from_ssid(&n.ssid) {
                Some(m) => m,
                None => {
                    debug!(ssid = %n.ssid, "no full MAC in SSID, skipping");
                    return None;
                }
            };
            let model = classify_ssid(&n.ssid);
            Some(DiscoveredReport {
                mac: mac.as_str().to_string(),
                ssid: n.ssid.clone(),
                model: Some(model.to_string()),
                generation: Some(model_generation(model)),
                ip: "192.168.33.1".into(),
                signal: n.signal,
            })
        })
        .collect()
}

/// Gen2-style SSIDs end in the full 12-digit MAC (`shellyplus1-a8032ab12345`).
pub(crate) fn mac_from_ssid(ssid: &str) -> Option<Mac> {
    let suffix = ssid.rsplit('-').next()?;
    if suffix.len() == 12 && suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        Mac::parse(suffix).ok()
    } else {
        None
    }
}
