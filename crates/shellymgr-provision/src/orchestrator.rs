use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use shellymgr_domain::{
    classify_ssid, model_generation, Device, DeviceStatus, DiscoveredDevice, Mac,
    ProvisionOutcome, ProvisionRequest, ProvisioningAgent, ProvisioningTask, TaskStatus,
    TaskType,
};
use shellymgr_store::Store;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProvisionError;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum tasks handed to an agent per poll.
    pub poll_batch_size: u32,
    /// Expected agent poll cadence; the liveness window is three times this.
    pub poll_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { poll_batch_size: 5, poll_interval_secs: 30 }
    }
}

impl OrchestratorConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::seconds((self.poll_interval_secs * 3) as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    pub hostname: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    #[serde(default)]
    pub device_mac: Option<String>,
    #[serde(default)]
    pub ap_ssid: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredDeviceReport {
    pub mac: String,
    pub ssid: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub generation: Option<u8>,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub signal: i32,
}

/// Coordinates remote agents: task creation and hand-out, guarded status
/// reconciliation, discovery ingestion, and stale-work reclaim.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Agent lifecycle ───────────────────────────────────────────────────────

    /// Idempotent by agent id: re-registration refreshes `last_seen`,
    /// version, and capabilities.
    pub async fn register_agent(
        &self,
        reg: AgentRegistration,
    ) -> Result<ProvisioningAgent, ProvisionError> {
        let agent = ProvisioningAgent {
            id: reg.id,
            hostname: reg.hostname,
            version: reg.version,
            capabilities: reg.capabilities,
            metadata: reg.metadata,
            last_seen: Utc::now(),
            registered: true,
        };
        self.store.upsert_agent(&agent).await?;
        info!(agent_id = %agent.id, hostname = %agent.hostname, "agent registered");
        Ok(agent)
    }

    pub async fn list_agents(&self) -> Result<Vec<ProvisioningAgent>, ProvisionError> {
        Ok(self.store.list_agents().await?)
    }

    /// Atomically hand out up to the configured batch of pending tasks.
    /// Polling also refreshes the agent's `last_seen`.
    pub async fn poll_tasks(
        &self,
        agent_id: &str,
    ) -> Result<Vec<ProvisioningTask>, ProvisionError> {
        let mut agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| ProvisionError::AgentNotRegistered(agent_id.to_string()))?;
        agent.last_seen = Utc::now();
        agent.registered = true;
        self.store.upsert_agent(&agent).await?;

        let tasks = self
            .store
            .claim_tasks(agent_id, self.config.poll_batch_size)
            .await?;
        if !tasks.is_empty() {
            debug!(agent_id = %agent_id, count = tasks.len(), "tasks assigned");
        }
        Ok(tasks)
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    pub async fn create_task(&self, new: NewTask) -> Result<ProvisioningTask, ProvisionError> {
        let device_mac = new
            .device_mac
            .as_deref()
            .map(Mac::parse)
            .transpose()?;
        if matches!(new.task_type, TaskType::Provision | TaskType::Reconfigure) {
            // Provisioning needs a target and a parseable workflow config.
            if device_mac.is_none() && new.ap_ssid.is_none() {
                return Err(ProvisionError::InvalidTask(
                    "provision task needs a device MAC or AP SSID".into(),
                ));
            }
            serde_json::from_value::<ProvisionRequest>(new.config.clone())
                .map_err(|e| ProvisionError::InvalidTask(format!("config: {e}")))?;
        }

        let now = Utc::now();
        let task = ProvisioningTask {
            id: Uuid::new_v4().to_string(),
            task_type: new.task_type,
            device_mac,
            ap_ssid: new.ap_ssid,
            config: new.config,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            priority: new.priority,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_task(&task).await?;
        info!(task_id = %task.id, task_type = %task.task_type, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<ProvisioningTask>, ProvisionError> {
        Ok(self.store.get_task(id).await?)
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ProvisioningTask>, ProvisionError> {
        Ok(self.store.list_tasks(status).await?)
    }

    /// Agent-reported status change. Ownership and the state machine are
    /// enforced by the store; a completed provision workflow additionally
    /// promotes the device record.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProvisioningTask, ProvisionError> {
        let task = self
            .store
            .update_task_status(task_id, agent_id, status, result, error)
            .await?;

        if task.status == TaskStatus::Completed && task.task_type == TaskType::Provision {
            if let Err(e) = self.promote_provisioned_device(&task).await {
                warn!(task_id = %task.id, error = %e, "device promotion failed");
            }
        }
        Ok(task)
    }

    /// Upsert the device record for a successfully provisioned device.
    async fn promote_provisioned_device(
        &self,
        task: &ProvisioningTask,
    ) -> Result<(), ProvisionError> {
        let Some(result) = &task.result else { return Ok(()) };
        let outcome: ProvisionOutcome = match serde_json::from_value(result.clone()) {
            Ok(o) => o,
            Err(e) => {
                debug!(task_id = %task.id, error = %e, "task result is not a provision outcome");
                return Ok(());
            }
        };
        if !outcome.success {
            return Ok(());
        }

        let request: Option<ProvisionRequest> = serde_json::from_value(task.config.clone()).ok();
        let model = task
            .ap_ssid
            .as_deref()
            .map(classify_ssid)
            .unwrap_or("SHSW-1");

        let mut device = match self.store.get_device_by_mac(&outcome.mac).await? {
            Some(existing) => existing,
            None => Device::new(outcome.mac.clone(), outcome.mac.as_str()),
        };
        if let Some(name) = request.as_ref().and_then(|r| r.device_name.clone()) {
            device.name = name;
        }
        if device.device_type.is_empty() {
            device.device_type = model.to_string();
        }
        device.ip = outcome.final_ip.clone();
        device.status = DeviceStatus::Online;
        device.last_seen = Some(Utc::now());
        self.store.upsert_device_by_mac(&device).await?;
        info!(mac = %outcome.mac, "provisioned device promoted");
        Ok(())
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Ingest an agent's scan results. Unknown models are classified from the
    /// AP SSID.
    pub async fn report_discovered(
        &self,
        agent_id: &str,
        _task_id: Option<&str>,
        reports: Vec<DiscoveredDeviceReport>,
    ) -> Result<usize, ProvisionError> {
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(ProvisionError::AgentNotRegistered(agent_id.to_string()));
        }

        let now = Utc::now();
        let mut stored = 0;
        for report in reports {
            let mac = match Mac::parse(&report.mac) {
                Ok(m) => m,
                Err(e) => {
                    warn!(mac = %report.mac, error = %e, "skipping discovery with bad mac");
                    continue;
                }
            };
            let model = report
                .model
                .clone()
                .unwrap_or_else(|| classify_ssid(&report.ssid).to_string());
            let generation = report.generation.unwrap_or_else(|| model_generation(&model));
            let device = DiscoveredDevice {
                mac,
                ssid: report.ssid,
                model,
                generation,
                ip: report.ip,
                signal: report.signal,
                agent_id: agent_id.to_string(),
                discovered_at: now,
            };
            self.store.upsert_discovered(&device).await?;
            stored += 1;
        }
        debug!(agent_id = %agent_id, count = stored, "discoveries ingested");
        Ok(stored)
    }

    pub async fn list_discovered(&self) -> Result<Vec<DiscoveredDevice>, ProvisionError> {
        Ok(self.store.list_discovered().await?)
    }

    // ── Reclaim ───────────────────────────────────────────────────────────────

    /// Revert tasks whose owners went quiet, and drop the registered flag on
    /// agents past the liveness window.
    pub async fn reclaim_once(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ProvisionError> {
        let cutoff = now - self.config.liveness_window();
        let reclaimed = self.store.reclaim_stale_tasks(cutoff).await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "stale tasks reclaimed");
        }

        for mut agent in self.store.list_agents().await? {
            if agent.registered && agent.last_seen < cutoff {
                agent.registered = false;
                self.store.upsert_agent(&agent).await?;
                info!(agent_id = %agent.id, "agent marked offline");
            }
        }
        Ok(reclaimed)
    }
}

/// Cooperative task running [`Orchestrator::reclaim_once`] on an interval.
pub struct ReclaimSweeper {
    orchestrator: Arc<Orchestrator>,
    interval: std::time::Duration,
}

impl ReclaimSweeper {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: std::time::Duration) -> Self {
        Self { orchestrator, interval }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.orchestrator.reclaim_once(Utc::now()).await {
                        warn!(error = %e, "reclaim sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shellymgr_store::{InMemoryStore, Store, StoreError};

    fn orchestrator(store: Arc<InMemoryStore>) -> Orchestrator {
        Orchestrator::new(store, OrchestratorConfig::default())
    }

    fn registration(id: &str) -> AgentRegistration {
        AgentRegistration {
            id: id.into(),
            hostname: format!("{id}.local"),
            version: "1.0.0".into(),
            capabilities: vec!["wifi-scan".into()],
            metadata: Value::Null,
        }
    }

    fn scan_task() -> NewTask {
        NewTask {
            task_type: TaskType::Scan,
            device_mac: None,
            ap_ssid: None,
            config: Value::Null,
            priority: 0,
        }
    }

    #[tokio::test]
    async fn register_agent_is_idempotent_by_id() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());

        let first = orch.register_agent(registration("a1")).await.unwrap();
        let mut again = registration("a1");
        again.version = "1.1.0".into();
        let second = orch.register_agent(again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.version, "1.1.0");
        assert_eq!(store.list_agents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_requires_registration_and_refreshes_last_seen() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());

        let err = orch.poll_tasks("ghost").await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::NotFound);

        let before = orch.register_agent(registration("a1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        orch.poll_tasks("a1").await.unwrap();
        let after = store.get_agent("a1").await.unwrap().unwrap();
        assert!(after.last_seen > before.last_seen);
    }

    #[tokio::test]
    async fn provision_task_requires_target_and_valid_config() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store);

        let bare = NewTask {
            task_type: TaskType::Provision,
            device_mac: None,
            ap_ssid: None,
            config: json!({"wifi": {"ssid": "home"}}),
            priority: 0,
        };
        assert!(orch.create_task(bare).await.is_err());

        let bad_config = NewTask {
            task_type: TaskType::Provision,
            device_mac: Some("AA:BB:CC:DD:EE:FF".into()),
            ap_ssid: None,
            config: json!({"no_wifi": true}),
            priority: 0,
        };
        assert!(orch.create_task(bad_config).await.is_err());

        let good = NewTask {
            task_type: TaskType::Provision,
            device_mac: Some("AA:BB:CC:DD:EE:FF".into()),
            ap_ssid: Some("shelly1-AABBCC".into()),
            config: json!({"wifi": {"ssid": "home", "password": "pw"}}),
            priority: 1,
        };
        let task = orch.create_task(good).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.id.is_empty());
    }

    #[tokio::test]
    async fn status_update_from_wrong_agent_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store);
        orch.register_agent(registration("a1")).await.unwrap();
        orch.register_agent(registration("a2")).await.unwrap();

        let task = orch.create_task(scan_task()).await.unwrap();
        let claimed = orch.poll_tasks("a1").await.unwrap();
        assert_eq!(claimed.len(), 1);

        let err = orch
            .update_task_status(&task.id, "a2", TaskStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Store(StoreError::TaskOwnership { .. })));
    }

    #[tokio::test]
    async fn reclaim_returns_task_to_the_pool() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = OrchestratorConfig::default();
        config.poll_interval_secs = 1;
        let orch = Orchestrator::new(store.clone(), config);
        orch.register_agent(registration("a1")).await.unwrap();
        orch.register_agent(registration("b2")).await.unwrap();

        let task = orch.create_task(scan_task()).await.unwrap();
        let claimed = orch.poll_tasks("a1").await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Inside the liveness window nothing is reclaimed.
        assert!(orch.reclaim_once(Utc::now()).await.unwrap().is_empty());

        // Past the window the task reverts to pending with no owner.
        let later = Utc::now() + Duration::seconds(10);
        let reclaimed = orch.reclaim_once(later).await.unwrap();
        assert_eq!(reclaimed, vec![task.id.clone()]);

        let after = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert!(after.assigned_agent_id.is_none());

        // A different agent can now pick it up.
        let reclaim_poll = orch.poll_tasks("b2").await.unwrap();
        assert_eq!(reclaim_poll.len(), 1);
        assert_eq!(reclaim_poll[0].id, task.id);
    }

    #[tokio::test]
    async fn discovery_reports_are_classified_and_upserted() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());
        orch.register_agent(registration("a1")).await.unwrap();

        let stored = orch
            .report_discovered(
                "a1",
                None,
                vec![
                    DiscoveredDeviceReport {
                        mac: "a4:cf:12:34:56:78".into(),
                        ssid: "shellyplus1-345678".into(),
                        model: None,
                        generation: None,
                        ip: "192.168.33.1".into(),
                        signal: -48,
                    },
                    DiscoveredDeviceReport {
                        mac: "not-a-mac".into(),
                        ssid: "shelly1-zzz".into(),
                        model: None,
                        generation: None,
                        ip: String::new(),
                        signal: 0,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(stored, 1, "bad MACs are skipped");

        let discovered = orch.list_discovered().await.unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].model, "SPSW-001X16EU");
        assert_eq!(discovered[0].generation, 2);
        assert_eq!(discovered[0].agent_id, "a1");

        // Re-reporting the same MAC replaces rather than duplicates.
        orch.report_discovered(
            "a1",
            None,
            vec![DiscoveredDeviceReport {
                mac: "A4:CF:12:34:56:78".into(),
                ssid: "shellyplus1-345678".into(),
                model: None,
                generation: None,
                ip: "192.168.33.1".into(),
                signal: -50,
            }],
        )
        .await
        .unwrap();
        assert_eq!(orch.list_discovered().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completed_provision_promotes_the_device() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone());
        orch.register_agent(registration("a1")).await.unwrap();

        let task = orch
            .create_task(NewTask {
                task_type: TaskType::Provision,
                device_mac: Some("AA:BB:CC:DD:EE:FF".into()),
                ap_ssid: Some("shelly1-DDEEFF".into()),
                config: json!({"wifi": {"ssid": "home"}, "device_name": "kitchen"}),
                priority: 0,
            })
            .await
            .unwrap();
        orch.poll_tasks("a1").await.unwrap();
        orch.update_task_status(&task.id, "a1", TaskStatus::Running, None, None)
            .await
            .unwrap();

        let outcome = ProvisionOutcome {
            mac: Mac::parse("AA:BB:CC:DD:EE:FF").unwrap(),
            success: true,
            steps: vec![],
            final_ip: Some("192.168.1.40".into()),
        };
        orch.update_task_status(
            &task.id,
            "a1",
            TaskStatus::Completed,
            Some(serde_json::to_value(&outcome).unwrap()),
            None,
        )
        .await
        .unwrap();

        let device = store
            .get_device_by_mac(&outcome.mac)
            .await
            .unwrap()
            .expect("device promoted");
        assert_eq!(device.name, "kitchen");
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.ip.as_deref(), Some("192.168.1.40"));
        assert_eq!(device.device_type, "SHSW-1");
    }
}
