use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shellymgr_domain::{
    BackupRecord, Device, DiscoveredDevice, ExportHistory, ExportSchedule, HistoryStatus,
    ImportHistory, Mac, NotificationChannel, NotificationHistory, NotificationRule,
    ProvisioningAgent, ProvisioningTask, TaskStatus, Template,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{HistoryPage, Store};

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<i64, Device>,
    next_device_id: i64,
    templates: HashMap<String, Template>,
    channels: HashMap<i64, NotificationChannel>,
    next_channel_id: i64,
    rules: HashMap<i64, NotificationRule>,
    next_rule_id: i64,
    history: HashMap<i64, NotificationHistory>,
    next_history_id: i64,
    agents: HashMap<String, ProvisioningAgent>,
    tasks: HashMap<String, ProvisioningTask>,
    discovered: HashMap<String, DiscoveredDevice>,
    export_history: Vec<ExportHistory>,
    next_export_history_id: i64,
    import_history: Vec<ImportHistory>,
    next_import_history_id: i64,
    backups: HashMap<String, BackupRecord>,
    next_backup_id: i64,
    schedules: HashMap<i64, ExportSchedule>,
    next_schedule_id: i64,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Suitable for tests and ephemeral serve
/// mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn database_type(&self) -> &'static str {
        "memory"
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    async fn create_device(&self, device: &Device) -> Result<Device, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_device_id += 1;
        let mut stored = device.clone();
        stored.id = guard.next_device_id;
        guard.devices.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_device(&self, id: i64) -> Result<Option<Device>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(&id).cloned())
    }

    async fn get_device_by_mac(&self, mac: &Mac) -> Result<Option<Device>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.values().find(|d| &d.mac == mac).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<Device> = guard.devices.values().cloned().collect();
        all.sort_by_key(|d| d.id);
        Ok(all)
    }

    async fn update_device(&self, device: &Device) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.devices.contains_key(&device.id) {
            return Err(StoreError::not_found("device", device.id));
        }
        guard.devices.insert(device.id, device.clone());
        Ok(())
    }

    async fn delete_device(&self, id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .devices
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("device", id))
    }

    async fn upsert_device_by_mac(&self, device: &Device) -> Result<Device, StoreError> {
        let mut guard = self.inner.write().await;
        let existing_id = guard
            .devices
            .values()
            .find(|d| d.mac == device.mac)
            .map(|d| d.id);
        let mut stored = device.clone();
        match existing_id {
            Some(id) => {
                stored.id = id;
            }
            None => {
                guard.next_device_id += 1;
                stored.id = guard.next_device_id;
            }
        }
        guard.devices.insert(stored.id, stored.clone());
        Ok(stored)
    }

    // ── Templates ─────────────────────────────────────────────────────────────

    async fn upsert_template(&self, template: &Template) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.templates.insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn get_template(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.templates.get(name).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<Template> = guard.templates.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn delete_template(&self, name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .templates
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("template", name))
    }

    // ── Notification channels ─────────────────────────────────────────────────

    async fn create_channel(
        &self,
        channel: &NotificationChannel,
    ) -> Result<NotificationChannel, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_channel_id += 1;
        let mut stored = channel.clone();
        stored.id = guard.next_channel_id;
        guard.channels.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_channel(&self, id: i64) -> Result<Option<NotificationChannel>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.channels.get(&id).cloned())
    }

    async fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<NotificationChannel> = guard.channels.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn update_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.channels.contains_key(&channel.id) {
            return Err(StoreError::not_found("channel", channel.id));
        }
        guard.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn delete_channel(&self, id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.channels.contains_key(&id) {
            return Err(StoreError::not_found("channel", id));
        }
        let in_use = guard
            .rules
            .values()
            .any(|r| r.channel_id == id && r.enabled);
        if in_use {
            return Err(StoreError::ChannelInUse { channel_id: id });
        }
        guard.channels.remove(&id);
        Ok(())
    }

    // ── Notification rules ────────────────────────────────────────────────────

    async fn create_rule(
        &self,
        rule: &NotificationRule,
    ) -> Result<NotificationRule, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_rule_id += 1;
        let mut stored = rule.clone();
        stored.id = guard.next_rule_id;
        guard.rules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_rule(&self, id: i64) -> Result<Option<NotificationRule>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.rules.get(&id).cloned())
    }

    async fn list_rules(&self) -> Result<Vec<NotificationRule>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<NotificationRule> = guard.rules.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        Ok(all)
    }

    async fn update_rule(&self, rule: &NotificationRule) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.rules.contains_key(&rule.id) {
            return Err(StoreError::not_found("rule", rule.id));
        }
        guard.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("rule", id))
    }

    // ── Notification history ──────────────────────────────────────────────────

    async fn create_history(
        &self,
        row: &NotificationHistory,
    ) -> Result<NotificationHistory, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_history_id += 1;
        let mut stored = row.clone();
        stored.id = guard.next_history_id;
        guard.history.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_history(&self, row: &NotificationHistory) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.history.contains_key(&row.id) {
            return Err(StoreError::not_found("history", row.id));
        }
        guard.history.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_history(&self, id: i64) -> Result<Option<NotificationHistory>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.history.get(&id).cloned())
    }

    async fn query_history(
        &self,
        channel_id: Option<i64>,
        status: Option<HistoryStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<NotificationHistory> = guard
            .history
            .values()
            .filter(|h| channel_id.map_or(true, |c| h.channel_id == c))
            .filter(|h| status.map_or(true, |s| h.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = rows.len() as u64;
        let rows = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(HistoryPage { rows, total })
    }

    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationHistory>, StoreError> {
        let guard = self.inner.read().await;
        let mut due: Vec<NotificationHistory> = guard
            .history
            .values()
            .filter(|h| h.status == HistoryStatus::Failed)
            .filter(|h| h.next_retry_at.map_or(false, |t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|h| h.next_retry_at);
        Ok(due)
    }

    // ── Provisioning agents ───────────────────────────────────────────────────

    async fn upsert_agent(&self, agent: &ProvisioningAgent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<ProvisioningAgent>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<ProvisioningAgent>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<ProvisioningAgent> = guard.agents.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    // ── Provisioning tasks ────────────────────────────────────────────────────

    async fn create_task(&self, task: &ProvisioningTask) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<ProvisioningTask>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.tasks.get(id).cloned())
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ProvisioningTask>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<ProvisioningTask> = guard
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn claim_tasks(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<ProvisioningTask>, StoreError> {
        let mut guard = self.inner.write().await;
        let mut claimable: Vec<String> = guard
            .tasks
            .values()
            .filter(|t| {
                (t.status == TaskStatus::Pending && t.assigned_agent_id.is_none())
                    || (t.status == TaskStatus::Assigned
                        && t.assigned_agent_id.as_deref() == Some(agent_id))
            })
            .map(|t| t.id.clone())
            .collect();
        claimable.sort_by(|a, b| {
            let ta = &guard.tasks[a];
            let tb = &guard.tasks[b];
            tb.priority
                .cmp(&ta.priority)
                .then(ta.created_at.cmp(&tb.created_at))
        });
        claimable.truncate(limit as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(claimable.len());
        for id in claimable {
            let task = guard.tasks.get_mut(&id).expect("id came from the map");
            task.status = TaskStatus::Assigned;
            task.assigned_agent_id = Some(agent_id.to_string());
            task.updated_at = now;
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProvisioningTask, StoreError> {
        let mut guard = self.inner.write().await;
        let task = guard
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::not_found("task", task_id))?;
        if task.assigned_agent_id.as_deref() != Some(agent_id) {
            return Err(StoreError::TaskOwnership {
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        task.status.agent_transition(status)?;
        task.status = status;
        task.updated_at = Utc::now();
        if result.is_some() {
            task.result = result;
        }
        if error.is_some() {
            task.error = error;
        }
        Ok(task.clone())
    }

    async fn reclaim_stale_tasks(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for task in guard.tasks.values_mut() {
            let stale = matches!(task.status, TaskStatus::Assigned | TaskStatus::Running)
                && task.updated_at < older_than;
            if stale {
                task.status = TaskStatus::Pending;
                task.assigned_agent_id = None;
                task.updated_at = now;
                reclaimed.push(task.id.clone());
            }
        }
        Ok(reclaimed)
    }

    // ── Discovered devices ────────────────────────────────────────────────────

    async fn upsert_discovered(&self, device: &DiscoveredDevice) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .discovered
            .insert(device.mac.as_str().to_string(), device.clone());
        Ok(())
    }

    async fn list_discovered(&self) -> Result<Vec<DiscoveredDevice>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<DiscoveredDevice> = guard.discovered.values().cloned().collect();
        all.sort_by(|a, b| a.mac.as_str().cmp(b.mac.as_str()));
        Ok(all)
    }

    // ── Export / import history ───────────────────────────────────────────────

    async fn create_export_history(
        &self,
        row: &ExportHistory,
    ) -> Result<ExportHistory, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_export_history_id += 1;
        let mut stored = row.clone();
        stored.id = guard.next_export_history_id;
        guard.export_history.push(stored.clone());
        Ok(stored)
    }

    async fn get_export_history(
        &self,
        export_id: &str,
    ) -> Result<Option<ExportHistory>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .export_history
            .iter()
            .find(|h| h.export_id == export_id)
            .cloned())
    }

    async fn list_export_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ExportHistory>, StoreError> {
        let guard = self.inner.read().await;
        let mut all = guard.export_history.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_import_history(
        &self,
        row: &ImportHistory,
    ) -> Result<ImportHistory, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_import_history_id += 1;
        let mut stored = row.clone();
        stored.id = guard.next_import_history_id;
        guard.import_history.push(stored.clone());
        Ok(stored)
    }

    async fn list_import_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ImportHistory>, StoreError> {
        let guard = self.inner.read().await;
        let mut all = guard.import_history.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    // ── Backups ───────────────────────────────────────────────────────────────

    async fn create_backup(&self, record: &BackupRecord) -> Result<BackupRecord, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_backup_id += 1;
        let mut stored = record.clone();
        stored.id = guard.next_backup_id;
        guard.backups.insert(stored.backup_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.backups.get(backup_id).cloned())
    }

    async fn list_backups(&self) -> Result<Vec<BackupRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<BackupRecord> = guard.backups.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete_backup(&self, backup_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .backups
            .remove(backup_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("backup", backup_id))
    }

    // ── Export schedules ──────────────────────────────────────────────────────

    async fn create_schedule(
        &self,
        schedule: &ExportSchedule,
    ) -> Result<ExportSchedule, StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_schedule_id += 1;
        let mut stored = schedule.clone();
        stored.id = guard.next_schedule_id;
        guard.schedules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_schedule(&self, id: i64) -> Result<Option<ExportSchedule>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.schedules.get(&id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<ExportSchedule>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<ExportSchedule> = guard.schedules.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }

    async fn update_schedule(&self, schedule: &ExportSchedule) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.schedules.contains_key(&schedule.id) {
            return Err(StoreError::not_found("schedule", schedule.id));
        }
        guard.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn delete_schedule(&self, id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .schedules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("schedule", id))
    }

    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportSchedule>, StoreError> {
        let guard = self.inner.read().await;
        let mut due: Vec<ExportSchedule> = guard
            .schedules
            .values()
            .filter(|s| s.enabled)
            .filter(|s| s.next_run.map_or(false, |t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run);
        Ok(due)
    }
}
