use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shellymgr_domain::{
    BackupRecord, Device, DiscoveredDevice, ExportHistory, ExportSchedule, HistoryStatus,
    ImportHistory, Mac, NotificationChannel, NotificationHistory, NotificationRule,
    ProvisioningAgent, ProvisioningTask, TaskStatus, Template,
};

use crate::error::StoreError;

/// A page of history rows plus the total count matching the filter.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub rows: Vec<NotificationHistory>,
    pub total: u64,
}

/// Durable, transactional storage of every typed entity in the system.
///
/// The store is the only authoritative state; every other component is either
/// a cache of it or a transient coordinator. Callers hold only short-lived
/// references derived from queries and must not straddle transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Short label of the backing database, recorded in export metadata.
    fn database_type(&self) -> &'static str;

    // ── Devices ───────────────────────────────────────────────────────────────

    async fn create_device(&self, device: &Device) -> Result<Device, StoreError>;
    async fn get_device(&self, id: i64) -> Result<Option<Device>, StoreError>;
    async fn get_device_by_mac(&self, mac: &Mac) -> Result<Option<Device>, StoreError>;
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;
    async fn update_device(&self, device: &Device) -> Result<(), StoreError>;
    async fn delete_device(&self, id: i64) -> Result<(), StoreError>;
    /// Insert or update keyed by canonical MAC. Returns the stored row.
    async fn upsert_device_by_mac(&self, device: &Device) -> Result<Device, StoreError>;

    // ── Templates ─────────────────────────────────────────────────────────────

    async fn upsert_template(&self, template: &Template) -> Result<(), StoreError>;
    async fn get_template(&self, name: &str) -> Result<Option<Template>, StoreError>;
    async fn list_templates(&self) -> Result<Vec<Template>, StoreError>;
    async fn delete_template(&self, name: &str) -> Result<(), StoreError>;

    // ── Notification channels ─────────────────────────────────────────────────

    async fn create_channel(
        &self,
        channel: &NotificationChannel,
    ) -> Result<NotificationChannel, StoreError>;
    async fn get_channel(&self, id: i64) -> Result<Option<NotificationChannel>, StoreError>;
    async fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError>;
    async fn update_channel(&self, channel: &NotificationChannel) -> Result<(), StoreError>;
    /// Fails with [`StoreError::ChannelInUse`] while an enabled rule
    /// references the channel.
    async fn delete_channel(&self, id: i64) -> Result<(), StoreError>;

    // ── Notification rules ────────────────────────────────────────────────────

    async fn create_rule(&self, rule: &NotificationRule)
        -> Result<NotificationRule, StoreError>;
    async fn get_rule(&self, id: i64) -> Result<Option<NotificationRule>, StoreError>;
    async fn list_rules(&self) -> Result<Vec<NotificationRule>, StoreError>;
    async fn update_rule(&self, rule: &NotificationRule) -> Result<(), StoreError>;
    async fn delete_rule(&self, id: i64) -> Result<(), StoreError>;

    // ── Notification history ──────────────────────────────────────────────────

    async fn create_history(
        &self,
        row: &NotificationHistory,
    ) -> Result<NotificationHistory, StoreError>;
    async fn update_history(&self, row: &NotificationHistory) -> Result<(), StoreError>;
    async fn get_history(&self, id: i64) -> Result<Option<NotificationHistory>, StoreError>;
    async fn query_history(
        &self,
        channel_id: Option<i64>,
        status: Option<HistoryStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, StoreError>;
    /// `failed` rows whose `next_retry_at` has elapsed, oldest first.
    async fn list_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationHistory>, StoreError>;

    // ── Provisioning agents ───────────────────────────────────────────────────

    async fn upsert_agent(&self, agent: &ProvisioningAgent) -> Result<(), StoreError>;
    async fn get_agent(&self, id: &str) -> Result<Option<ProvisioningAgent>, StoreError>;
    async fn list_agents(&self) -> Result<Vec<ProvisioningAgent>, StoreError>;

    // ── Provisioning tasks ────────────────────────────────────────────────────

    async fn create_task(&self, task: &ProvisioningTask) -> Result<(), StoreError>;
    async fn get_task(&self, id: &str) -> Result<Option<ProvisioningTask>, StoreError>;
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
    ) -> Result<Vec<ProvisioningTask>, StoreError>;
    /// Atomically assign up to `limit` pending tasks to `agent_id` and return
    /// them. Tasks already assigned to this agent but still `assigned` are
    /// returned too (poll idempotence). Highest priority first, then oldest.
    async fn claim_tasks(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<ProvisioningTask>, StoreError>;
    /// Guarded status update: `agent_id` must be the current owner and the
    /// transition must be legal for agents. Returns the updated task.
    async fn update_task_status(
        &self,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProvisioningTask, StoreError>;
    /// Revert `assigned`/`running` tasks whose `updated_at` is older than
    /// `older_than` back to `pending`, clearing the owner. Returns the ids of
    /// reclaimed tasks.
    async fn reclaim_stale_tasks(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    // ── Discovered devices ────────────────────────────────────────────────────

    async fn upsert_discovered(&self, device: &DiscoveredDevice) -> Result<(), StoreError>;
    async fn list_discovered(&self) -> Result<Vec<DiscoveredDevice>, StoreError>;

    // ── Export / import history ───────────────────────────────────────────────

    async fn create_export_history(
        &self,
        row: &ExportHistory,
    ) -> Result<ExportHistory, StoreError>;
    async fn get_export_history(
        &self,
        export_id: &str,
    ) -> Result<Option<ExportHistory>, StoreError>;
    async fn list_export_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ExportHistory>, StoreError>;
    async fn create_import_history(
        &self,
        row: &ImportHistory,
    ) -> Result<ImportHistory, StoreError>;
    async fn list_import_history(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ImportHistory>, StoreError>;

    // ── Backups ───────────────────────────────────────────────────────────────

    async fn create_backup(&self, record: &BackupRecord) -> Result<BackupRecord, StoreError>;
    async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupRecord>, StoreError>;
    async fn list_backups(&self) -> Result<Vec<BackupRecord>, StoreError>;
    async fn delete_backup(&self, backup_id: &str) -> Result<(), StoreError>;

    // ── Export schedules ──────────────────────────────────────────────────────

    async fn create_schedule(
        &self,
        schedule: &ExportSchedule,
    ) -> Result<ExportSchedule, StoreError>;
    async fn get_schedule(&self, id: i64) -> Result<Option<ExportSchedule>, StoreError>;
    async fn list_schedules(&self) -> Result<Vec<ExportSchedule>, StoreError>;
    async fn update_schedule(&self, schedule: &ExportSchedule) -> Result<(), StoreError>;
    async fn delete_schedule(&self, id: i64) -> Result<(), StoreError>;
    /// Enabled schedules with `next_run <= now`.
    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportSchedule>, StoreError>;
}
