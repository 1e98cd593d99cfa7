use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use shellymgr_domain::{
    ChannelType, Device, DeviceFilter, ExportRequest, ExportSchedule, HistoryStatus, Mac,
    NotificationChannel, NotificationEvent, NotificationRule, RuleLevel, RuleSchedule,
    TaskStatus,
};
use shellymgr_provision::{AgentRegistration, DiscoveredDeviceReport, NewTask};
use shellymgr_sync::BackupRequest;

use crate::envelope::{ok, ok_paginated};
use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list_devices().await?;
    Ok(StatusCode::OK)
}

// ── Devices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeviceBody {
    pub mac: String,
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub firmware: String,
    #[serde(default)]
    pub settings: Option<Value>,
}

pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.store.list_devices().await?;
    Ok(ok(devices))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let device = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device {id} not found")))?;
    Ok(ok(device))
}

pub async fn create_device(
    State(state): State<AppState>,
    Json(body): Json<DeviceBody>,
) -> Result<Json<Value>, ApiError> {
    let mut device = Device::new(Mac::parse(&body.mac)?, body.name);
    device.ip = body.ip;
    device.device_type = body.device_type;
    device.firmware = body.firmware;
    if let Some(settings) = body.settings {
        device.settings = settings;
    }
    let created = state.store.create_device(&device).await?;
    Ok(ok(created))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DeviceBody>,
) -> Result<Json<Value>, ApiError> {
    let mut device = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device {id} not found")))?;
    device.mac = Mac::parse(&body.mac)?;
    device.name = body.name;
    device.ip = body.ip;
    device.device_type = body.device_type;
    device.firmware = body.firmware;
    if let Some(settings) = body.settings {
        device.settings = settings;
    }
    state.store.update_device(&device).await?;
    Ok(ok(device))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_device(id).await?;
    Ok(ok(json!({"deleted": id})))
}

// ── Notification channels ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChannelBody {
    pub name: String,
    /// Kept as a string so unsupported types fail with a validation error
    /// instead of a body-rejection.
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub config: Value,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(body): Json<ChannelBody>,
) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let channel = NotificationChannel {
        id: 0,
        name: body.name,
        channel_type: ChannelType::parse(&body.channel_type)?,
        enabled: body.enabled,
        config: body.config,
        description: body.description,
        created_at: now,
        updated_at: now,
    };
    let created = state.dispatcher.create_channel(channel).await?;
    Ok(ok(created))
}

pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.store.list_channels().await?))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let channel = state
        .store
        .get_channel(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("channel {id} not found")))?;
    Ok(ok(channel))
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ChannelBody>,
) -> Result<Json<Value>, ApiError> {
    let existing = state
        .store
        .get_channel(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("channel {id} not found")))?;
    let channel = NotificationChannel {
        id,
        name: body.name,
        channel_type: ChannelType::parse(&body.channel_type)?,
        enabled: body.enabled,
        config: body.config,
        description: body.description,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    let updated = state.dispatcher.update_channel(channel).await?;
    Ok(ok(updated))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.dispatcher.delete_channel(id).await?;
    Ok(ok(json!({"deleted": id})))
}

pub async fn test_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let row = state.dispatcher.test_channel(id).await?;
    Ok(ok(row))
}

// ── Notification rules ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RuleBody {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub channel_id: i64,
    pub alert_level: RuleLevel,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub device_filter: Option<DeviceFilter>,
    #[serde(default)]
    pub min_severity: Option<shellymgr_domain::AlertLevel>,
    #[serde(default)]
    pub min_interval_minutes: u32,
    #[serde(default)]
    pub max_per_hour: Option<u32>,
    #[serde(default)]
    pub schedule: Option<RuleSchedule>,
}

impl RuleBody {
    fn into_rule(self, id: i64, created_at: chrono::DateTime<Utc>) -> NotificationRule {
        NotificationRule {
            id,
            name: self.name,
            enabled: self.enabled,
            channel_id: self.channel_id,
            alert_level: self.alert_level,
            categories: self.categories,
            device_filter: self.device_filter,
            min_severity: self.min_severity,
            min_interval_minutes: self.min_interval_minutes,
            max_per_hour: self.max_per_hour,
            schedule: self.schedule,
            created_at,
            updated_at: Utc::now(),
        }
    }
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(body): Json<RuleBody>,
) -> Result<Json<Value>, ApiError> {
    let rule = body.into_rule(0, Utc::now());
    let created = state.dispatcher.create_rule(rule).await?;
    Ok(ok(created))
}

pub async fn list_rules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.store.list_rules().await?))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RuleBody>,
) -> Result<Json<Value>, ApiError> {
    let existing = state
        .store
        .get_rule(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("rule {id} not found")))?;
    let rule = body.into_rule(id, existing.created_at);
    let updated = state.dispatcher.update_rule(rule).await?;
    Ok(ok(updated))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.dispatcher.delete_rule(id).await?;
    Ok(ok(json!({"deleted": id})))
}

// ── Notification dispatch and history ─────────────────────────────────────────

pub async fn send_notification(
    State(state): State<AppState>,
    Json(event): Json<NotificationEvent>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.dispatcher.send_notification(&event).await?;
    Ok(ok(json!({"matched": rows.len(), "history": rows})))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub channel_id: Option<i64>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

fn parse_history_status(s: &str) -> Result<HistoryStatus, ApiError> {
    match s {
        "pending" => Ok(HistoryStatus::Pending),
        "sent" => Ok(HistoryStatus::Sent),
        "failed" => Ok(HistoryStatus::Failed),
        other => Err(ApiError::validation(format!("unknown status '{other}'"))),
    }
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = q.status.as_deref().map(parse_history_status).transpose()?;
    let page = state
        .dispatcher
        .get_history(q.channel_id, status, q.limit, q.offset)
        .await?;
    Ok(ok_paginated(page.rows, q.limit, q.offset, page.total))
}

// ── Sync: export / import ─────────────────────────────────────────────────────

pub async fn run_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.export(&request).await?;
    Ok(ok(json!({"history": outcome.history, "result": outcome.result})))
}

pub async fn preview_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<Value>, ApiError> {
    let preview = state.engine.preview(&request).await?;
    Ok(ok(preview))
}

pub async fn get_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let history = state
        .store
        .get_export_history(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("export {id} not found")))?;
    Ok(ok(history))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

pub async fn export_history(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.store.list_export_history(q.limit, q.offset).await?))
}

pub async fn export_statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.engine.export_statistics().await?))
}

pub async fn run_import(
    State(state): State<AppState>,
    Json(request): Json<shellymgr_domain::ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.engine.import(&request).await?;
    Ok(ok(json!({"history": outcome.history, "result": outcome.result})))
}

pub async fn preview_import(
    State(state): State<AppState>,
    Json(mut request): Json<shellymgr_domain::ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    // Preview is a forced dry run.
    request.dry_run = true;
    let outcome = state.engine.import(&request).await?;
    Ok(ok(json!({"history": outcome.history, "result": outcome.result})))
}

pub async fn import_history(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.store.list_import_history(q.limit, q.offset).await?))
}

pub async fn import_statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.engine.import_statistics().await?))
}

pub async fn list_plugins(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.engine.registry().health_report().await))
}

// ── Backups ───────────────────────────────────────────────────────────────────

pub async fn create_backup(
    State(state): State<AppState>,
    Json(request): Json<BackupRequest>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.backups.create_backup(request).await?))
}

pub async fn list_backups(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.backups.list_backups().await?))
}

pub async fn get_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.backups.get_backup(&id).await?))
}

pub async fn download_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.backups.get_backup(&id).await?;
    let bytes = state.backups.read_backup_file(&id).await?;
    let disposition = format!(
        "attachment; filename=\"{}.sma\"",
        record.backup_id
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.backups.delete_backup(&id).await?;
    Ok(ok(json!({"deleted": id})))
}

pub async fn backup_statistics(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.backups.statistics().await?))
}

// ── Export schedules ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub name: String,
    pub interval_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub request: ExportRequest,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let schedule = ExportSchedule {
        id: 0,
        name: body.name,
        interval_seconds: body.interval_seconds,
        enabled: body.enabled,
        request: body.request,
        last_run: None,
        next_run: None,
        created_at: now,
        updated_at: now,
    };
    Ok(ok(state.engine.create_schedule(schedule).await?))
}

pub async fn list_schedules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.store.list_schedules().await?))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let schedule = state
        .store
        .get_schedule(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("schedule {id} not found")))?;
    Ok(ok(schedule))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Value>, ApiError> {
    let existing = state
        .store
        .get_schedule(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("schedule {id} not found")))?;
    let schedule = ExportSchedule {
        id,
        name: body.name,
        interval_seconds: body.interval_seconds,
        enabled: body.enabled,
        request: body.request,
        last_run: existing.last_run,
        next_run: existing.next_run,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    Ok(ok(state.engine.update_schedule(schedule).await?))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_schedule(id).await?;
    Ok(ok(json!({"deleted": id})))
}

pub async fn run_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.ticker.run_schedule(id).await?;
    Ok(ok(json!({"history": outcome.history, "result": outcome.result})))
}

// ── Provisioner ───────────────────────────────────────────────────────────────

pub async fn provisioner_health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let agents = state.orchestrator.list_agents().await?;
    let pending = state
        .orchestrator
        .list_tasks(Some(TaskStatus::Pending))
        .await?;
    Ok(ok(json!({
        "status": "ok",
        "agents": agents.len(),
        "pending_tasks": pending.len(),
    })))
}

pub async fn register_agent(
    State(state): State<AppState>,
    Json(registration): Json<AgentRegistration>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.register_agent(registration).await?))
}

pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.list_agents().await?))
}

pub async fn poll_agent_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.poll_tasks(&id).await?))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(new): Json<NewTask>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.create_task(new).await?))
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<TaskQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.list_tasks(q.status).await?))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let task = state
        .orchestrator
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;
    Ok(ok(task))
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusBody {
    pub agent_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn update_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TaskStatusBody>,
) -> Result<Json<Value>, ApiError> {
    let task = state
        .orchestrator
        .update_task_status(&id, &body.agent_id, body.status, body.result, body.error)
        .await?;
    Ok(ok(task))
}

#[derive(Debug, Deserialize)]
pub struct DiscoveredBody {
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub devices: Vec<DiscoveredDeviceReport>,
}

pub async fn report_discovered(
    State(state): State<AppState>,
    Json(body): Json<DiscoveredBody>,
) -> Result<Json<Value>, ApiError> {
    let stored = state
        .orchestrator
        .report_discovered(&body.agent_id, body.task_id.as_deref(), body.devices)
        .await?;
    Ok(ok(json!({"stored": stored})))
}

pub async fn list_discovered(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(ok(state.orchestrator.list_discovered().await?))
}
