use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shellymgr_domain::{ExportData, ImportSource};
use shellymgr_store::Store;

use crate::error::SyncError;

// ── Plugin metadata ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Backup,
    Gitops,
    Template,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub supported_formats: Vec<String>,
    pub category: PluginCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    pub supports_incremental: bool,
    pub supports_scheduling: bool,
    pub requires_authentication: bool,
    pub supported_outputs: Vec<String>,
    /// Advisory upper bound on input data size, in bytes.
    pub max_data_size: Option<u64>,
    /// The engine never runs more than this many concurrent operations for
    /// the plugin.
    pub concurrency_level: usize,
}

impl Default for PluginCapabilities {
    fn default() -> Self {
        Self {
            supports_incremental: false,
            supports_scheduling: true,
            requires_authentication: false,
            supported_outputs: vec!["file".into()],
            max_data_size: None,
            concurrency_level: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PluginHealth {
    Healthy,
    Degraded { message: String },
    Unhealthy { message: String },
}

// ── Operation results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Skip,
}

/// One would-apply (preview / dry-run) or applied (import) change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub action: ChangeAction,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub record_count: usize,
    pub file_size: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub record_count: usize,
    pub estimated_size: u64,
    #[serde(default)]
    pub changes: Vec<SyncChange>,
    #[serde(default)]
    pub sample: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub records_imported: usize,
    pub changes: Vec<SyncChange>,
    pub dry_run: bool,
}

/// Store access and dry-run mode for import operations. Plugins must not
/// mutate the store when `dry_run` is set.
#[derive(Clone)]
pub struct ImportContext {
    pub store: Arc<dyn Store>,
    pub dry_run: bool,
}

// ── The plugin contract ───────────────────────────────────────────────────────

/// A pluggable export/import backend.
///
/// Registration is exclusive on `info().name`; `initialize` must succeed
/// before the plugin becomes visible. Implementations are flat capability
/// sets — no inheritance, the tagged [`PluginCapabilities`] record describes
/// what each variant can do.
#[async_trait]
pub trait SyncPlugin: Send + Sync + 'static {
    fn info(&self) -> PluginInfo;

    /// JSON schema describing the accepted config payload.
    fn config_schema(&self) -> Value;

    fn capabilities(&self) -> PluginCapabilities;

    fn validate_config(&self, config: &Value) -> Result<(), SyncError>;

    async fn initialize(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn health(&self) -> PluginHealth {
        PluginHealth::Healthy
    }

    async fn export(&self, data: &ExportData, config: &Value) -> Result<ExportResult, SyncError>;

    async fn preview(&self, data: &ExportData, config: &Value)
        -> Result<PreviewResult, SyncError>;

    async fn import(
        &self,
        source: &ImportSource,
        config: &Value,
        ctx: &ImportContext,
    ) -> Result<ImportResult, SyncError>;
}

impl std::fmt::Debug for dyn SyncPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPlugin").field("info", &self.info()).finish()
    }
}
