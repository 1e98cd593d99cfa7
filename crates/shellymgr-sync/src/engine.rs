use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shellymgr_domain::{
    validate_schedule_interval, DeviceConfiguration, ExportData, ExportFilters, ExportHistory,
    ExportMetadata, ExportRequest, ExportSchedule, ImportHistory, ImportRequest,
};
use shellymgr_store::Store;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::plugin::{ExportResult, ImportContext, ImportResult, PreviewResult, SyncPlugin};
use crate::registry::PluginRegistry;

/// Stable result of an export run: the persisted history row plus the
/// plugin-level result when the plugin succeeded.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub history: ExportHistory,
    pub result: Option<ExportResult>,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub history: ImportHistory,
    pub result: Option<ImportResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_records: usize,
    pub total_bytes: u64,
}

/// Loads data sets from the store, applies filters, dispatches to plugins,
/// and records history with unique run ids. Never exceeds a plugin's declared
/// concurrency level.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    system_version: String,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            store,
            registry,
            semaphores: Mutex::new(HashMap::new()),
            system_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fetch the plugin, enforce its format set, and validate the config —
    /// all before any data is loaded or history written.
    async fn resolve(
        &self,
        plugin_name: &str,
        format: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn SyncPlugin>, SyncError> {
        let plugin = self.registry.get(plugin_name).await?;
        let info = plugin.info();
        if !info.supported_formats.iter().any(|f| f == format) {
            return Err(SyncError::UnsupportedFormat {
                plugin: plugin_name.to_string(),
                format: format.to_string(),
            });
        }
        plugin.validate_config(config)?;
        Ok(plugin)
    }

    async fn permit(
        &self,
        plugin_name: &str,
        plugin: &Arc<dyn SyncPlugin>,
    ) -> OwnedSemaphorePermit {
        let sem = {
            let mut map = self.semaphores.lock().await;
            map.entry(plugin_name.to_string())
                .or_insert_with(|| {
                    let level = plugin.capabilities().concurrency_level.max(1);
                    Arc::new(Semaphore::new(level))
                })
                .clone()
        };
        sem.acquire_owned().await.expect("engine semaphores are never closed")
    }

    /// Load the filtered data set handed to plugins.
    pub async fn load_export_data(
        &self,
        filters: &ExportFilters,
        export_id: &str,
        requested_by: &str,
        export_type: &str,
    ) -> Result<ExportData, SyncError> {
        let devices: Vec<_> = self
            .store
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| filters.matches(d))
            .collect();
        let templates = self.store.list_templates().await?;
        let discovered_devices = self.store.list_discovered().await?;

        let configurations = devices
            .iter()
            .map(|d| DeviceConfiguration {
                device_id: d.id,
                template_name: d
                    .settings
                    .get("template")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                config: d.settings.clone(),
            })
            .collect();

        let plugin_configurations = self
            .registry
            .list()
            .await
            .into_iter()
            .filter_map(|info| serde_json::to_value(info).ok())
            .collect();

        let metadata = ExportMetadata {
            export_id: export_id.to_string(),
            requested_by: requested_by.to_string(),
            export_type: export_type.to_string(),
            total_devices: devices.len(),
            total_templates: templates.len(),
            system_version: self.system_version.clone(),
            database_type: self.store.database_type().to_string(),
            created_at: Utc::now(),
        };

        Ok(ExportData {
            devices,
            configurations,
            templates,
            discovered_devices,
            network_settings: None,
            plugin_configurations,
            system_settings: Some(json!({
                "system_version": self.system_version,
                "database_type": self.store.database_type(),
            })),
            metadata,
        })
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Run a full export. Request-level validation failures (unknown plugin,
    /// unsupported format, bad config) return an error without touching
    /// history; everything past that point is recorded as a history row,
    /// success or not.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportOutcome, SyncError> {
        let export_id = Uuid::new_v4().simple().to_string();
        let plugin = self
            .resolve(&request.plugin_name, &request.format, &request.config)
            .await?;
        let _permit = self.permit(&request.plugin_name, &plugin).await;
        let started = Instant::now();

        let outcome = match self
            .load_export_data(&request.filters, &export_id, &request.requested_by, "export")
            .await
        {
            Ok(data) => plugin.export(&data, &request.config).await,
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let history = match &outcome {
            Ok(result) => ExportHistory {
                id: 0,
                export_id: export_id.clone(),
                plugin_name: request.plugin_name.clone(),
                format: request.format.clone(),
                requested_by: request.requested_by.clone(),
                success: true,
                record_count: result.record_count,
                file_size: result.file_size,
                checksum: result.checksum.clone(),
                duration_ms,
                error: None,
                created_at: Utc::now(),
            },
            Err(e) => ExportHistory {
                id: 0,
                export_id: export_id.clone(),
                plugin_name: request.plugin_name.clone(),
                format: request.format.clone(),
                requested_by: request.requested_by.clone(),
                success: false,
                record_count: 0,
                file_size: 0,
                checksum: None,
                duration_ms,
                error: Some(e.to_string()),
                created_at: Utc::now(),
            },
        };
        let history = self.store.create_export_history(&history).await?;

        match &outcome {
            Ok(result) => info!(
                export_id = %export_id,
                plugin = %request.plugin_name,
                records = result.record_count,
                duration_ms,
                "export complete"
            ),
            Err(e) => warn!(
                export_id = %export_id,
                plugin = %request.plugin_name,
                error = %e,
                "export failed"
            ),
        }
        Ok(ExportOutcome { history, result: outcome.ok() })
    }

    /// Identical to export up to data loading, then calls the plugin's
    /// preview. No persistence beyond the audit log line.
    pub async fn preview(&self, request: &ExportRequest) -> Result<PreviewResult, SyncError> {
        let export_id = Uuid::new_v4().simple().to_string();
        let plugin = self
            .resolve(&request.plugin_name, &request.format, &request.config)
            .await?;
        let _permit = self.permit(&request.plugin_name, &plugin).await;
        let data = self
            .load_export_data(&request.filters, &export_id, &request.requested_by, "preview")
            .await?;
        let result = plugin.preview(&data, &request.config).await?;
        info!(
            export_id = %export_id,
            plugin = %request.plugin_name,
            records = result.record_count,
            "preview"
        );
        Ok(result)
    }

    // ── Import ────────────────────────────────────────────────────────────────

    pub async fn import(&self, request: &ImportRequest) -> Result<ImportOutcome, SyncError> {
        let import_id = Uuid::new_v4().simple().to_string();
        let plugin = self
            .resolve(&request.plugin_name, &request.format, &request.config)
            .await?;
        let _permit = self.permit(&request.plugin_name, &plugin).await;
        let started = Instant::now();

        let ctx = ImportContext { store: self.store.clone(), dry_run: request.dry_run };
        let outcome = plugin.import(&request.source, &request.config, &ctx).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let history = match &outcome {
            Ok(result) => ImportHistory {
                id: 0,
                import_id: import_id.clone(),
                plugin_name: request.plugin_name.clone(),
                format: request.format.clone(),
                requested_by: request.requested_by.clone(),
                success: true,
                records_imported: result.records_imported,
                dry_run: request.dry_run,
                duration_ms,
                error: None,
                created_at: Utc::now(),
            },
            Err(e) => ImportHistory {
                id: 0,
                import_id: import_id.clone(),
                plugin_name: request.plugin_name.clone(),
                format: request.format.clone(),
                requested_by: request.requested_by.clone(),
                success: false,
                records_imported: 0,
                dry_run: request.dry_run,
                duration_ms,
                error: Some(e.to_string()),
                created_at: Utc::now(),
            },
        };
        let history = self.store.create_import_history(&history).await?;

        match &outcome {
            Ok(result) => info!(
                import_id = %import_id,
                plugin = %request.plugin_name,
                records = result.records_imported,
                dry_run = request.dry_run,
                "import complete"
            ),
            Err(e) => warn!(import_id = %import_id, error = %e, "import failed"),
        }
        Ok(ImportOutcome { history, result: outcome.ok() })
    }

    // ── Statistics ────────────────────────────────────────────────────────────

    pub async fn export_statistics(&self) -> Result<SyncStatistics, SyncError> {
        let rows = self.store.list_export_history(10_000, 0).await?;
        Ok(SyncStatistics {
            total: rows.len(),
            successful: rows.iter().filter(|r| r.success).count(),
            failed: rows.iter().filter(|r| !r.success).count(),
            total_records: rows.iter().map(|r| r.record_count).sum(),
            total_bytes: rows.iter().map(|r| r.file_size).sum(),
        })
    }

    pub async fn import_statistics(&self) -> Result<SyncStatistics, SyncError> {
        let rows = self.store.list_import_history(10_000, 0).await?;
        Ok(SyncStatistics {
            total: rows.len(),
            successful: rows.iter().filter(|r| r.success).count(),
            failed: rows.iter().filter(|r| !r.success).count(),
            total_records: rows.iter().map(|r| r.records_imported).sum(),
            total_bytes: 0,
        })
    }

    // ── Schedules ─────────────────────────────────────────────────────────────

    pub async fn create_schedule(
        &self,
        mut schedule: ExportSchedule,
    ) -> Result<ExportSchedule, SyncError> {
        validate_schedule_interval(schedule.interval_seconds)?;
        self.resolve(
            &schedule.request.plugin_name,
            &schedule.request.format,
            &schedule.request.config,
        )
        .await?;
        let now = Utc::now();
        schedule.created_at = now;
        schedule.updated_at = now;
        schedule.next_run = if schedule.enabled {
            Some(now + ChronoDuration::seconds(schedule.interval_seconds as i64))
        } else {
            None
        };
        Ok(self.store.create_schedule(&schedule).await?)
    }

    pub async fn update_schedule(
        &self,
        mut schedule: ExportSchedule,
    ) -> Result<ExportSchedule, SyncError> {
        validate_schedule_interval(schedule.interval_seconds)?;
        self.resolve(
            &schedule.request.plugin_name,
            &schedule.request.format,
            &schedule.request.config,
        )
        .await?;
        let now = Utc::now();
        schedule.updated_at = now;
        schedule.next_run = if schedule.enabled {
            Some(now + ChronoDuration::seconds(schedule.interval_seconds as i64))
        } else {
            None
        };
        self.store.update_schedule(&schedule).await?;
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use shellymgr_domain::{Device, DeviceStatus, ImportSource, Mac};
    use shellymgr_store::{InMemoryStore, Store};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::archive::ArchivePlugin;
    use crate::plugin::{PluginCapabilities, PluginCategory, PluginInfo};

    async fn engine_with_archive(base: &std::path::Path) -> (Arc<InMemoryStore>, SyncEngine) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(ArchivePlugin::new(base)))
            .await
            .unwrap();
        let engine = SyncEngine::new(store.clone(), registry);
        (store, engine)
    }

    fn export_request(format: &str) -> ExportRequest {
        ExportRequest {
            plugin_name: "archive".into(),
            format: format.into(),
            config: Value::Null,
            filters: ExportFilters::default(),
            requested_by: "tester".into(),
        }
    }

    #[tokio::test]
    async fn export_records_history_with_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_archive(dir.path()).await;
        store
            .upsert_device_by_mac(&Device::new(Mac::parse("AA:BB:CC:DD:EE:01").unwrap(), "d"))
            .await
            .unwrap();

        let outcome = engine.export(&export_request("sma")).await.unwrap();
        assert!(outcome.history.success);
        assert!(!outcome.history.export_id.is_empty());
        assert_eq!(outcome.history.record_count, 1);
        assert!(outcome.result.unwrap().file_size > 0);

        let listed = store.list_export_history(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].export_id, outcome.history.export_id);
        // The plugin's integrity checksum survives into the audit row.
        assert!(listed[0]
            .checksum
            .as_deref()
            .is_some_and(|c| c.starts_with("sha256:")));
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_archive(dir.path()).await;

        let err = engine.export(&export_request("tar")).await.unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedFormat { .. }));
        // Nothing recorded for request-level rejections.
        assert!(store.list_export_history(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine_with_archive(dir.path()).await;

        let mut req = export_request("sma");
        req.plugin_name = "nope".into();
        let err = engine.export(&req).await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn filters_restrict_the_loaded_data_set() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_archive(dir.path()).await;

        let mut online = Device::new(Mac::parse("AA:BB:CC:DD:EE:01").unwrap(), "on");
        online.status = DeviceStatus::Online;
        store.upsert_device_by_mac(&online).await.unwrap();
        let mut offline = Device::new(Mac::parse("AA:BB:CC:DD:EE:02").unwrap(), "off");
        offline.status = DeviceStatus::Offline;
        store.upsert_device_by_mac(&offline).await.unwrap();

        let filters = ExportFilters {
            device_statuses: vec![DeviceStatus::Online],
            ..Default::default()
        };
        let data = engine
            .load_export_data(&filters, "x", "t", "export")
            .await
            .unwrap();
        assert_eq!(data.devices.len(), 1);
        assert_eq!(data.devices[0].name, "on");
        assert_eq!(data.metadata.total_devices, 1);
    }

    #[tokio::test]
    async fn dry_run_import_records_history_and_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine_with_archive(dir.path()).await;
        store
            .upsert_device_by_mac(&Device::new(Mac::parse("AA:BB:CC:DD:EE:01").unwrap(), "d"))
            .await
            .unwrap();

        let outcome = engine.export(&export_request("sma")).await.unwrap();
        let path = outcome.result.unwrap().output_path.unwrap();
        store.delete_device(1).await.unwrap();

        let import = ImportRequest {
            plugin_name: "archive".into(),
            format: "sma".into(),
            config: Value::Null,
            source: ImportSource::File { path },
            requested_by: "tester".into(),
            dry_run: true,
        };
        let outcome = engine.import(&import).await.unwrap();
        assert!(outcome.history.success);
        assert!(outcome.history.dry_run);
        assert!(store.list_devices().await.unwrap().is_empty());

        let listed = store.list_import_history(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn schedule_interval_bounds_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (_, engine) = engine_with_archive(dir.path()).await;

        let schedule = ExportSchedule {
            id: 0,
            name: "hourly".into(),
            interval_seconds: 30,
            enabled: true,
            request: export_request("sma"),
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let err = engine.create_schedule(schedule.clone()).await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::Validation);

        let mut valid = schedule;
        valid.interval_seconds = 3600;
        let created = engine.create_schedule(valid).await.unwrap();
        assert!(created.next_run.is_some());
    }

    // Plugin whose export parks until told how many peers it saw, to observe
    // the engine's concurrency ceiling.
    struct SlowPlugin {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl crate::plugin::SyncPlugin for SlowPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo {
                name: "slow".into(),
                version: "0".into(),
                description: String::new(),
                author: String::new(),
                license: "MIT".into(),
                supported_formats: vec!["json".into()],
                category: PluginCategory::Custom,
            }
        }

        fn config_schema(&self) -> Value {
            Value::Null
        }

        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities { concurrency_level: 1, ..Default::default() }
        }

        fn validate_config(&self, _config: &Value) -> Result<(), SyncError> {
            Ok(())
        }

        async fn export(
            &self,
            _data: &ExportData,
            _config: &Value,
        ) -> Result<crate::plugin::ExportResult, SyncError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(crate::plugin::ExportResult {
                record_count: 0,
                file_size: 0,
                checksum: None,
                output_path: None,
            })
        }

        async fn preview(
            &self,
            _data: &ExportData,
            _config: &Value,
        ) -> Result<crate::plugin::PreviewResult, SyncError> {
            unimplemented!()
        }

        async fn import(
            &self,
            _source: &ImportSource,
            _config: &Value,
            _ctx: &crate::plugin::ImportContext,
        ) -> Result<crate::plugin::ImportResult, SyncError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn concurrency_level_is_never_exceeded() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(PluginRegistry::new());
        let plugin = Arc::new(SlowPlugin {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        registry.register(plugin.clone()).await.unwrap();
        let engine = Arc::new(SyncEngine::new(store, registry));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let req = ExportRequest {
                    plugin_name: "slow".into(),
                    format: "json".into(),
                    config: Value::Null,
                    filters: ExportFilters::default(),
                    requested_by: "t".into(),
                };
                engine.export(&req).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(plugin.peak.load(Ordering::SeqCst), 1);
    }
}
