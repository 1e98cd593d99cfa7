use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shellymgr_domain::{BackupRecord, ExportFilters, ExportRequest};
use tracing::info;

use crate::engine::SyncEngine;
use crate::error::SyncError;

/// Directory (relative to the archive plugin's base) where backups land.
const BACKUP_SUBDIR: &str = "backups";

#[derive(Debug, Clone, Deserialize)]
pub struct BackupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Extra archive plugin config merged over the backup defaults.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_bytes: u64,
}

/// Drives full-system backups through the archive plugin and keeps the
/// backup catalog.
pub struct BackupManager {
    engine: Arc<SyncEngine>,
}

impl BackupManager {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn create_backup(&self, req: BackupRequest) -> Result<BackupRecord, SyncError> {
        let mut config = json!({
            "output_dir": BACKUP_SUBDIR,
            "include_discovered": true,
            "include_plugin_configs": true,
            "include_system_settings": true,
        });
        if let (Value::Object(base), Value::Object(overrides)) = (&mut config, &req.config) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }

        let request = ExportRequest {
            plugin_name: "archive".into(),
            format: "sma".into(),
            config,
            filters: ExportFilters::default(),
            requested_by: req.requested_by.clone(),
        };
        let outcome = self.engine.export(&request).await?;

        let record = BackupRecord {
            id: 0,
            backup_id: outcome.history.export_id.clone(),
            name: req.name,
            description: req.description,
            format: "sma".into(),
            device_count: outcome.history.record_count,
            file_size: outcome.history.file_size,
            checksum: outcome.history.checksum.clone().unwrap_or_default(),
            encrypted: false,
            success: outcome.history.success,
            error: outcome.history.error.clone(),
            file_path: outcome.result.as_ref().and_then(|r| r.output_path.clone()),
            created_at: Utc::now(),
        };
        let record = self.engine.store().create_backup(&record).await?;
        info!(backup_id = %record.backup_id, success = record.success, "backup created");
        Ok(record)
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<BackupRecord, SyncError> {
        self.engine
            .store()
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| shellymgr_store::StoreError::not_found("backup", backup_id).into())
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>, SyncError> {
        Ok(self.engine.store().list_backups().await?)
    }

    /// Read a backup's archive bytes for download.
    pub async fn read_backup_file(&self, backup_id: &str) -> Result<Vec<u8>, SyncError> {
        let record = self.get_backup(backup_id).await?;
        let path = record.file_path.ok_or_else(|| {
            SyncError::UnsupportedOperation(format!(
                "backup {backup_id} has no archive file"
            ))
        })?;
        std::fs::read(&path).map_err(|e| SyncError::io(path.display(), e))
    }

    /// Delete the catalog row and, best-effort, the archive file.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<(), SyncError> {
        let record = self.get_backup(backup_id).await?;
        self.engine.store().delete_backup(backup_id).await?;
        if let Some(path) = record.file_path {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "backup file removal failed");
            }
        }
        Ok(())
    }

    pub async fn statistics(&self) -> Result<BackupStatistics, SyncError> {
        let records = self.engine.store().list_backups().await?;
        Ok(BackupStatistics {
            total: records.len(),
            successful: records.iter().filter(|r| r.success).count(),
            failed: records.iter().filter(|r| !r.success).count(),
            total_bytes: records.iter().map(|r| r.file_size).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellymgr_domain::{Device, Mac};
    use shellymgr_store::{InMemoryStore, Store};

    use crate::archive::ArchivePlugin;
    use crate::registry::PluginRegistry;

    async fn manager(base: &std::path::Path) -> (Arc<InMemoryStore>, BackupManager) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(ArchivePlugin::new(base)))
            .await
            .unwrap();
        let engine = Arc::new(SyncEngine::new(store.clone(), registry));
        (store, BackupManager::new(engine))
    }

    #[tokio::test]
    async fn backup_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (store, manager) = manager(dir.path()).await;
        store
            .upsert_device_by_mac(&Device::new(Mac::parse("AA:BB:CC:DD:EE:01").unwrap(), "d"))
            .await
            .unwrap();

        let record = manager
            .create_backup(BackupRequest {
                name: "nightly".into(),
                description: "before upgrade".into(),
                config: Value::Null,
                requested_by: "ops".into(),
            })
            .await
            .unwrap();
        assert!(record.success);
        assert!(record.checksum.starts_with("sha256:"));
        assert!(record.file_size > 0);

        let bytes = manager.read_backup_file(&record.backup_id).await.unwrap();
        assert_eq!(bytes.len() as u64, record.file_size);

        let stats = manager.statistics().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.successful, 1);

        manager.delete_backup(&record.backup_id).await.unwrap();
        assert!(manager.get_backup(&record.backup_id).await.is_err());
        assert!(manager.list_backups().await.unwrap().is_empty());
    }
}
