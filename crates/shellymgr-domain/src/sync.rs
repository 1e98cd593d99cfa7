use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::device::{Device, DeviceStatus, DiscoveredDevice, Template};
use crate::error::DomainError;

// ── Export requests ───────────────────────────────────────────────────────────

/// Filters applied when loading the data set for an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExportFilters {
    #[serde(default)]
    pub device_ids: Vec<i64>,
    #[serde(default)]
    pub device_types: Vec<String>,
    #[serde(default)]
    pub device_statuses: Vec<DeviceStatus>,
    #[serde(default)]
    pub last_seen_after: Option<DateTime<Utc>>,
}

impl ExportFilters {
    pub fn matches(&self, device: &Device) -> bool {
        if !self.device_ids.is_empty() && !self.device_ids.contains(&device.id) {
            return false;
        }
        if !self.device_types.is_empty() && !self.device_types.contains(&device.device_type) {
            return false;
        }
        if !self.device_statuses.is_empty() && !self.device_statuses.contains(&device.status) {
            return false;
        }
        if let Some(after) = self.last_seen_after {
            match device.last_seen {
                Some(seen) if seen >= after => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub plugin_name: String,
    pub format: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub filters: ExportFilters,
    #[serde(default)]
    pub requested_by: String,
}

/// Where an import reads its payload from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImportSource {
    File { path: PathBuf },
    Data { bytes: Vec<u8> },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub plugin_name: String,
    pub format: String,
    #[serde(default)]
    pub config: Value,
    pub source: ImportSource,
    #[serde(default)]
    pub requested_by: String,
    /// Honored by plugins: compute changes, mutate nothing.
    #[serde(default)]
    pub dry_run: bool,
}

// ── Export data set ───────────────────────────────────────────────────────────

/// Per-device intended configuration, derived from device settings at load
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub device_id: i64,
    #[serde(default)]
    pub template_name: Option<String>,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_id: String,
    pub requested_by: String,
    pub export_type: String,
    pub total_devices: usize,
    pub total_templates: usize,
    pub system_version: String,
    pub database_type: String,
    pub created_at: DateTime<Utc>,
}

/// The transient data set handed to sync plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportData {
    pub devices: Vec<Device>,
    pub configurations: Vec<DeviceConfiguration>,
    pub templates: Vec<Template>,
    pub discovered_devices: Vec<DiscoveredDevice>,
    #[serde(default)]
    pub network_settings: Option<Value>,
    #[serde(default)]
    pub plugin_configurations: Vec<Value>,
    #[serde(default)]
    pub system_settings: Option<Value>,
    pub metadata: ExportMetadata,
}

// ── History and audit records ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportHistory {
    pub id: i64,
    /// Opaque run id, unique per export.
    pub export_id: String,
    pub plugin_name: String,
    pub format: String,
    pub requested_by: String,
    pub success: bool,
    pub record_count: usize,
    pub file_size: u64,
    /// Integrity checksum reported by the plugin, when it produces one.
    #[serde(default)]
    pub checksum: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportHistory {
    pub id: i64,
    pub import_id: String,
    pub plugin_name: String,
    pub format: String,
    pub requested_by: String,
    pub success: bool,
    pub records_imported: usize,
    pub dry_run: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub backup_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub format: String,
    pub device_count: usize,
    pub file_size: u64,
    pub checksum: String,
    pub encrypted: bool,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Local path of the produced archive; None when the export failed.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

// ── Schedules ─────────────────────────────────────────────────────────────────

pub const MIN_SCHEDULE_INTERVAL_SECS: u64 = 60;
pub const MAX_SCHEDULE_INTERVAL_SECS: u64 = 30 * 24 * 3600;

/// A recurring export request executed by the ticker subsystem.
///
/// Invariant: `next_run >= last_run + interval` while enabled; `next_run` is
/// undefined when disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSchedule {
    pub id: i64,
    pub name: String,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub request: ExportRequest,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn validate_schedule_interval(seconds: u64) -> Result<(), DomainError> {
    if !(MIN_SCHEDULE_INTERVAL_SECS..=MAX_SCHEDULE_INTERVAL_SECS).contains(&seconds) {
        return Err(DomainError::InvalidScheduleInterval { seconds });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Mac;

    fn device(id: i64, device_type: &str, status: DeviceStatus) -> Device {
        let mut d = Device::new(Mac::parse("AA:BB:CC:DD:EE:FF").unwrap(), "d");
        d.id = id;
        d.device_type = device_type.into();
        d.status = status;
        d
    }

    #[test]
    fn filters_match_empty_is_all() {
        let f = ExportFilters::default();
        assert!(f.matches(&device(1, "SHSW-1", DeviceStatus::Online)));
    }

    #[test]
    fn filters_by_id_type_status() {
        let f = ExportFilters {
            device_ids: vec![1, 2],
            device_types: vec!["SHSW-1".into()],
            device_statuses: vec![DeviceStatus::Online],
            last_seen_after: None,
        };
        assert!(f.matches(&device(1, "SHSW-1", DeviceStatus::Online)));
        assert!(!f.matches(&device(3, "SHSW-1", DeviceStatus::Online)));
        assert!(!f.matches(&device(1, "SHSW-25", DeviceStatus::Online)));
        assert!(!f.matches(&device(1, "SHSW-1", DeviceStatus::Offline)));
    }

    #[test]
    fn filters_by_last_seen() {
        let cutoff = Utc::now();
        let f = ExportFilters { last_seen_after: Some(cutoff), ..Default::default() };

        let mut seen = device(1, "SHSW-1", DeviceStatus::Online);
        seen.last_seen = Some(cutoff + chrono::Duration::seconds(10));
        assert!(f.matches(&seen));

        let mut stale = device(2, "SHSW-1", DeviceStatus::Online);
        stale.last_seen = Some(cutoff - chrono::Duration::seconds(10));
        assert!(!f.matches(&stale));

        let never = device(3, "SHSW-1", DeviceStatus::Online);
        assert!(!f.matches(&never));
    }

    #[test]
    fn schedule_interval_bounds() {
        assert!(validate_schedule_interval(59).is_err());
        assert!(validate_schedule_interval(60).is_ok());
        assert!(validate_schedule_interval(MAX_SCHEDULE_INTERVAL_SECS).is_ok());
        assert!(validate_schedule_interval(MAX_SCHEDULE_INTERVAL_SECS + 1).is_err());
    }
}
