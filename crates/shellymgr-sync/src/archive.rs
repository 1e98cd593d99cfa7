use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use shellymgr_domain::{Device, DiscoveredDevice, ExportData, ImportSource, Template};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::plugin::{
    ChangeAction, ExportResult, ImportContext, ImportResult, PluginCapabilities, PluginCategory,
    PluginInfo, PreviewResult, SyncChange, SyncPlugin,
};

pub const SMA_VERSION: &str = "1.0";
pub const SMA_FORMAT_VERSION: &str = "1";

/// Field-name fragments whose values are replaced with `[REDACTED]` when
/// `exclude_sensitive` is set. Matched case-insensitively as substrings.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password", "passwd", "pwd", "secret", "key", "token", "api_key", "apikey", "auth",
    "credential", "private",
];

pub const REDACTED: &str = "[REDACTED]";

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Output directory, relative to the plugin's base directory (absolute
    /// paths must stay inside it).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Gzip level 1–9.
    #[serde(default = "default_compression")]
    pub compression_level: u32,
    #[serde(default = "default_true")]
    pub exclude_sensitive: bool,
    #[serde(default)]
    pub include_discovered: bool,
    #[serde(default)]
    pub include_network_settings: bool,
    #[serde(default)]
    pub include_plugin_configs: bool,
    #[serde(default)]
    pub include_system_settings: bool,
}

fn default_compression() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        serde_json::from_value(Value::Object(Default::default()))
            .expect("all fields have defaults")
    }
}

fn parse_config(config: &Value) -> Result<ArchiveConfig, SyncError> {
    if config.is_null() {
        return Ok(ArchiveConfig::default());
    }
    let cfg: ArchiveConfig = serde_json::from_value(config.clone())
        .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
    if !(1..=9).contains(&cfg.compression_level) {
        return Err(SyncError::InvalidConfig(format!(
            "compression_level {} outside [1, 9]",
            cfg.compression_level
        )));
    }
    Ok(cfg)
}

// ── Archive file format ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaSystemInfo {
    pub version: String,
    pub db_type: String,
    pub hostname: String,
    pub total_size_bytes: u64,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaIntegrity {
    /// `sha256:<hex>` over the marshaled payload with this field blanked.
    pub checksum: String,
    pub record_count: usize,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaMetadata {
    pub export_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
    pub export_type: String,
    pub system_info: SmaSystemInfo,
    pub integrity: SmaIntegrity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaArchive {
    pub sma_version: String,
    pub format_version: String,
    pub metadata: SmaMetadata,
    pub devices: Vec<Device>,
    pub templates: Vec<Template>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub discovered_devices: Option<Vec<DiscoveredDevice>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub plugin_configurations: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub system_settings: Option<Value>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Replace the value of every sensitive-named field with `[REDACTED]`,
/// recursively.
pub fn redact_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *val = Value::String(REDACTED.into());
                } else {
                    redact_sensitive(val);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_sensitive(item);
            }
        }
        _ => {}
    }
}

/// Take incoming `new` settings, restoring any `[REDACTED]` leaves from
/// `existing` so a redacted archive never clobbers real secrets on import.
fn merge_preserving_redacted(new: &Value, existing: &Value) -> Value {
    match (new, existing) {
        (Value::Object(new_map), Value::Object(old_map)) => {
            let mut out = serde_json::Map::new();
            for (key, val) in new_map {
                let merged = match (val, old_map.get(key)) {
                    (Value::String(s), Some(old)) if s == REDACTED => old.clone(),
                    (v, Some(old)) => merge_preserving_redacted(v, old),
                    (v, None) => v.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => new.clone(),
    }
}

/// Resolve `requested` against `base`, rejecting any path that would escape
/// it.
fn resolve_output_dir(base: &Path, requested: Option<&Path>) -> Result<PathBuf, SyncError> {
    let requested = match requested {
        None => return Ok(base.to_path_buf()),
        Some(p) => p,
    };
    if requested
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(SyncError::PathTraversal(requested.display().to_string()));
    }
    let resolved = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        base.join(requested)
    };
    if !resolved.starts_with(base) {
        return Err(SyncError::PathTraversal(requested.display().to_string()));
    }
    Ok(resolved)
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// `shelly-archive-<YYYYMMDD-HHMMSS>-<8-hex>.sma`
fn archive_filename(created_at: chrono::DateTime<chrono::Utc>, export_id: &str) -> String {
    let stamp = sanitize_component(&created_at.format("%Y%m%d-%H%M%S").to_string());
    let short: String = export_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect();
    format!("shelly-archive-{}-{}.sma", stamp, sanitize_component(&short))
}

// ── The plugin ────────────────────────────────────────────────────────────────

/// Canonical backup plugin: gzip-deflated JSON archives with embedded
/// integrity metadata.
pub struct ArchivePlugin {
    base_dir: PathBuf,
}

impl ArchivePlugin {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn compose(&self, data: &ExportData, cfg: &ArchiveConfig) -> SmaArchive {
        let mut devices = data.devices.clone();
        let mut network_settings = if cfg.include_network_settings {
            data.network_settings.clone()
        } else {
            None
        };
        let mut plugin_configurations = if cfg.include_plugin_configs {
            Some(data.plugin_configurations.clone())
        } else {
            None
        };
        let system_settings = if cfg.include_system_settings {
            data.system_settings.clone()
        } else {
            None
        };

        if cfg.exclude_sensitive {
            for device in &mut devices {
                redact_sensitive(&mut device.settings);
            }
            if let Some(ns) = network_settings.as_mut() {
                redact_sensitive(ns);
            }
            if let Some(configs) = plugin_configurations.as_mut() {
                for c in configs.iter_mut() {
                    redact_sensitive(c);
                }
            }
        }

        let discovered = if cfg.include_discovered {
            Some(data.discovered_devices.clone())
        } else {
            None
        };
        let record_count = devices.len()
            + data.templates.len()
            + discovered.as_ref().map_or(0, |d| d.len());

        SmaArchive {
            sma_version: SMA_VERSION.into(),
            format_version: SMA_FORMAT_VERSION.into(),
            metadata: SmaMetadata {
                export_id: data.metadata.export_id.clone(),
                created_at: data.metadata.created_at,
                created_by: data.metadata.requested_by.clone(),
                export_type: data.metadata.export_type.clone(),
                system_info: SmaSystemInfo {
                    version: data.metadata.system_version.clone(),
                    db_type: data.metadata.database_type.clone(),
                    hostname: hostname(),
                    total_size_bytes: 0,
                    compression_ratio: 0.0,
                },
                integrity: SmaIntegrity {
                    checksum: String::new(),
                    record_count,
                    file_count: 1,
                },
            },
            devices,
            templates: data.templates.clone(),
            discovered_devices: discovered,
            network_settings,
            plugin_configurations,
            system_settings,
        }
    }

    fn read_source(source: &ImportSource) -> Result<Vec<u8>, SyncError> {
        match source {
            ImportSource::File { path } => {
                std::fs::read(path).map_err(|e| SyncError::io(path.display(), e))
            }
            ImportSource::Data { bytes } => Ok(bytes.clone()),
            ImportSource::Url { .. } => Err(SyncError::UnsupportedOperation(
                "url import source is not implemented".into(),
            )),
        }
    }

    fn decode(bytes: &[u8]) -> Result<SmaArchive, SyncError> {
        let mut decoder = GzDecoder::new(bytes);
        let mut payload = Vec::new();
        decoder
            .read_to_end(&mut payload)
            .map_err(|e| SyncError::InvalidArchive(format!("gzip: {e}")))?;
        serde_json::from_slice(&payload)
            .map_err(|e| SyncError::InvalidArchive(format!("json: {e}")))
    }

    fn validate_archive(archive: &SmaArchive) -> Result<(), SyncError> {
        if archive.sma_version != SMA_VERSION {
            return Err(SyncError::InvalidArchive(format!(
                "unsupported sma_version '{}'",
                archive.sma_version
            )));
        }
        if archive.format_version.is_empty() {
            return Err(SyncError::InvalidArchive("missing format_version".into()));
        }
        if archive.metadata.export_id.is_empty() {
            return Err(SyncError::InvalidArchive("missing metadata.export_id".into()));
        }
        if archive.devices.is_empty() && archive.templates.is_empty() {
            return Err(SyncError::InvalidArchive(
                "archive contains neither devices nor templates".into(),
            ));
        }
        if !archive.metadata.integrity.checksum.is_empty() {
            let mut blank = archive.clone();
            blank.metadata.integrity.checksum = String::new();
            let payload = serde_json::to_string_pretty(&blank)?;
            let expected = format!("sha256:{}", sha256_hex(payload.as_bytes()));
            if expected != archive.metadata.integrity.checksum {
                return Err(SyncError::InvalidArchive("integrity checksum mismatch".into()));
            }
        }
        Ok(())
    }

    async fn compute_changes(
        archive: &SmaArchive,
        ctx: &ImportContext,
    ) -> Result<Vec<SyncChange>, SyncError> {
        let mut changes = Vec::new();
        for device in &archive.devices {
            let existing = ctx.store.get_device_by_mac(&device.mac).await?;
            let action = match &existing {
                None => ChangeAction::Create,
                Some(current) => {
                    let merged = merge_preserving_redacted(&device.settings, &current.settings);
                    if merged == current.settings
                        && device.name == current.name
                        && device.device_type == current.device_type
                    {
                        ChangeAction::Skip
                    } else {
                        ChangeAction::Update
                    }
                }
            };
            changes.push(SyncChange {
                action,
                resource_type: "device".into(),
                resource_id: device.mac.as_str().to_string(),
                details: None,
            });
        }
        for template in &archive.templates {
            let existing = ctx.store.get_template(&template.name).await?;
            let action = match &existing {
                None => ChangeAction::Create,
                Some(current) if current == template => ChangeAction::Skip,
                Some(_) => ChangeAction::Update,
            };
            changes.push(SyncChange {
                action,
                resource_type: "template".into(),
                resource_id: template.name.clone(),
                details: None,
            });
        }
        Ok(changes)
    }

    async fn apply(archive: &SmaArchive, ctx: &ImportContext) -> Result<(), SyncError> {
        for device in &archive.devices {
            let mut incoming = device.clone();
            if let Some(current) = ctx.store.get_device_by_mac(&device.mac).await? {
                incoming.settings =
                    merge_preserving_redacted(&device.settings, &current.settings);
            }
            ctx.store.upsert_device_by_mac(&incoming).await?;
        }
        for template in &archive.templates {
            ctx.store.upsert_template(template).await?;
        }
        Ok(())
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
}

#[async_trait]
impl SyncPlugin for ArchivePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "archive".into(),
            version: "1.0.0".into(),
            description: "Compressed SMA archive backup".into(),
            author: "shellymgr".into(),
            license: "MIT".into(),
            supported_formats: vec!["sma".into()],
            category: PluginCategory::Backup,
        }
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "output_dir": {"type": "string"},
                "compression_level": {"type": "integer", "minimum": 1, "maximum": 9},
                "exclude_sensitive": {"type": "boolean"},
                "include_discovered": {"type": "boolean"},
                "include_network_settings": {"type": "boolean"},
                "include_plugin_configs": {"type": "boolean"},
                "include_system_settings": {"type": "boolean"},
            },
        })
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_incremental: false,
            supports_scheduling: true,
            requires_authentication: false,
            supported_outputs: vec!["file".into()],
            max_data_size: Some(5 * 1024 * 1024 * 1024),
            concurrency_level: 2,
        }
    }

    fn validate_config(&self, config: &Value) -> Result<(), SyncError> {
        parse_config(config).map(|_| ())
    }

    async fn export(&self, data: &ExportData, config: &Value) -> Result<ExportResult, SyncError> {
        let cfg = parse_config(config)?;
        let out_dir = resolve_output_dir(&self.base_dir, cfg.output_dir.as_deref())?;
        std::fs::create_dir_all(&out_dir).map_err(|e| SyncError::io(out_dir.display(), e))?;

        let mut archive = self.compose(data, &cfg);

        // First marshal fixes the payload; the digest of those bytes is then
        // embedded and the payload marshaled once more for writing.
        let unsigned = serde_json::to_string_pretty(&archive)?;
        archive.metadata.system_info.total_size_bytes = unsigned.len() as u64;
        archive.metadata.integrity.checksum = String::new();
        let payload = serde_json::to_string_pretty(&archive)?;
        let checksum = format!("sha256:{}", sha256_hex(payload.as_bytes()));
        archive.metadata.integrity.checksum = checksum.clone();
        let signed = serde_json::to_string_pretty(&archive)?;

        let filename = archive_filename(data.metadata.created_at, &data.metadata.export_id);
        let path = out_dir.join(&filename);
        let file = std::fs::File::create(&path).map_err(|e| SyncError::io(path.display(), e))?;
        let mut encoder = GzEncoder::new(file, Compression::new(cfg.compression_level));
        encoder
            .write_all(signed.as_bytes())
            .map_err(|e| SyncError::io(path.display(), e))?;
        let file = encoder
            .finish()
            .map_err(|e| SyncError::io(path.display(), e))?;
        file.sync_all().map_err(|e| SyncError::io(path.display(), e))?;

        let file_size = std::fs::metadata(&path)
            .map_err(|e| SyncError::io(path.display(), e))?
            .len();

        info!(
            path = %path.display(),
            records = archive.metadata.integrity.record_count,
            size = file_size,
            "archive written"
        );
        Ok(ExportResult {
            record_count: archive.metadata.integrity.record_count,
            file_size,
            checksum: Some(checksum),
            output_path: Some(path),
        })
    }

    async fn preview(
        &self,
        data: &ExportData,
        config: &Value,
    ) -> Result<PreviewResult, SyncError> {
        let cfg = parse_config(config)?;
        let archive = self.compose(data, &cfg);
        let payload = serde_json::to_string_pretty(&archive)?;
        Ok(PreviewResult {
            record_count: archive.metadata.integrity.record_count,
            estimated_size: payload.len() as u64,
            changes: vec![],
            sample: Some(serde_json::to_value(&archive.metadata)?),
        })
    }

    async fn import(
        &self,
        source: &ImportSource,
        _config: &Value,
        ctx: &ImportContext,
    ) -> Result<ImportResult, SyncError> {
        let bytes = Self::read_source(source)?;
        let archive = Self::decode(&bytes)?;
        Self::validate_archive(&archive)?;

        let changes = Self::compute_changes(&archive, ctx).await?;
        let records_imported = changes.len();
        if !ctx.dry_run {
            Self::apply(&archive, ctx).await?;
        } else {
            debug!(records = records_imported, "dry-run import, nothing persisted");
        }
        Ok(ImportResult { records_imported, changes, dry_run: ctx.dry_run })
    }
}
