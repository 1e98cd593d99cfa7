use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use shellymgr_domain::{Device, ExportData, ImportSource, Mac};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::plugin::{
    ChangeAction, ExportResult, ImportContext, ImportResult, PluginCapabilities, PluginCategory,
    PluginInfo, PreviewResult, SyncChange, SyncPlugin,
};

// ── Tree model ────────────────────────────────────────────────────────────────

/// One device file after layer merging.
#[derive(Debug, Clone)]
pub struct GitOpsDevice {
    pub file: PathBuf,
    pub mac: Option<Mac>,
    pub name: String,
    pub device_type: String,
    pub group: String,
    pub merged_config: Value,
    /// Leaf config path (dotted) → layer that last wrote it.
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitOpsData {
    pub common: Value,
    pub groups: Vec<String>,
    pub devices: Vec<GitOpsDevice>,
}

// ── Layer merging ─────────────────────────────────────────────────────────────

fn record_leaves(value: &Value, prefix: &str, source: &str, sources: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let child = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                record_leaves(v, &child, source, sources);
            }
        }
        _ => {
            sources.insert(prefix.to_string(), source.to_string());
        }
    }
}

/// Deep per-key merge of `overlay` into `base`; last writer wins, and each
/// written leaf records `source` as its provenance.
fn merge_layer(base: &mut Value, overlay: &Value, source: &str, prefix: &str, sources: &mut BTreeMap<String, String>) {
    match (&mut *base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, val) in overlay_map {
                let child = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                let merged_nested = match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && val.is_object() => {
                        merge_layer(existing, val, source, &child, sources);
                        true
                    }
                    _ => false,
                };
                if !merged_nested {
                    base_map.insert(key.clone(), val.clone());
                    record_leaves(val, &child, source, sources);
                }
            }
        }
        (slot, val) => {
            *slot = val.clone();
            record_leaves(val, prefix, source, sources);
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn read_yaml(path: &Path) -> Result<Value, SyncError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| SyncError::io(path.display(), e))?;
    serde_yaml::from_str(&content).map_err(|e| SyncError::Yaml {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn read_yaml_if_exists(path: &Path) -> Result<Value, SyncError> {
    if path.exists() {
        read_yaml(path)
    } else {
        Ok(Value::Object(Default::default()))
    }
}

/// Walk a GitOps tree and produce the flattened, merged device list.
///
/// Layout:
/// ```text
/// <root>/common.yaml
/// <root>/groups/<group>/group.yaml
/// <root>/groups/<group>/<type>/common.yaml
/// <root>/groups/<group>/<type>/<device>.yaml
/// ```
pub fn load_tree(root: &Path) -> Result<GitOpsData, SyncError> {
    let common = read_yaml_if_exists(&root.join("common.yaml"))?;
    let mut data = GitOpsData { common: common.clone(), ..Default::default() };

    let groups_dir = root.join("groups");
    if !groups_dir.is_dir() {
        return Ok(data);
    }

    for group_entry in WalkDir::new(&groups_dir).min_depth(1).max_depth(1) {
        let group_entry = group_entry.map_err(|e| SyncError::Yaml {
            path: groups_dir.display().to_string(),
            message: e.to_string(),
        })?;
        if !group_entry.file_type().is_dir() {
            continue;
        }
        let group = group_entry.file_name().to_string_lossy().to_string();
        let group_config = read_yaml_if_exists(&group_entry.path().join("group.yaml"))?;
        data.groups.push(group.clone());

        for type_entry in WalkDir::new(group_entry.path()).min_depth(1).max_depth(1) {
            let type_entry = type_entry.map_err(|e| SyncError::Yaml {
                path: group_entry.path().display().to_string(),
                message: e.to_string(),
            })?;
            if !type_entry.file_type().is_dir() {
                continue;
            }
            let device_type = type_entry.file_name().to_string_lossy().to_string();
            let type_common = read_yaml_if_exists(&type_entry.path().join("common.yaml"))?;

            for file_entry in WalkDir::new(type_entry.path()).min_depth(1).max_depth(1) {
                let file_entry = file_entry.map_err(|e| SyncError::Yaml {
                    path: type_entry.path().display().to_string(),
                    message: e.to_string(),
                })?;
                let path = file_entry.path();
                if !file_entry.file_type().is_file() {
                    continue;
                }
                let is_yaml = path
                    .extension()
                    .map_or(false, |ext| ext == "yaml" || ext == "yml");
                if !is_yaml || path.file_stem().map_or(true, |s| s == "common") {
                    continue;
                }

                let device_yaml = read_yaml(path)?;
                data.devices.push(merge_device(
                    path,
                    &group,
                    &device_type,
                    &common,
                    &group_config,
                    &type_common,
                    device_yaml,
                ));
            }
        }
    }

    Ok(data)
}

fn merge_device(
    file: &Path,
    group: &str,
    device_type: &str,
    common: &Value,
    group_config: &Value,
    type_common: &Value,
    device_yaml: Value,
) -> GitOpsDevice {
    let mac = device_yaml
        .get("mac")
        .and_then(|v| v.as_str())
        .and_then(|s| match Mac::parse(s) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "ignoring unparseable mac");
                None
            }
        });
    let name = device_yaml
        .get("name")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| {
            file.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });

    // Device-level config is the file minus its identity keys.
    let mut device_config = device_yaml;
    if let Value::Object(map) = &mut device_config {
        map.remove("mac");
        map.remove("name");
    }

    let mut merged = Value::Object(Default::default());
    let mut sources = BTreeMap::new();
    merge_layer(&mut merged, common, "common", "", &mut sources);
    merge_layer(&mut merged, group_config, &format!("groups/{group}"), "", &mut sources);
    merge_layer(&mut merged, type_common, &format!("groups/{group}/{device_type}"), "", &mut sources);
    merge_layer(&mut merged, &device_config, &file.display().to_string(), "", &mut sources);

    GitOpsDevice {
        file: file.to_path_buf(),
        mac,
        name,
        device_type: device_type.to_string(),
        group: group.to_string(),
        merged_config: merged,
        sources,
    }
}

// ── The plugin ────────────────────────────────────────────────────────────────

/// Imports and exports layered YAML device trees.
pub struct GitOpsPlugin {
    base_dir: PathBuf,
}

impl GitOpsPlugin {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn root_from_source(source: &ImportSource) -> Result<PathBuf, SyncError> {
        match source {
            ImportSource::File { path } => Ok(path.clone()),
            ImportSource::Data { .. } => Err(SyncError::UnsupportedOperation(
                "gitops import requires a directory path source".into(),
            )),
            ImportSource::Url { .. } => Err(SyncError::UnsupportedOperation(
                "url import source is not implemented".into(),
            )),
        }
    }

    async fn compute_changes(
        tree: &GitOpsData,
        ctx: &ImportContext,
    ) -> Result<Vec<SyncChange>, SyncError> {
        let mut changes = Vec::new();
        for device in &tree.devices {
            let Some(mac) = &device.mac else {
                changes.push(SyncChange {
                    action: ChangeAction::Skip,
                    resource_type: "device".into(),
                    resource_id: device.file.display().to_string(),
                    details: Some(json!({"reason": "missing mac"})),
                });
                continue;
            };
            let existing = ctx.store.get_device_by_mac(mac).await?;
            let action = match &existing {
                None => ChangeAction::Create,
                Some(current) if current.settings == device.merged_config => ChangeAction::Skip,
                Some(_) => ChangeAction::Update,
            };
            changes.push(SyncChange {
                action,
                resource_type: "device".into(),
                resource_id: mac.as_str().to_string(),
                details: Some(json!({"group": device.group, "sources": device.sources})),
            });
        }
        Ok(changes)
    }

    async fn apply(tree: &GitOpsData, ctx: &ImportContext) -> Result<usize, SyncError> {
        let mut applied = 0;
        for device in &tree.devices {
            let Some(mac) = &device.mac else { continue };
            let mut incoming = match ctx.store.get_device_by_mac(mac).await? {
                Some(existing) => existing,
                None => Device::new(mac.clone(), &device.name),
            };
            incoming.name = device.name.clone();
            incoming.device_type = device.device_type.clone();
            incoming.settings = device.merged_config.clone();
            ctx.store.upsert_device_by_mac(&incoming).await?;
            applied += 1;
        }
        Ok(applied)
    }
}

#[async_trait]
impl SyncPlugin for GitOpsPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "gitops".into(),
            version: "1.0.0".into(),
            description: "Layered YAML device tree import/export".into(),
            author: "shellymgr".into(),
            license: "MIT".into(),
            supported_formats: vec!["yaml".into()],
            category: PluginCategory::Gitops,
        }
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "output_dir": {"type": "string"},
            },
        })
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_incremental: true,
            supports_scheduling: true,
            requires_authentication: false,
            supported_outputs: vec!["directory".into()],
            max_data_size: None,
            concurrency_level: 1,
        }
    }

    fn validate_config(&self, config: &Value) -> Result<(), SyncError> {
        if config.is_null() || config.is_object() {
            Ok(())
        } else {
            Err(SyncError::InvalidConfig("expected an object".into()))
        }
    }

    async fn export(&self, data: &ExportData, config: &Value) -> Result<ExportResult, SyncError> {
        let out_rel = config
            .get("output_dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        let root = match &out_rel {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.base_dir.join(p),
            None => self.base_dir.clone(),
        };

        let mut total_bytes = 0u64;
        let common_path = root.join("common.yaml");
        std::fs::create_dir_all(&root).map_err(|e| SyncError::io(root.display(), e))?;
        let common_yaml = serde_yaml::to_string(&json!({}))
            .map_err(|e| SyncError::Yaml { path: common_path.display().to_string(), message: e.to_string() })?;
        std::fs::write(&common_path, &common_yaml)
            .map_err(|e| SyncError::io(common_path.display(), e))?;
        total_bytes += common_yaml.len() as u64;

        for device in &data.devices {
            let group = device
                .settings
                .get("group")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string();
            let device_type = if device.device_type.is_empty() {
                "unknown".to_string()
            } else {
                device.device_type.to_lowercase()
            };
            let dir = root.join("groups").join(&group).join(&device_type);
            std::fs::create_dir_all(&dir).map_err(|e| SyncError::io(dir.display(), e))?;

            let mut doc = json!({
                "mac": device.mac.as_str(),
                "name": device.name,
            });
            if let (Value::Object(doc_map), Value::Object(settings)) =
                (&mut doc, &device.settings)
            {
                for (k, v) in settings {
                    doc_map.insert(k.clone(), v.clone());
                }
            }
            let file = dir.join(format!("{}.yaml", device.mac.tail()));
            let yaml = serde_yaml::to_string(&doc).map_err(|e| SyncError::Yaml {
                path: file.display().to_string(),
                message: e.to_string(),
            })?;
            std::fs::write(&file, &yaml).map_err(|e| SyncError::io(file.display(), e))?;
            total_bytes += yaml.len() as u64;
        }

        debug!(root = %root.display(), devices = data.devices.len(), "gitops tree written");
        Ok(ExportResult {
            record_count: data.devices.len(),
            file_size: total_bytes,
            checksum: None,
            output_path: Some(root),
        })
    }

    async fn preview(
        &self,
        data: &ExportData,
        _config: &Value,
    ) -> Result<PreviewResult, SyncError> {
        Ok(PreviewResult {
            record_count: data.devices.len(),
            estimated_size: 0,
            changes: vec![],
            sample: None,
        })
    }

    async fn import(
        &self,
        source: &ImportSource,
        _config: &Value,
        ctx: &ImportContext,
    ) -> Result<ImportResult, SyncError> {
        let root = Self::root_from_source(source)?;
        let tree = load_tree(&root)?;
        let changes = Self::compute_changes(&tree, ctx).await?;
        if !ctx.dry_run {
            Self::apply(&tree, ctx).await?;
        }
        Ok(ImportResult {
            records_imported: changes.len(),
            changes,
            dry_run: ctx.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellymgr_store::{InMemoryStore, Store};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn sample_tree(root: &Path) {
        write(&root.join("common.yaml"), "mqtt:\n  server: mqtt.local\n  port: 1883\n");
        write(
            &root.join("groups/living/group.yaml"),
            "location: living-room\nmqtt:\n  port: 8883\n",
        );
        write(
            &root.join("groups/living/shsw-1/common.yaml"),
            "relay:\n  default_state: \"off\"\n",
        );
        write(
            &root.join("groups/living/shsw-1/kitchen.yaml"),
            "mac: \"AA:BB:CC:DD:EE:FF\"\nname: kitchen\nrelay:\n  default_state: \"on\"\n",
        );
    }

    #[test]
    fn layers_merge_last_writer_wins() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());

        let tree = load_tree(dir.path()).unwrap();
        assert_eq!(tree.groups, vec!["living".to_string()]);
        assert_eq!(tree.devices.len(), 1);

        let device = &tree.devices[0];
        assert_eq!(device.mac.as_ref().unwrap().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.name, "kitchen");
        assert_eq!(device.device_type, "shsw-1");
        // common provides the server, the group overrides the port, and the
        // device file overrides the relay default set by the type layer.
        assert_eq!(device.merged_config["mqtt"]["server"], "mqtt.local");
        assert_eq!(device.merged_config["mqtt"]["port"], 8883);
        assert_eq!(device.merged_config["relay"]["default_state"], "on");
        assert_eq!(device.merged_config["location"], "living-room");
    }

    #[test]
    fn provenance_records_the_winning_layer() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());

        let tree = load_tree(dir.path()).unwrap();
        let device = &tree.devices[0];
        assert_eq!(device.sources["mqtt.server"], "common");
        assert_eq!(device.sources["mqtt.port"], "groups/living");
        assert!(device.sources["relay.default_state"].ends_with("kitchen.yaml"));
    }

    #[tokio::test]
    async fn device_without_mac_is_skipped_in_preview() {
        let dir = tempdir().unwrap();
        write(
            &dir.path().join("groups/attic/shsw-1/mystery.yaml"),
            "name: mystery\nrelay:\n  default_state: \"off\"\n",
        );

        let store = Arc::new(InMemoryStore::new());
        let plugin = GitOpsPlugin::new(dir.path());
        let ctx = ImportContext { store, dry_run: true };
        let result = plugin
            .import(
                &ImportSource::File { path: dir.path().to_path_buf() },
                &Value::Null,
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].action, ChangeAction::Skip);
    }

    #[tokio::test]
    async fn dry_run_classifies_create_update_skip() {
        let dir = tempdir().unwrap();
        sample_tree(dir.path());

        let store = Arc::new(InMemoryStore::new());
        let plugin = GitOpsPlugin::new(dir.path());

        // Empty store → create.
        let ctx = ImportContext { store: store.clone(), dry_run: true };
        let source = ImportSource::File { path: dir.path().to_path_buf() };
        let result = plugin.import(&source, &Value::Null, &ctx).await.unwrap();
        assert_eq!(result.changes[0].action, ChangeAction::Create);
        assert!(store.list_devices().await.unwrap().is_empty(), "dry run must not persist");

        // Apply, then re-import → skip.
        let apply_ctx = ImportContext { store: store.clone(), dry_run: false };
        plugin.import(&source, &Value::Null, &apply_ctx).await.unwrap();
        let result = plugin.import(&source, &Value::Null, &ctx).await.unwrap();
        assert_eq!(result.changes[0].action, ChangeAction::Skip);

        // Drift the stored settings → update.
        let mut device = store.list_devices().await.unwrap().remove(0);
        device.settings["mqtt"]["port"] = json!(9999);
        store.update_device(&device).await.unwrap();
        let result = plugin.import(&source, &Value::Null, &ctx).await.unwrap();
        assert_eq!(result.changes[0].action, ChangeAction::Update);
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let out = tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());

        let mut device = Device::new(Mac::parse("AA:BB:CC:DD:EE:01").unwrap(), "hallway");
        device.device_type = "SHSW-1".into();
        device.settings = json!({"group": "hall", "relay": {"default_state": "off"}});
        let device = store.upsert_device_by_mac(&device).await.unwrap();

        let plugin = GitOpsPlugin::new(out.path());
        let data = ExportData {
            devices: vec![device.clone()],
            configurations: vec![],
            templates: vec![],
            discovered_devices: vec![],
            network_settings: None,
            plugin_configurations: vec![],
            system_settings: None,
            metadata: shellymgr_domain::ExportMetadata {
                export_id: "x".into(),
                requested_by: "t".into(),
                export_type: "gitops".into(),
                total_devices: 1,
                total_templates: 0,
                system_version: "0".into(),
                database_type: "memory".into(),
                created_at: chrono::Utc::now(),
            },
        };
        let result = plugin.export(&data, &Value::Null).await.unwrap();
        let root = result.output_path.unwrap();
        assert!(root.join("groups/hall/shsw-1").is_dir());

        let tree = load_tree(&root).unwrap();
        assert_eq!(tree.devices.len(), 1);
        assert_eq!(
            tree.devices[0].mac.as_ref().unwrap().as_str(),
            "AA:BB:CC:DD:EE:01"
        );
    }
}
