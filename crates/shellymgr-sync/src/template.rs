use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use shellymgr_domain::{ExportData, ImportSource};
use tracing::debug;

use crate::error::SyncError;
use crate::plugin::{
    ExportResult, ImportContext, ImportResult, PluginCapabilities, PluginCategory, PluginInfo,
    PreviewResult, SyncPlugin,
};

// ── Manifest ──────────────────────────────────────────────────────────────────

/// Declarative description of an export plugin: metadata, a config schema,
/// and one template string per supported format. Parsed once and bound into
/// an in-memory plugin handle indistinguishable from code-implemented
/// plugins.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default = "default_license")]
    pub license: String,
    /// format → template string.
    pub formats: HashMap<String, String>,
    /// Static variables available to every render.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub config_schema: Value,
}

fn default_license() -> String {
    "MIT".into()
}

impl TemplateManifest {
    pub fn from_yaml(content: &str) -> Result<Self, SyncError> {
        let manifest: TemplateManifest =
            serde_yaml::from_str(content).map_err(|e| SyncError::Yaml {
                path: "<manifest>".into(),
                message: e.to_string(),
            })?;
        if manifest.name.is_empty() {
            return Err(SyncError::InvalidConfig("manifest name is empty".into()));
        }
        if manifest.formats.is_empty() {
            return Err(SyncError::InvalidConfig(format!(
                "manifest '{}' declares no formats",
                manifest.name
            )));
        }
        Ok(manifest)
    }
}

/// Load every `*.yaml` manifest in a directory into plugin handles.
pub fn load_manifest_dir(dir: &Path) -> Result<Vec<TemplatePlugin>, SyncError> {
    let mut plugins = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| SyncError::io(dir.display(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::io(dir.display(), e))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }
        let content =
            std::fs::read_to_string(&path).map_err(|e| SyncError::io(path.display(), e))?;
        let manifest = TemplateManifest::from_yaml(&content)?;
        debug!(plugin = %manifest.name, path = %path.display(), "loaded template manifest");
        plugins.push(TemplatePlugin::new(manifest, dir.join("out")));
    }
    Ok(plugins)
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Substitute `{{ token }}` occurrences from the variable map, scanning left
/// to right. Unknown tokens are left in place.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    let mut search_start = 0;
    loop {
        let Some(start) = result[search_start..].find("{{") else { break };
        let abs_start = search_start + start;
        let Some(end) = result[abs_start..].find("}}") else { break };
        let abs_end = abs_start + end + 2;

        let token = result[abs_start + 2..abs_end - 2].trim();
        if let Some(val) = vars.get(token) {
            let val = val.clone();
            result = format!("{}{}{}", &result[..abs_start], val, &result[abs_end..]);
            search_start = abs_start + val.len();
            continue;
        }
        search_start = abs_end;
    }
    result
}

fn render_vars(data: &ExportData, manifest: &TemplateManifest, config: &Value) -> HashMap<String, String> {
    let mut vars = manifest.variables.clone();
    vars.insert("export_id".into(), data.metadata.export_id.clone());
    vars.insert("created_at".into(), data.metadata.created_at.to_rfc3339());
    vars.insert("created_by".into(), data.metadata.requested_by.clone());
    vars.insert("device_count".into(), data.devices.len().to_string());
    vars.insert("template_count".into(), data.templates.len().to_string());
    vars.insert(
        "devices_json".into(),
        serde_json::to_string(&data.devices).unwrap_or_else(|_| "[]".into()),
    );
    vars.insert(
        "templates_json".into(),
        serde_json::to_string(&data.templates).unwrap_or_else(|_| "[]".into()),
    );
    // Scalar config keys override manifest variables.
    if let Value::Object(map) = config {
        for (k, v) in map {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(k.clone(), rendered);
        }
    }
    vars
}

// ── The plugin handle ─────────────────────────────────────────────────────────

pub struct TemplatePlugin {
    manifest: TemplateManifest,
    output_dir: PathBuf,
}

impl TemplatePlugin {
    pub fn new(manifest: TemplateManifest, output_dir: impl Into<PathBuf>) -> Self {
        Self { manifest, output_dir: output_dir.into() }
    }

    fn template_for(&self, config: &Value) -> Result<(String, String), SyncError> {
        let format = config
            .get("format")
            .and_then(|v| v.as_str())
            .or_else(|| self.manifest.formats.keys().next().map(|s| s.as_str()))
            .unwrap_or_default()
            .to_string();
        let template = self.manifest.formats.get(&format).cloned().ok_or_else(|| {
            SyncError::UnsupportedFormat {
                plugin: self.manifest.name.clone(),
                format: format.clone(),
            }
        })?;
        Ok((format, template))
    }
}

#[async_trait]
impl SyncPlugin for TemplatePlugin {
    fn info(&self) -> PluginInfo {
        let mut formats: Vec<String> = self.manifest.formats.keys().cloned().collect();
        formats.sort();
        PluginInfo {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            description: self.manifest.description.clone(),
            author: self.manifest.author.clone(),
            license: self.manifest.license.clone(),
            supported_formats: formats,
            category: PluginCategory::Template,
        }
    }

    fn config_schema(&self) -> Value {
        self.manifest.config_schema.clone()
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_incremental: false,
            supports_scheduling: true,
            requires_authentication: false,
            supported_outputs: vec!["file".into()],
            max_data_size: None,
            concurrency_level: 4,
        }
    }

    fn validate_config(&self, config: &Value) -> Result<(), SyncError> {
        if !(config.is_null() || config.is_object()) {
            return Err(SyncError::InvalidConfig("expected an object".into()));
        }
        if let Some(format) = config.get("format").and_then(|v| v.as_str()) {
            if !self.manifest.formats.contains_key(format) {
                return Err(SyncError::UnsupportedFormat {
                    plugin: self.manifest.name.clone(),
                    format: format.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn export(&self, data: &ExportData, config: &Value) -> Result<ExportResult, SyncError> {
        let (format, template) = self.template_for(config)?;
        let vars = render_vars(data, &self.manifest, config);
        let rendered = render(&template, &vars);

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SyncError::io(self.output_dir.display(), e))?;
        let short: String = data
            .metadata
            .export_id
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(8)
            .collect();
        let path = self
            .output_dir
            .join(format!("{}-{}.{}", self.manifest.name, short, format));
        std::fs::write(&path, &rendered).map_err(|e| SyncError::io(path.display(), e))?;

        Ok(ExportResult {
            record_count: data.devices.len() + data.templates.len(),
            file_size: rendered.len() as u64,
            checksum: None,
            output_path: Some(path),
        })
    }

    async fn preview(
        &self,
        data: &ExportData,
        config: &Value,
    ) -> Result<PreviewResult, SyncError> {
        let (_, template) = self.template_for(config)?;
        let vars = render_vars(data, &self.manifest, config);
        let rendered = render(&template, &vars);
        Ok(PreviewResult {
            record_count: data.devices.len() + data.templates.len(),
            estimated_size: rendered.len() as u64,
            changes: vec![],
            sample: Some(json!({"rendered": rendered})),
        })
    }

    async fn import(
        &self,
        _source: &ImportSource,
        _config: &Value,
        _ctx: &ImportContext,
    ) -> Result<ImportResult, SyncError> {
        Err(SyncError::UnsupportedOperation(format!(
            "template plugin '{}' is export-only",
            self.manifest.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shellymgr_domain::ExportMetadata;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
name: device-inventory
version: 0.1.0
description: Render the fleet as a flat inventory
formats:
  json: '{"count": {{ device_count }}, "env": "{{ env }}", "devices": {{ devices_json }}}'
  txt: "fleet of {{ device_count }} devices"
variables:
  env: staging
"#;

    fn data() -> ExportData {
        ExportData {
            devices: vec![],
            configurations: vec![],
            templates: vec![],
            discovered_devices: vec![],
            network_settings: None,
            plugin_configurations: vec![],
            system_settings: None,
            metadata: ExportMetadata {
                export_id: "deadbeef01".into(),
                requested_by: "t".into(),
                export_type: "export".into(),
                total_devices: 0,
                total_templates: 0,
                system_version: "0".into(),
                database_type: "memory".into(),
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn manifest_parses_and_reports_formats() {
        let manifest = TemplateManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.name, "device-inventory");
        assert_eq!(manifest.formats.len(), 2);
        assert_eq!(manifest.variables["env"], "staging");
    }

    #[test]
    fn manifest_without_formats_is_rejected() {
        let err = TemplateManifest::from_yaml("name: x\nversion: '1'\nformats: {}\n").unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn render_substitutes_known_tokens_and_keeps_unknown() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "1".to_string());
        assert_eq!(render("{{ a }}/{{ b }}", &vars), "1/{{ b }}");
    }

    #[tokio::test]
    async fn export_renders_with_builtin_and_manifest_vars() {
        let dir = tempdir().unwrap();
        let manifest = TemplateManifest::from_yaml(MANIFEST).unwrap();
        let plugin = TemplatePlugin::new(manifest, dir.path());

        let result = plugin
            .export(&data(), &json!({"format": "txt"}))
            .await
            .unwrap();
        let content = std::fs::read_to_string(result.output_path.unwrap()).unwrap();
        assert_eq!(content, "fleet of 0 devices");
    }

    #[tokio::test]
    async fn config_overrides_manifest_variables() {
        let dir = tempdir().unwrap();
        let manifest = TemplateManifest::from_yaml(MANIFEST).unwrap();
        let plugin = TemplatePlugin::new(manifest, dir.path());

        let result = plugin
            .export(&data(), &json!({"format": "json", "env": "prod"}))
            .await
            .unwrap();
        let content = std::fs::read_to_string(result.output_path.unwrap()).unwrap();
        assert!(content.contains("\"env\": \"prod\""));
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let manifest = TemplateManifest::from_yaml(MANIFEST).unwrap();
        let plugin = TemplatePlugin::new(manifest, "/tmp");
        let err = plugin
            .validate_config(&json!({"format": "xml"}))
            .unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedFormat { .. }));
    }
}
