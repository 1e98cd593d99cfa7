use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::plugin::{PluginInfo, SyncPlugin};

/// Name-keyed registry of sync plugins.
///
/// Registration is exclusive: a second plugin with the same name is rejected.
/// `initialize` runs before the plugin becomes visible; a failing initialize
/// leaves the registry untouched. Unregistration runs `cleanup`.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn SyncPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, plugin: Arc<dyn SyncPlugin>) -> Result<(), SyncError> {
        let name = plugin.info().name;
        let mut guard = self.plugins.write().await;
        if guard.contains_key(&name) {
            return Err(SyncError::DuplicatePlugin(name));
        }
        plugin.initialize().await?;
        debug!(plugin = %name, "plugin registered");
        guard.insert(name, plugin);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Result<(), SyncError> {
        let removed = {
            let mut guard = self.plugins.write().await;
            guard.remove(name)
        };
        match removed {
            Some(plugin) => {
                if let Err(e) = plugin.cleanup().await {
                    warn!(plugin = %name, error = %e, "plugin cleanup failed");
                }
                Ok(())
            }
            None => Err(SyncError::PluginNotFound(name.to_string())),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn SyncPlugin>, SyncError> {
        let guard = self.plugins.read().await;
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::PluginNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Vec<PluginInfo> {
        let guard = self.plugins.read().await;
        let mut infos: Vec<PluginInfo> = guard.values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Info, capabilities, and current health of every registered plugin.
    /// Health checks run outside the registry lock.
    pub async fn health_report(&self) -> Vec<PluginStatus> {
        let plugins: Vec<Arc<dyn SyncPlugin>> = {
            let guard = self.plugins.read().await;
            guard.values().cloned().collect()
        };
        let mut report = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            report.push(PluginStatus {
                info: plugin.info(),
                capabilities: plugin.capabilities(),
                health: plugin.health().await,
            });
        }
        report.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        report
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PluginStatus {
    pub info: PluginInfo,
    pub capabilities: crate::plugin::PluginCapabilities,
    pub health: crate::plugin::PluginHealth,
}
