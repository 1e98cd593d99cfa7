use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shellymgr_notify::NotificationDispatcher;
use shellymgr_provision::{Orchestrator, OrchestratorConfig};
use shellymgr_store::Store;
use shellymgr_sync::{
    ArchivePlugin, BackupManager, GitOpsPlugin, PluginRegistry, ScheduleTicker, SyncEngine,
    SyncError,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub engine: Arc<SyncEngine>,
    pub ticker: Arc<ScheduleTicker>,
    pub backups: Arc<BackupManager>,
    pub orchestrator: Arc<Orchestrator>,
    /// Admin key; `None` disables the auth gate (tests, local dev).
    pub auth_token: Option<Arc<String>>,
}

/// Wire the full subsystem stack over one store. `data_dir` is the base for
/// archive and GitOps output.
pub async fn build_state(
    store: Arc<dyn Store>,
    data_dir: &Path,
    auth_token: Option<String>,
) -> Result<AppState, SyncError> {
    let registry = Arc::new(PluginRegistry::new());
    registry
        .register(Arc::new(ArchivePlugin::new(data_dir)))
        .await?;
    registry
        .register(Arc::new(GitOpsPlugin::new(data_dir.join("gitops"))))
        .await?;

    let engine = Arc::new(SyncEngine::new(store.clone(), registry));
    let ticker = Arc::new(ScheduleTicker::new(engine.clone(), Duration::from_secs(30)));
    let backups = Arc::new(BackupManager::new(engine.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(store.clone()));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), OrchestratorConfig::default()));

    Ok(AppState {
        store,
        dispatcher,
        engine,
        ticker,
        backups,
        orchestrator,
        auth_token: auth_token.map(Arc::new),
    })
}
