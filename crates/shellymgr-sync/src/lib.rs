pub mod archive;
pub mod backup;
pub mod engine;
pub mod error;
pub mod gitops;
pub mod plugin;
pub mod registry;
pub mod schedule;
pub mod template;

pub use archive::ArchivePlugin;
pub use backup::{BackupManager, BackupRequest, BackupStatistics};
pub use engine::{ExportOutcome, ImportOutcome, SyncEngine, SyncStatistics};
pub use error::SyncError;
pub use gitops::{load_tree, GitOpsData, GitOpsDevice, GitOpsPlugin};
pub use plugin::{
    ChangeAction, ExportResult, ImportContext, ImportResult, PluginCapabilities, PluginCategory,
    PluginHealth, PluginInfo, PreviewResult, SyncChange, SyncPlugin,
};
pub use registry::{PluginRegistry, PluginStatus};
pub use schedule::ScheduleTicker;
pub use template::{load_manifest_dir, render, TemplateManifest, TemplatePlugin};
