pub mod error;
pub mod orchestrator;

pub use error::ProvisionError;
pub use orchestrator::{
    AgentRegistration, DiscoveredDeviceReport, NewTask, Orchestrator, OrchestratorConfig,
    ReclaimSweeper,
};
