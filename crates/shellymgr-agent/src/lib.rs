pub mod client;
pub mod device;
pub mod error;
pub mod net;
pub mod runtime;
pub mod workflow;

pub use client::{AgentInfo, ControlPlaneClient, DiscoveredReport};
pub use device::DeviceClient;
pub use error::AgentError;
pub use net::{MockNetworkManager, NetworkManager, NmcliNetworkManager, WifiNetwork};
pub use runtime::{AgentConfig, AgentRuntime};
pub use workflow::{ProvisionTarget, ProvisionWorkflow, WorkflowOptions};
