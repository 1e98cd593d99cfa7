use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub security: String,
    pub signal: i32,
    pub channel: u32,
    pub frequency: u32,
}

/// Abstracted Wi-Fi control plane used by agents. The orchestration code
/// depends only on this trait; the OS-backed implementation lives behind it.
#[async_trait]
pub trait NetworkManager: Send + Sync + 'static {
    async fn available_networks(&self) -> Result<Vec<WifiNetwork>, AgentError>;
    async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<(), AgentError>;
    async fn disconnect(&self) -> Result<(), AgentError>;
    async fn current_network(&self) -> Result<Option<String>, AgentError>;

    async fn is_connected(&self, ssid: &str) -> Result<bool, AgentError> {
        Ok(self.current_network().await?.as_deref() == Some(ssid))
    }
}

// ── nmcli-backed implementation ───────────────────────────────────────────────

/// Drives the host's Wi-Fi through `nmcli`. Linux only; everything else uses
/// [`MockNetworkManager`].
pub struct NmcliNetworkManager;

impl NmcliNetworkManager {
    pub fn new() -> Self {
        Self
    }

    async fn nmcli(args: &[&str]) -> Result<String, AgentError> {
        debug!(?args, "nmcli");
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::Network(format!("nmcli spawn: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Network(format!(
                "nmcli {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NmcliNetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `nmcli -t -f SSID,SECURITY,SIGNAL,CHAN,FREQ device wifi list` output.
pub(crate) fn parse_wifi_list(output: &str) -> Vec<WifiNetwork> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 5 || fields[0].is_empty() {
                return None;
            }
            Some(WifiNetwork {
                ssid: fields[0].to_string(),
                security: fields[1].to_string(),
                signal: fields[2].parse().unwrap_or(0),
                channel: fields[3].parse().unwrap_or(0),
                frequency: fields[4]
                    .split_whitespace()
                    .next()
                    .and_then(|f| f.parse().ok())
                    .unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl NetworkManager for NmcliNetworkManager {
    async fn available_networks(&self) -> Result<Vec<WifiNetwork>, AgentError> {
        let out = Self::nmcli(&[
            "-t", "-f", "SSID,SECURITY,SIGNAL,CHAN,FREQ", "device", "wifi", "list",
            "--rescan", "yes",
        ])
        .await?;
        Ok(parse_wifi_list(&out))
    }

    async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<(), AgentError> {
        match password {
            Some(pw) if !pw.is_empty() => {
                Self::nmcli(&["device", "wifi", "connect", ssid, "password", pw]).await?;
            }
            _ => {
                Self::nmcli(&["device", "wifi", "connect", ssid]).await?;
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AgentError> {
        if let Some(current) = self.current_network().await? {
            Self::nmcli(&["connection", "down", "id", &current]).await?;
        }
        Ok(())
    }

    async fn current_network(&self) -> Result<Option<String>, AgentError> {
        let out = Self::nmcli(&["-t", "-f", "ACTIVE,SSID", "device", "wifi"]).await?;
        Ok(out.lines().find_map(|line| {
            line.strip_prefix("yes:")
                .filter(|ssid| !ssid.is_empty())
                .map(String::from)
        }))
    }
}

// ── Mock implementation ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MockState {
    networks: Vec<WifiNetwork>,
    current: Option<String>,
    connect_log: Vec<String>,
}

/// In-memory network manager for tests and non-Linux hosts.
#[derive(Debug, Default)]
pub struct MockNetworkManager {
    state: Mutex<MockState>,
}

impl MockNetworkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_networks(networks: Vec<WifiNetwork>) -> Self {
        Self {
            state: Mutex::new(MockState { networks, ..Default::default() }),
        }
    }

    /// SSIDs passed to `connect`, in order.
    pub async fn connect_log(&self) -> Vec<String> {
        self.state.lock().await.connect_log.clone()
    }
}

#[async_trait]
impl NetworkManager for MockNetworkManager {
    async fn available_networks(&self) -> Result<Vec<WifiNetwork>, AgentError> {
        Ok(self.state.lock().await.networks.clone())
    }

    async fn connect(&self, ssid: &str, _password: Option<&str>) -> Result<(), AgentError> {
        let mut state = self.state.lock().await;
        state.connect_log.push(ssid.to_string());
        state.current = Some(ssid.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AgentError> {
        self.state.lock().await.current = None;
        Ok(())
    }

    async fn current_network(&self) -> Result<Option<String>, AgentError> {
        Ok(self.state.lock().await.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_list_parses_terse_output() {
        let out = "shelly1-AABBCC:--:72:6:2437 MHz\nHomeNet:WPA2:88:11:2462 MHz\n:WPA2:10:1:2412 MHz\n";
        let networks = parse_wifi_list(out);
        assert_eq!(networks.len(), 2, "hidden SSIDs are dropped");
        assert_eq!(networks[0].ssid, "shelly1-AABBCC");
        assert_eq!(networks[0].signal, 72);
        assert_eq!(networks[1].security, "WPA2");
        assert_eq!(networks[1].frequency, 2462);
    }

    #[tokio::test]
    async fn mock_tracks_current_network() {
        let net = MockNetworkManager::new();
        assert!(net.current_network().await.unwrap().is_none());

        net.connect("HomeNet", Some("pw")).await.unwrap();
        assert!(net.is_connected("HomeNet").await.unwrap());
        assert!(!net.is_connected("Other").await.unwrap());

        net.disconnect().await.unwrap();
        assert!(net.current_network().await.unwrap().is_none());
    }
}
