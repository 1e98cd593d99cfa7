use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shellymgr_domain::{
    Mac, ProvisionOutcome, ProvisionRequest, StepStatus, WorkflowStep,
    DEFAULT_VERIFY_TIMEOUT_SECS,
};
use tracing::{debug, info, warn};

use crate::device::DeviceClient;
use crate::error::AgentError;
use crate::net::NetworkManager;

/// The unprovisioned device a workflow is aimed at.
#[derive(Debug, Clone)]
pub struct ProvisionTarget {
    pub mac: Mac,
    pub ap_ssid: String,
    pub generation: u8,
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Device address while joined to its AP.
    pub ap_base_url: String,
    /// Override the hostname-derived verification probe URLs (tests).
    pub verify_urls: Option<Vec<String>>,
    pub verify_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            ap_base_url: "http://192.168.33.1".into(),
            verify_urls: None,
            verify_timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            probe_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct StepRecorder {
    steps: Vec<WorkflowStep>,
}

impl StepRecorder {
    fn begin(&mut self, name: &str) -> usize {
        self.steps.push(WorkflowStep {
            name: name.to_string(),
            status: StepStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            error: None,
        });
        self.steps.len() - 1
    }

    fn finish(&mut self, idx: usize, error: Option<String>) {
        let step = &mut self.steps[idx];
        let now = Utc::now();
        step.finished_at = Some(now);
        step.duration_ms = Some((now - step.started_at).num_milliseconds().max(0) as u64);
        match error {
            None => step.status = StepStatus::Success,
            Some(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(e);
            }
        }
    }

    /// Mark any step still in progress as failed with `error`.
    fn abort_open(&mut self, error: &str) {
        let open: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::InProgress)
            .map(|(i, _)| i)
            .collect();
        for idx in open {
            self.finish(idx, Some(error.to_string()));
        }
    }
}

/// Executes the ordered per-device provisioning workflow:
/// connect to the device AP, push Wi-Fi credentials, apply optional device
/// config (best effort), reboot, then verify the device appears on the
/// target network.
pub struct ProvisionWorkflow {
    net: Arc<dyn NetworkManager>,
    options: WorkflowOptions,
}

impl ProvisionWorkflow {
    pub fn new(net: Arc<dyn NetworkManager>, options: WorkflowOptions) -> Self {
        Self { net, options }
    }

    pub async fn run(&self, target: &ProvisionTarget, request: &ProvisionRequest) -> ProvisionOutcome {
        let deadline = Duration::from_secs(request.effective_timeout_secs());
        let mut rec = StepRecorder::default();

        let result =
            tokio::time::timeout(deadline, self.run_steps(target, request, &mut rec)).await;

        let (success, final_ip) = match result {
            Ok(Ok(final_ip)) => (true, final_ip),
            Ok(Err(e)) => {
                warn!(mac = %target.mac, error = %e, "provisioning failed");
                (false, None)
            }
            Err(_) => {
                warn!(mac = %target.mac, "workflow deadline exceeded");
                rec.abort_open("workflow deadline exceeded");
                (false, None)
            }
        };

        if success {
            info!(mac = %target.mac, "provisioning complete");
        }
        ProvisionOutcome { mac: target.mac.clone(), success, steps: rec.steps, final_ip }
    }

    async fn run_steps(
        &self,
        target: &ProvisionTarget,
        request: &ProvisionRequest,
        rec: &mut StepRecorder,
    ) -> Result<Option<String>, AgentError> {
        let device = DeviceClient::new(&self.options.ap_base_url);

        // 1. Join the device's AP.
        let idx = rec.begin("connect_to_device_ap");
        match self.net.connect(&target.ap_ssid, None).await {
            Ok(()) => rec.finish(idx, None),
            Err(e) => {
                rec.finish(idx, Some(e.to_string()));
                return Err(e);
            }
        }

        // 2. Push station credentials.
        let idx = rec.begin("configure_wifi");
        match device.configure_wifi(target.generation, &request.wifi).await {
            Ok(()) => rec.finish(idx, None),
            Err(e) => {
                rec.finish(idx, Some(e.to_string()));
                return Err(e);
            }
        }

        // 3. Optional device config — each sub-step is best effort.
        if let Some(name) = &request.device_name {
            let idx = rec.begin("set_device_name");
            match device.set_name(target.generation, name).await {
                Ok(()) => rec.finish(idx, None),
                Err(e) => {
                    debug!(error = %e, "set_device_name failed, continuing");
                    rec.finish(idx, Some(e.to_string()));
                }
            }
        }
        if let Some(auth) = &request.auth {
            let idx = rec.begin("configure_auth");
            match device.configure_auth(target.generation, auth).await {
                Ok(()) => rec.finish(idx, None),
                Err(e) => {
                    debug!(error = %e, "configure_auth failed, continuing");
                    rec.finish(idx, Some(e.to_string()));
                }
            }
        }
        if let Some(mqtt) = &request.mqtt {
            let idx = rec.begin("configure_mqtt");
            match device.configure_mqtt(target.generation, mqtt).await {
                Ok(()) => rec.finish(idx, None),
                Err(e) => {
                    debug!(error = %e, "configure_mqtt failed, continuing");
                    rec.finish(idx, Some(e.to_string()));
                }
            }
        }
        if let Some(cloud) = &request.cloud {
            let idx = rec.begin("configure_cloud");
            match device.configure_cloud(target.generation, cloud).await {
                Ok(()) => rec.finish(idx, None),
                Err(e) => {
                    debug!(error = %e, "configure_cloud failed, continuing");
                    rec.finish(idx, Some(e.to_string()));
                }
            }
        }

        // 4. Reboot into station mode.
        let idx = rec.begin("reboot_device");
        match device.reboot(target.generation).await {
            Ok(()) => rec.finish(idx, None),
            Err(e) => {
                rec.finish(idx, Some(e.to_string()));
                return Err(e);
            }
        }

        // 5. Rejoin the target network and wait for the device to surface.
        let idx = rec.begin("verify_provisioning");
        match self.verify(target, request).await {
            Ok(final_ip) => {
                rec.finish(idx, None);
                Ok(final_ip)
            }
            Err(e) => {
                rec.finish(idx, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Known-hostname probe: the device's mDNS name matches its AP SSID.
    /// Falls back to the AP-side reported address when the hostname never
    /// resolves.
    async fn verify(
        &self,
        target: &ProvisionTarget,
        request: &ProvisionRequest,
    ) -> Result<Option<String>, AgentError> {
        self.net
            .connect(&request.wifi.ssid, Some(&request.wifi.password))
            .await?;

        let urls = self.options.verify_urls.clone().unwrap_or_else(|| {
            vec![
                format!("http://{}.local", target.ap_ssid.to_ascii_lowercase()),
                self.options.ap_base_url.clone(),
            ]
        });
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();

        let deadline = tokio::time::Instant::now() + self.options.verify_timeout;
        loop {
            for url in &urls {
                match probe.get(format!("{url}/shelly")).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(url = %url, "device verified on target network");
                        return Ok(host_ip(url));
                    }
                    Ok(_) | Err(_) => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::Timeout("verify_provisioning".into()));
            }
            tokio::time::sleep(self.options.probe_interval).await;
        }
    }
}

/// Extract the host from a probe URL when it is an IP literal.
fn host_ip(url: &str) -> Option<String> {
    let without_scheme = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = host_port.split(':').next().unwrap_or(host_port);
    host.parse::<std::net::IpAddr>().ok().map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MockNetworkManager;
    use shellymgr_domain::WifiCredentials;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> ProvisionTarget {
        ProvisionTarget {
            mac: Mac::parse("AA:BB:CC:DD:EE:FF").unwrap(),
            ap_ssid: "shelly1-DDEEFF".into(),
            generation: 1,
        }
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            wifi: WifiCredentials { ssid: "HomeNet".into(), password: "pw".into() },
            device_name: Some("kitchen".into()),
            auth: None,
            mqtt: None,
            cloud: None,
            timeout_secs: Some(30),
        }
    }

    fn options(server: &MockServer) -> WorkflowOptions {
        WorkflowOptions {
            ap_base_url: server.uri(),
            verify_urls: Some(vec![server.uri()]),
            verify_timeout: Duration::from_secs(2),
            probe_interval: Duration::from_millis(20),
        }
    }

    async fn mount_happy_device(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/settings/sta"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reboot"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shelly"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"mac": "AABBCCDDEEFF"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn happy_path_records_all_steps_in_order() {
        let server = MockServer::start().await;
        mount_happy_device(&server).await;

        let net = Arc::new(MockNetworkManager::new());
        let workflow = ProvisionWorkflow::new(net.clone(), options(&server));
        let outcome = workflow.run(&target(), &request()).await;

        assert!(outcome.success, "steps: {:?}", outcome.steps);
        let names: Vec<&str> = outcome.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "connect_to_device_ap",
                "configure_wifi",
                "set_device_name",
                "reboot_device",
                "verify_provisioning",
            ]
        );
        assert!(outcome.steps.iter().all(|s| s.status == StepStatus::Success));

        // The agent hopped from the device AP to the target network.
        assert_eq!(net.connect_log().await, vec!["shelly1-DDEEFF", "HomeNet"]);
    }

    #[tokio::test]
    async fn wifi_config_failure_aborts_the_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settings/sta"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let net = Arc::new(MockNetworkManager::new());
        let workflow = ProvisionWorkflow::new(net, options(&server));
        let outcome = workflow.run(&target(), &request()).await;

        assert!(!outcome.success);
        let wifi_step = outcome
            .steps
            .iter()
            .find(|s| s.name == "configure_wifi")
            .unwrap();
        assert_eq!(wifi_step.status, StepStatus::Failed);
        assert!(wifi_step.error.is_some());
        assert!(!outcome.steps.iter().any(|s| s.name == "reboot_device"));
    }

    #[tokio::test]
    async fn optional_substep_failure_does_not_abort() {
        let server = MockServer::start().await;
        // MQTT endpoint rejects, everything else is healthy.
        Mock::given(method("POST"))
            .and(path("/settings/sta"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reboot"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shelly"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let net = Arc::new(MockNetworkManager::new());
        let workflow = ProvisionWorkflow::new(net, options(&server));
        let mut req = request();
        req.device_name = None;
        req.mqtt = Some(shellymgr_domain::MqttConfig {
            server: "mqtt.local".into(),
            username: None,
            password: None,
        });
        let outcome = workflow.run(&target(), &req).await;

        assert!(outcome.success, "best-effort failure must not abort");
        let mqtt_step = outcome
            .steps
            .iter()
            .find(|s| s.name == "configure_mqtt")
            .unwrap();
        assert_eq!(mqtt_step.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn verify_falls_back_to_ap_reported_address() {
        let server = MockServer::start().await;
        mount_happy_device(&server).await;

        let net = Arc::new(MockNetworkManager::new());
        // No verify override: the first probe goes to the (unresolvable)
        // mDNS hostname, the fallback to the AP-reported address — which is
        // the mock device here.
        let mut opts = options(&server);
        opts.verify_urls = None;
        opts.verify_timeout = Duration::from_secs(10);
        let workflow = ProvisionWorkflow::new(net, opts);

        let mut req = request();
        req.device_name = None;
        let outcome = workflow.run(&target(), &req).await;

        assert!(outcome.success, "steps: {:?}", outcome.steps);
        let verify = outcome
            .steps
            .iter()
            .find(|s| s.name == "verify_provisioning")
            .unwrap();
        assert_eq!(verify.status, StepStatus::Success);
        assert_eq!(outcome.final_ip.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn workflow_deadline_fails_the_run() {
        let server = MockServer::start().await;
        mount_happy_device(&server).await;

        let net = Arc::new(MockNetworkManager::new());
        let mut opts = options(&server);
        // Probes point at a dead port; the 1s workflow deadline fires first.
        opts.verify_urls = Some(vec!["http://127.0.0.1:9".into()]);
        opts.verify_timeout = Duration::from_secs(60);
        opts.probe_interval = Duration::from_millis(50);
        let workflow = ProvisionWorkflow::new(net, opts);

        let mut req = request();
        req.device_name = None;
        req.timeout_secs = Some(1);
        let outcome = workflow.run(&target(), &req).await;

        assert!(!outcome.success);
        let verify = outcome
            .steps
            .iter()
            .find(|s| s.name == "verify_provisioning")
            .unwrap();
        assert_eq!(verify.status, StepStatus::Failed);
    }
}
