use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use shellymgr_agent::{AgentConfig, AgentRuntime, MockNetworkManager, NetworkManager, NmcliNetworkManager};
use shellymgr_api::{build_app, build_state};
use shellymgr_notify::RetrySweeper;
use shellymgr_provision::ReclaimSweeper;
use shellymgr_store::{InMemoryStore, PostgresStore, Store};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(
    bind: String,
    port: u16,
    database_url: Option<String>,
    ephemeral: bool,
    data_dir: PathBuf,
    rotate_token: bool,
) -> Result<()> {
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let token = resolve_token(&data_dir, rotate_token)?;

    let store: Arc<dyn Store> = match (&database_url, ephemeral) {
        (_, true) | (None, _) => {
            println!("Using in-memory (ephemeral) store — state will be lost on server stop");
            Arc::new(InMemoryStore::new())
        }
        (Some(url), false) => {
            println!("Using PostgreSQL store");
            Arc::new(PostgresStore::connect(url).await?)
        }
    };

    let state = build_state(store, &data_dir, Some(token)).await?;

    // Shutdown fan-out for every cooperative subsystem.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retry = RetrySweeper::new(state.dispatcher.clone(), Duration::from_secs(30));
    tokio::spawn(retry.run(shutdown_rx.clone()));

    tokio::spawn(state.ticker.clone().run(shutdown_rx.clone()));

    let reclaim_interval =
        Duration::from_secs(state.orchestrator.config().poll_interval_secs);
    let reclaim = ReclaimSweeper::new(state.orchestrator.clone(), reclaim_interval);
    tokio::spawn(reclaim.run(shutdown_rx.clone()));

    let app = build_app(state);
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "control plane listening");
    println!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}

/// Reuse the existing admin key unless rotation is requested, so server
/// restarts don't invalidate client configurations.
fn resolve_token(data_dir: &Path, rotate: bool) -> Result<String> {
    let token_path = data_dir.join("token");
    if !rotate {
        if let Ok(existing) = std::fs::read_to_string(&token_path) {
            let existing = existing.trim().to_string();
            if !existing.is_empty() {
                println!("Reusing admin key from {}", token_path.display());
                return Ok(existing);
            }
        }
    }
    let token = Uuid::new_v4().simple().to_string();
    std::fs::write(&token_path, &token)
        .with_context(|| format!("writing {}", token_path.display()))?;
    println!("Admin key written to {}", token_path.display());
    if rotate {
        println!("New key: {token}");
    }
    Ok(token)
}

// ── Agent ─────────────────────────────────────────────────────────────────────

pub async fn agent(
    server: String,
    token: Option<String>,
    id: Option<String>,
    poll_interval_secs: u64,
    mock_network: bool,
) -> Result<()> {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "agent".into());
    let agent_id = id.unwrap_or_else(|| format!("agent-{hostname}"));

    let mut config = AgentConfig::new(server, agent_id);
    config.token = token;
    config.hostname = hostname;
    config.poll_interval = Duration::from_secs(poll_interval_secs);

    let net: Arc<dyn NetworkManager> = if mock_network {
        println!("Using mock network manager");
        Arc::new(MockNetworkManager::new())
    } else {
        Arc::new(NmcliNetworkManager::new())
    };

    let runtime = AgentRuntime::new(config, net);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });
    runtime.run(shutdown_rx).await?;
    Ok(())
}

// ── Remote client commands ────────────────────────────────────────────────────

struct Remote {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Remote {
    fn new(base: String, token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base, token }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.header("Authorization", format!("Bearer {t}")),
            None => req,
        }
    }

    async fn unwrap_envelope(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body: Value = resp.json().await.context("reading server response")?;
        if body["success"] != json!(true) {
            anyhow::bail!(
                "server returned {}: {}",
                status,
                body["error"]["message"].as_str().unwrap_or("unknown error")
            );
        }
        Ok(body["data"].clone())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .authed(self.http.get(format!("{}{}", self.base, path)))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::unwrap_envelope(resp).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .authed(self.http.post(format!("{}{}", self.base, path)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::unwrap_envelope(resp).await
    }
}

pub async fn export(
    server: String,
    token: Option<String>,
    plugin: String,
    format: String,
    config: Option<String>,
) -> Result<()> {
    let config: Value = match config {
        Some(raw) => serde_json::from_str(&raw).context("parsing --config JSON")?,
        None => Value::Null,
    };
    let remote = Remote::new(server, token);
    let data = remote
        .post(
            "/api/v1/export",
            json!({
                "plugin_name": plugin,
                "format": format,
                "config": config,
                "requested_by": "cli",
            }),
        )
        .await?;
    println!("{}", output::render_export(&data));
    Ok(())
}

pub async fn import(
    server: String,
    token: Option<String>,
    plugin: String,
    format: String,
    file: PathBuf,
    dry_run: bool,
) -> Result<()> {
    let remote = Remote::new(server, token);
    let data = remote
        .post(
            "/api/v1/import",
            json!({
                "plugin_name": plugin,
                "format": format,
                "config": null,
                "source": {"kind": "file", "path": file},
                "requested_by": "cli",
                "dry_run": dry_run,
            }),
        )
        .await?;
    println!("{}", output::render_import(&data));
    Ok(())
}

pub async fn status(server: String, token: Option<String>) -> Result<()> {
    let remote = Remote::new(server, token);
    let devices = remote.get("/api/v1/devices").await?;
    let provisioner = remote.get("/api/v1/provisioner/health").await?;
    let exports = remote.get("/api/v1/export/statistics").await?;
    println!("{}", output::render_status(&devices, &provisioner, &exports));
    Ok(())
}

pub async fn schedule_list(server: String, token: Option<String>) -> Result<()> {
    let remote = Remote::new(server, token);
    let schedules = remote.get("/api/v1/export/schedules").await?;
    println!("{}", output::render_schedules(&schedules));
    Ok(())
}

pub async fn schedule_run(server: String, token: Option<String>, id: i64) -> Result<()> {
    let remote = Remote::new(server, token);
    let data = remote
        .post(&format!("/api/v1/export/schedules/{id}/run"), json!({}))
        .await?;
    println!("{}", output::render_export(&data));
    Ok(())
}
