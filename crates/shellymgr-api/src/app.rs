use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_admin_key;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        // Devices
        .route("/devices", get(handlers::list_devices).post(handlers::create_device))
        .route(
            "/devices/:id",
            get(handlers::get_device)
                .put(handlers::update_device)
                .delete(handlers::delete_device),
        )
        // Notifications
        .route(
            "/notifications/channels",
            get(handlers::list_channels).post(handlers::create_channel),
        )
        .route(
            "/notifications/channels/:id",
            get(handlers::get_channel)
                .put(handlers::update_channel)
                .delete(handlers::delete_channel),
        )
        .route("/notifications/channels/:id/test", post(handlers::test_channel))
        .route(
            "/notifications/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/notifications/rules/:id",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route("/notifications/send", post(handlers::send_notification))
        .route("/notifications/history", get(handlers::get_history))
        // Sync: export
        .route("/export", post(handlers::run_export))
        .route("/export/preview", post(handlers::preview_export))
        .route("/export/history", get(handlers::export_history))
        .route("/export/statistics", get(handlers::export_statistics))
        .route("/plugins", get(handlers::list_plugins))
        // Backups (registered before /export/:id so the literal segments win)
        .route("/export/backup", post(handlers::create_backup))
        .route("/export/backups", get(handlers::list_backups))
        .route(
            "/export/backup/:id",
            get(handlers::get_backup).delete(handlers::delete_backup),
        )
        .route("/export/backup/:id/download", get(handlers::download_backup))
        .route("/export/backup-statistics", get(handlers::backup_statistics))
        // Schedules
        .route(
            "/export/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/export/schedules/:id",
            get(handlers::get_schedule)
                .put(handlers::update_schedule)
                .delete(handlers::delete_schedule),
        )
        .route("/export/schedules/:id/run", post(handlers::run_schedule))
        .route("/export/:id", get(handlers::get_export))
        // Sync: import
        .route("/import", post(handlers::run_import))
        .route("/import/preview", post(handlers::preview_import))
        .route("/import/history", get(handlers::import_history))
        .route("/import/statistics", get(handlers::import_statistics))
        // Provisioner
        .route("/provisioner/health", get(handlers::provisioner_health))
        .route("/provisioner/agents/register", post(handlers::register_agent))
        .route("/provisioner/agents", get(handlers::list_agents))
        .route("/provisioner/agents/:id/tasks", get(handlers::poll_agent_tasks))
        .route(
            "/provisioner/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route("/provisioner/tasks/:id", get(handlers::get_task))
        .route("/provisioner/tasks/:id/status", put(handlers::update_task_status))
        .route(
            "/provisioner/discovered-devices",
            get(handlers::list_discovered).post(handlers::report_discovered),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .nest("/api/v1", api)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_key))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use shellymgr_store::InMemoryStore;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    use crate::state::build_state;

    const TEST_TOKEN: &str = "test-token";

    async fn test_app(dir: &std::path::Path) -> Router {
        let store = Arc::new(InMemoryStore::new());
        let state = build_state(store, dir, Some(TEST_TOKEN.to_string()))
            .await
            .unwrap();
        build_app(state)
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        authed(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header("content-type", "application/json"),
        )
        .body(Body::from(body.to_string()))
        .unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn query_token_variant_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/health?token={TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn x_api_key_variant_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-API-Key", TEST_TOKEN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn devices_crud_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/v1/devices",
                json!({"mac": "aa:bb:cc:dd:ee:ff", "name": "kitchen"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["mac"], "AA:BB:CC:DD:EE:FF");
        let id = body["data"]["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(
                authed(Request::builder().uri(format!("/api/v1/devices/{id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::DELETE)
                        .uri(format!("/api/v1/devices/{id}")),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_channel_type_maps_to_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let resp = app
            .oneshot(post_json(
                "/api/v1/notifications/channels",
                json!({"name": "c", "type": "pigeon", "config": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "validation");
    }

    #[tokio::test]
    async fn invalid_channel_config_maps_to_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let resp = app
            .oneshot(post_json(
                "/api/v1/notifications/channels",
                json!({"name": "c", "type": "webhook", "config": {"url": ""}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "validation");
    }

    #[tokio::test]
    async fn rule_with_unknown_channel_maps_to_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let resp = app
            .oneshot(post_json(
                "/api/v1/notifications/rules",
                json!({"name": "r", "channel_id": 99, "alert_level": "all"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn schedule_interval_bounds_map_to_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        let resp = app
            .oneshot(post_json(
                "/api/v1/export/schedules",
                json!({
                    "name": "too-fast",
                    "interval_seconds": 10,
                    "request": {"plugin_name": "archive", "format": "sma"},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn agent_protocol_flow_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        // Register.
        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/v1/provisioner/agents/register",
                json!({"id": "a1", "hostname": "pi.local", "version": "1.0.0"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // Create a scan task.
        let resp = app
            .clone()
            .oneshot(post_json("/api/v1/provisioner/tasks", json!({"task_type": "scan"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let task_id = body_json(resp).await["data"]["id"].as_str().unwrap().to_string();

        // Poll claims it.
        let resp = app
            .clone()
            .oneshot(
                authed(Request::builder().uri("/api/v1/provisioner/agents/a1/tasks"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["data"][0]["id"], task_id.as_str());
        assert_eq!(body["data"][0]["status"], "assigned");

        // Status update from the wrong agent is a conflict.
        let resp = app
            .clone()
            .oneshot({
                let uri = format!("/api/v1/provisioner/tasks/{task_id}/status");
                authed(
                    Request::builder()
                        .method(Method::PUT)
                        .uri(uri)
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    json!({"agent_id": "intruder", "status": "running"}).to_string(),
                ))
                .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // The owner can move it along.
        let resp = app
            .oneshot({
                let uri = format!("/api/v1/provisioner/tasks/{task_id}/status");
                authed(
                    Request::builder()
                        .method(Method::PUT)
                        .uri(uri)
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    json!({"agent_id": "a1", "status": "running"}).to_string(),
                ))
                .unwrap()
            })
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn export_endpoint_produces_archive_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;

        app.clone()
            .oneshot(post_json(
                "/api/v1/devices",
                json!({"mac": "aa:bb:cc:dd:ee:01", "name": "d1"}),
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/v1/export",
                json!({"plugin_name": "archive", "format": "sma"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["history"]["success"], true);
        let export_id = body["data"]["history"]["export_id"].as_str().unwrap().to_string();

        let resp = app
            .oneshot(
                authed(Request::builder().uri(format!("/api/v1/export/{export_id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
