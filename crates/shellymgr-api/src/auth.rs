use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::envelope::error_body;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct TokenQuery {
    token: Option<String>,
}

/// Admin-key gate applied to every route.
///
/// Accepts `Authorization: Bearer <key>`, `X-API-Key: <key>`, or — for
/// websocket-style clients that cannot set headers — `?token=<key>`. With no
/// key configured the gate is open.
pub async fn require_admin_key(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.auth_token else {
        return next.run(request).await;
    };

    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    let api_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    let provided = bearer.or(api_key).or(query.token.as_deref());
    match provided {
        Some(token) if token == expected.as_str() => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(error_body("unauthorized", "missing or invalid admin key")),
        )
            .into_response(),
    }
}
