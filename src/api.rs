//! HTTP surface: liveness check and the manual force-scrape trigger.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower_http::trace::TraceLayer;

use crate::workflow::{Engine, RunParams, WorkflowKind};

#[derive(Clone)]
struct ApiState {
    engine: Engine,
    trigger_token: Option<Arc<SecretString>>,
}

#[derive(Debug, Deserialize)]
struct TriggerQuery {
    token: Option<String>,
}

/// Builds the API router. Without a `trigger_token` every trigger request
/// is rejected.
pub fn router(engine: Engine, trigger_token: Option<SecretString>) -> Router {
    let state = ApiState {
        engine,
        trigger_token: trigger_token.map(Arc::new),
    };

    Router::new()
        .route("/ping", get(ping))
        .route("/trigger-rss", get(trigger_rss).post(trigger_rss))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "pong": true }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Compares SHA-256 digests of both tokens.
fn token_matches(expected: &SecretString, presented: &str) -> bool {
    let expected = Sha256::digest(expected.expose_secret().as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected == presented
}

async fn trigger_rss(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<TriggerQuery>,
) -> Response {
    let presented = bearer_token(&headers).or(query.token.as_deref());
    let authorized = match (state.trigger_token.as_deref(), presented) {
        (Some(expected), Some(presented)) => token_matches(expected, presented),
        _ => false,
    };
    if !authorized {
        tracing::warn!(token_present = presented.is_some(), "Rejected trigger request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    match state
        .engine
        .enqueue(WorkflowKind::ScrapeFeeds, RunParams { force: true })
        .await
    {
        Ok(run_id) => {
            tracing::info!(run_id = %run_id, "Manual scrape triggered");
            (
                StatusCode::OK,
                Json(json!({ "success": true, "run_id": run_id })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Manual scrape could not be queued");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
