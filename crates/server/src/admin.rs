//! Admin surface: narrow upsert endpoints gated by HTTP Basic.
//!
//! Credentials live in the store's (`admin`, `basic_auth`) config record as
//! `"user pass"`. Record CRUD beyond these upserts belongs to the
//! collections backend, not here.

use axum::{
    body::Body,
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chaingate_core::{
    keys::generate_key_pair,
    store::GatewayStore,
    types::{ConfigEntry, Protocol, ReadyUpstream, SecretKey},
};
use http::{header, HeaderMap, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn GatewayStore>,
}

/// Builds the admin router, rooted at `/admin/v1`.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/v1/secret", post(upsert_secret))
        .route("/admin/v1/secret/gen", get(generate_secret))
        .route("/admin/v1/upstream/ready", post(upsert_ready_upstreams))
        .route("/admin/v1/config", post(upsert_config))
        .with_state(state)
}

/// Verifies HTTP Basic credentials against the stored admin config.
async fn authorize(store: &Arc<dyn GatewayStore>, headers: &HeaderMap) -> Result<(), Response> {
    let unauthorized = || {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("www-authenticate", "Basic")
            .body(Body::from("Unauthorized"))
            .expect("static response construction")
    };

    let configured = store.get_config("admin", "basic_auth").await.map_err(|_| unauthorized())?;
    let mut parts = configured.split_whitespace();
    let (Some(user), Some(password)) = (parts.next(), parts.next()) else {
        return Err(unauthorized());
    };

    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or_else(unauthorized)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(header_value)
        .map_err(|_| unauthorized())?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
    let Some((got_user, got_password)) = decoded.split_once(':') else {
        return Err(unauthorized());
    };

    if got_user == user && got_password == password {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

fn ok() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from("OK"))
        .expect("static response construction")
}

fn bad_request(message: &str) -> Response {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(message.to_string()))
        .expect("static response construction")
}

fn internal_error(message: String) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Body::from(message))
        .expect("static response construction")
}

async fn upsert_secret(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(secret): Json<SecretKey>,
) -> Response {
    if let Err(response) = authorize(&state.store, &headers).await {
        return response;
    }
    if secret.access_key.is_empty() {
        return bad_request("access_key is required");
    }
    match state.store.put_secret_key(secret.clone()).await {
        Ok(()) => {
            info!(group = %secret.group, service = %secret.service, "admin upserted secret key");
            ok()
        }
        Err(e) => internal_error(e.to_string()),
    }
}

async fn generate_secret(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state.store, &headers).await {
        return response;
    }
    let pair = generate_key_pair();
    let body = serde_json::json!({
        "access_key": pair.access_key,
        "secret_key": pair.secret_key,
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("static response construction")
}

#[derive(Debug, Deserialize)]
struct ReadyUpstreamPayload {
    chain_id: String,
    source: String,
    rpc: String,
    #[serde(default)]
    protocol: Option<Protocol>,
}

async fn upsert_ready_upstreams(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(payload): Json<Vec<ReadyUpstreamPayload>>,
) -> Response {
    if let Err(response) = authorize(&state.store, &headers).await {
        return response;
    }
    for entry in payload {
        if entry.chain_id.is_empty() || entry.source.is_empty() {
            return bad_request("chain_id and source are required");
        }
        let ready = ReadyUpstream {
            chain_id: entry.chain_id,
            source: entry.source,
            rpc: entry.rpc,
            protocol: entry.protocol.unwrap_or_default(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = state.store.put_ready_upstream(ready).await {
            return internal_error(e.to_string());
        }
    }
    ok()
}

async fn upsert_config(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(entry): Json<ConfigEntry>,
) -> Response {
    if let Err(response) = authorize(&state.store, &headers).await {
        return response;
    }
    if entry.module.is_empty() || entry.key.is_empty() {
        return bad_request("module and key are required");
    }
    match state.store.put_config(entry).await {
        Ok(()) => ok(),
        Err(e) => internal_error(e.to_string()),
    }
}
