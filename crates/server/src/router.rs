//! Tenant-facing JSON-RPC routes.
//!
//! `POST|GET /v1/{chain_id}/{access_key}` and `POST|GET /v2/{access_key}`
//! (chain via `?chainId=`). The HTTP concerns (path shape, auth, CORS, verb
//! filtering) live here, while the request pipeline itself is
//! [`chaingate_core::proxy::ProxyEngine`].

use axum::{
    body::Body,
    extract::{Path, Query, State},
    response::Response,
    routing::any,
    Router,
};
use chaingate_core::{
    proxy::{
        forward::UpstreamBody, ProxyEngine, ProxyError, ProxyReply, ProxyRequest, GATEWAY_VERSION,
    },
    store::GatewayStore,
    types::SecretKey,
};
use http::{header, HeaderMap, Method, Request, StatusCode};
use regex::Regex;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};
use tracing::error;

static CHAIN_ID_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("static path pattern"));
static ACCESS_KEY_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{32}$").expect("static path pattern"));

/// Shared state behind the tenant routes.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<ProxyEngine>,
    pub store: Arc<dyn GatewayStore>,
}

/// Builds the tenant-facing router.
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/{chain_id}/{access_key}", any(handle_v1))
        .route("/v2/{access_key}", any(handle_v2))
        .with_state(state)
}

async fn handle_v1(
    State(state): State<GatewayState>,
    Path((chain_id, access_key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    req: Request<Body>,
) -> Response {
    if !CHAIN_ID_SHAPE.is_match(&chain_id) || !ACCESS_KEY_SHAPE.is_match(&access_key) {
        return plain_error(StatusCode::BAD_REQUEST, "invalid path", None);
    }
    handle(state, Some(chain_id), access_key, query, req).await
}

async fn handle_v2(
    State(state): State<GatewayState>,
    Path(access_key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    req: Request<Body>,
) -> Response {
    if !ACCESS_KEY_SHAPE.is_match(&access_key) {
        return plain_error(StatusCode::BAD_REQUEST, "invalid path", None);
    }
    handle(state, None, access_key, query, req).await
}

async fn handle(
    state: GatewayState,
    path_chain_id: Option<String>,
    access_key: String,
    query: HashMap<String, String>,
    req: Request<Body>,
) -> Response {
    let secret = match state.store.get_secret_by_access_key(&access_key).await {
        Ok(secret) => secret,
        Err(_) => return plain_error(StatusCode::UNAUTHORIZED, "invalid access key", None),
    };

    let allow_origin = match resolve_allow_origin(&secret, req.headers()) {
        Ok(origin) => origin,
        Err(e) => {
            return plain_error(
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                &e.to_string(),
                None,
            )
        }
    };

    if req.method() == Method::OPTIONS {
        return preflight_response(&allow_origin);
    }
    if req.method() != Method::GET && req.method() != Method::POST {
        return plain_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed", None);
    }

    let chain_id = path_chain_id.or_else(|| query.get("chainId").cloned()).unwrap_or_default();
    if chain_id.is_empty() {
        return plain_error(StatusCode::BAD_REQUEST, "chainId is required", Some(&allow_origin));
    }
    let source = query.get("source").cloned().unwrap_or_default();

    if req.method() == Method::GET {
        return match state.engine.list_endpoints(&chain_id, &source).await {
            Ok(urls) => {
                let body = serde_json::to_vec(&urls).unwrap_or_default();
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, &allow_origin)
                    .body(Body::from(body))
                    .expect("static response construction")
            }
            Err(e) => proxy_error_response(&e, &allow_origin),
        };
    }

    let service = match query.get("service") {
        Some(service) if !service.is_empty() => service.clone(),
        _ => secret.service.clone(),
    };

    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "request body read failed");
            return plain_error(
                StatusCode::BAD_REQUEST,
                "failed to read request body",
                Some(&allow_origin),
            );
        }
    };

    let request = ProxyRequest { chain_id, source, service, secret, body, headers: parts.headers };
    match state.engine.handle_post(request).await {
        Ok(reply) => reply_response(reply, &allow_origin),
        Err(e) => proxy_error_response(&e, &allow_origin),
    }
}

/// Resolves the `Access-Control-Allow-Origin` value for a tenant.
///
/// An empty pattern means any origin; otherwise the pattern is compiled as a
/// regex and the request's `Origin` header must match.
fn resolve_allow_origin(secret: &SecretKey, headers: &HeaderMap) -> Result<String, ProxyError> {
    if secret.allow_origins.is_empty() {
        return Ok("*".to_string());
    }
    let pattern = Regex::new(&secret.allow_origins)
        .map_err(|_| ProxyError::Internal("invalid allow origins".to_string()))?;
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()).unwrap_or_default();
    if pattern.is_match(origin) {
        Ok(origin.to_string())
    } else {
        Err(ProxyError::Forbidden)
    }
}

fn preflight_response(allow_origin: &str) -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin)
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET,POST,OPTIONS")
        .header(header::ACCESS_CONTROL_MAX_AGE, "86400")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Body::empty())
        .expect("static response construction")
}

fn plain_error(status: StatusCode, message: &str, allow_origin: Option<&str>) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(origin) = allow_origin {
        builder = builder.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    builder
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .expect("static response construction")
}

fn proxy_error_response(error: &ProxyError, allow_origin: &str) -> Response {
    plain_error(
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        &error.to_string(),
        Some(allow_origin),
    )
}

/// Writes a forwarded upstream reply back to the client, headers preserved.
fn reply_response(reply: ProxyReply, allow_origin: &str) -> Response {
    let mut response_headers = reply.upstream.headers.clone();
    for name in [header::CONTENT_LENGTH, header::TRANSFER_ENCODING, header::CONNECTION] {
        response_headers.remove(&name);
    }

    let status = StatusCode::from_u16(reply.upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response_headers;
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            header::HeaderValue::from_str(allow_origin)
                .unwrap_or_else(|_| header::HeaderValue::from_static("*")),
        );
        headers.insert("x-cgv2-version", header::HeaderValue::from_static(GATEWAY_VERSION));
    }

    let body = match reply.upstream.body {
        UpstreamBody::Buffered(bytes) if bytes.is_empty() => Body::empty(),
        UpstreamBody::Buffered(bytes) => Body::from(bytes),
        UpstreamBody::Stream(response) => Body::from_stream(response.bytes_stream()),
    };
    builder.body(body).expect("response construction from upstream parts")
}
