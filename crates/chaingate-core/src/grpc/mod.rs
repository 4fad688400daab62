//! Transparent gRPC proxy.
//!
//! gRPC calls are HTTP/2 exchanges, so the proxy forwards them at that
//! level: the inbound request's path, headers, body and trailers pass
//! through untouched to a round-robin-selected upstream channel for the
//! chain named in the request metadata. The standard health service is
//! answered locally; everything else is forwarded.

pub mod body;
pub mod channel;
pub mod upstream;

use crate::proxy::trace::GrpcTraceBuilder;
use crate::store::GatewayStore;
use crate::types::{Protocol, RpcList, SecretKey};
use axum::{body::Body, extract::State, response::Response, Router};
use body::{GrpcReplyBody, TraceBody};
use channel::{boxed_body, encode_frame, read_grpc_status};
use http::Request;
use parking_lot::RwLock;
use prost::Message;
use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc, time::Duration, time::Instant};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use upstream::GrpcUpstreamCache;

/// Source label attached to gRPC traces.
const GRPC_SOURCE: &str = "custom/grpc";

mod codes {
    pub const INVALID_ARGUMENT: u32 = 3;
    pub const UNIMPLEMENTED: u32 = 12;
    pub const UNAVAILABLE: u32 = 14;
    pub const UNAUTHENTICATED: u32 = 16;
}

/// Standard health protocol, served locally.
mod health {
    /// `grpc.health.v1.HealthCheckResponse`.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct HealthCheckResponse {
        #[prost(int32, tag = "1")]
        pub status: i32,
    }

    pub const SERVING: i32 = 1;
    pub const SERVICE_PREFIX: &str = "/grpc.health.v1.Health/";
}

/// The gRPC data plane: access-key auth, chain routing, round-robin
/// forwarding and per-call traces.
pub struct GrpcProxy {
    store: Arc<dyn GatewayStore>,
    upstreams: GrpcUpstreamCache,
    secrets: RwLock<HashMap<String, SecretKey>>,
    refresh_interval: Duration,
}

impl GrpcProxy {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            upstreams: GrpcUpstreamCache::new(),
            secrets: RwLock::new(HashMap::new()),
            refresh_interval,
        }
    }

    /// Reads ready `grpc` rows and reconciles every chain's channel pool.
    pub async fn refresh_upstreams(&self) {
        let rows = match self.store.list_ready_upstreams_by_protocol(Protocol::Grpc).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "grpc upstream fetch failed");
                return;
            }
        };
        if rows.is_empty() {
            warn!("no ready grpc upstreams found");
            return;
        }
        let count = rows.len();
        for row in rows {
            self.upstreams.put(&row.chain_id, RpcList::from(row.rpc.as_str()).unique_urls());
        }
        info!(count = count, "grpc upstream refresh complete");
    }

    /// Spawns the refresh loop: one immediate pass, then every
    /// `refresh_interval` until shutdown.
    #[must_use]
    pub fn start_refresh(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let proxy = Arc::clone(self);
        tokio::spawn(async move {
            proxy.refresh_upstreams().await;
            let mut ticker = tokio::time::interval(proxy.refresh_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => proxy.refresh_upstreams().await,
                    _ = shutdown_rx.recv() => {
                        info!("grpc upstream refresh shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// The proxy as an axum router (HTTP/2 cleartext capable).
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().fallback(proxy_handler).with_state(Arc::clone(self))
    }

    /// Serves the proxy until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns the listener bind or accept error.
    pub async fn serve<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(address = %addr, "grpc proxy listening");
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await
    }

    /// Verifies an access key with a process-local memo cache: read lock
    /// first, store lookup and write-lock insert on miss.
    async fn verify_access_key(&self, access_key: &str) -> Option<SecretKey> {
        {
            let secrets = self.secrets.read();
            if let Some(secret) = secrets.get(access_key) {
                return Some(secret.clone());
            }
        }

        let secret = self.store.get_secret_by_access_key(access_key).await.ok()?;

        let mut secrets = self.secrets.write();
        Some(secrets.entry(access_key.to_string()).or_insert(secret).clone())
    }
}

/// Resolves the chain id from `chainid` metadata, falling back to known
/// `network` aliases.
fn chain_id_from_headers(headers: &http::HeaderMap) -> Option<String> {
    if let Some(chain_id) = headers.get("chainid").and_then(|v| v.to_str().ok()) {
        if !chain_id.is_empty() {
            return Some(chain_id.to_string());
        }
    }
    match headers.get("network").and_then(|v| v.to_str().ok()) {
        Some("tron-testnet") => Some("3448148188".to_string()),
        Some("tron-mainnet") => Some("728126428".to_string()),
        Some("chihuahua-mainnet") => Some("chihuahua-1".to_string()),
        _ => None,
    }
}

/// Builds a trailers-only gRPC error response.
fn status_response(code: u32, message: &str) -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header("grpc-status", code.to_string())
        .header(
            "grpc-message",
            http::HeaderValue::from_str(message)
                .unwrap_or_else(|_| http::HeaderValue::from_static("error")),
        )
        .body(Body::empty())
        .expect("static grpc status response")
}

fn health_response(path: &str) -> Response<Body> {
    let method = path.trim_start_matches(health::SERVICE_PREFIX);
    match method {
        "Check" | "Watch" => {
            let reply = health::HealthCheckResponse { status: health::SERVING };
            let framed = encode_frame(&reply.encode_to_vec());
            Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/grpc")
                .body(Body::new(GrpcReplyBody::message(framed)))
                .expect("static health response")
        }
        _ => status_response(codes::UNIMPLEMENTED, "not implemented"),
    }
}

async fn proxy_handler(
    State(proxy): State<Arc<GrpcProxy>>,
    req: Request<Body>,
) -> Response<Body> {
    let path = req.uri().path().to_string();
    if path.starts_with(health::SERVICE_PREFIX) {
        return health_response(&path);
    }

    let access_key = req
        .headers()
        .get("accesskey")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let Some(secret) = proxy.verify_access_key(&access_key).await else {
        return status_response(codes::UNAUTHENTICATED, "Unauthenticated");
    };

    let Some(chain_id) = chain_id_from_headers(req.headers()) else {
        return status_response(codes::INVALID_ARGUMENT, "chainId is empty");
    };

    let channel = match proxy.upstreams.get(&chain_id).ok_or("no upstream found") {
        Ok(pool) => match pool.select() {
            Ok(channel) => channel,
            Err(e) => {
                emit_selection_trace(&secret, &chain_id, req.headers(), &path, &e.to_string());
                return status_response(codes::UNAVAILABLE, &e.to_string());
            }
        },
        Err(e) => {
            emit_selection_trace(&secret, &chain_id, req.headers(), &path, e);
            return status_response(codes::UNAVAILABLE, e);
        }
    };

    let builder = GrpcTraceBuilder::new(&secret.service, &secret.group)
        .with_chain_id_and_source(&chain_id, GRPC_SOURCE)
        .with_upstream_node(channel.target())
        .with_request(req.headers(), &path);
    let start = Instant::now();

    let (parts, inbound_body) = req.into_parts();
    let forward_req = Request::from_parts(parts, boxed_body(inbound_body));

    match channel.forward(forward_req).await {
        Ok(response) => {
            let (parts, upstream_body) = response.into_parts();
            if let Some((code, message)) = read_grpc_status(&parts.headers) {
                // Trailers-only reply: the status is already known.
                #[allow(clippy::cast_possible_truncation)]
                let latency_ms = start.elapsed().as_millis() as i64;
                builder.with_response(latency_ms, code, &message).build().println();
                return Response::from_parts(parts, Body::new(upstream_body));
            }
            Response::from_parts(parts, Body::new(TraceBody::new(upstream_body, builder, start)))
        }
        Err(e) => {
            warn!(chain_id = %chain_id, error = %e, "grpc forward failed");
            #[allow(clippy::cast_possible_truncation)]
            let latency_ms = start.elapsed().as_millis() as i64;
            builder
                .with_response(latency_ms, codes::UNAVAILABLE, &e.to_string())
                .build()
                .println();
            status_response(codes::UNAVAILABLE, &e.to_string())
        }
    }
}

fn emit_selection_trace(
    secret: &SecretKey,
    chain_id: &str,
    headers: &http::HeaderMap,
    method: &str,
    message: &str,
) {
    warn!(chain_id = %chain_id, method = %method, error = %message, "grpc endpoint selection failed");
    GrpcTraceBuilder::new(&secret.service, &secret.group)
        .with_chain_id_and_source(chain_id, GRPC_SOURCE)
        .with_request(headers, method)
        .with_response(0, codes::UNAVAILABLE, message)
        .build()
        .println();
}
