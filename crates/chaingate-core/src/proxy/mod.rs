//! JSON-RPC proxy engine.
//!
//! The HTTP layer (path parsing, auth, CORS) lives in the server crate; this
//! module implements the request pipeline behind it: route-rule resolution,
//! endpoint selection, fan-out with retry and trace emission.

pub mod forward;
pub mod routes;
pub mod select;
pub mod trace;

use crate::store::GatewayStore;
use crate::types::SecretKey;
use bytes::Bytes;
use forward::{fan_out, UpstreamReply};
use regex::Regex;
use routes::{apply_route_rules, load_route_rules};
use select::{is_paid_source, load_endpoints, select_targets};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use trace::TraceBuilder;

/// Version tag advertised on proxied responses.
pub const GATEWAY_VERSION: &str = "v2.1";

/// Client-visible proxy failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid access key")]
    Unauthorized,
    #[error("origin not allowed")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    NoUpstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status this error maps to at the boundary.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::BadRequest(_) | ProxyError::NoUpstream(_) => 400,
            ProxyError::Unauthorized => 401,
            ProxyError::Forbidden => 403,
            ProxyError::MethodNotAllowed => 405,
            ProxyError::Internal(_) => 500,
        }
    }
}

/// One authenticated POST request entering the pipeline.
pub struct ProxyRequest {
    pub chain_id: String,
    /// Source requested via `?source=`; may be overridden by route rules.
    pub source: String,
    /// Service label: `?service=` override or the tenant's default.
    pub service: String,
    pub secret: SecretKey,
    pub body: Bytes,
    pub headers: http::HeaderMap,
}

/// The reply the server layer writes back, plus the emitted trace status.
pub struct ProxyReply {
    pub upstream: UpstreamReply,
    /// Composite trace status; `"207"` marks a streamed large response.
    pub trace_status: String,
}

pub struct ProxyEngine {
    store: Arc<dyn GatewayStore>,
    client: reqwest::Client,
}

impl ProxyEngine {
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the forwarding client cannot be
    /// built.
    pub fn new(store: Arc<dyn GatewayStore>) -> Result<Self, ProxyError> {
        // No application-level timeout: long queries are bounded by the
        // deployment's CDN timeout, not by us.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        Ok(Self { store, client })
    }

    /// GET handler body: the redacted ready URL list for a chain.
    ///
    /// # Errors
    ///
    /// [`ProxyError::NoUpstream`] when the chain or requested source has no
    /// ready URLs; [`ProxyError::Internal`] on store failure.
    pub async fn list_endpoints(
        &self,
        chain_id: &str,
        source: &str,
    ) -> Result<Vec<String>, ProxyError> {
        let buckets = load_endpoints(&self.store, chain_id, source).await?;
        if buckets.is_empty() {
            return Err(ProxyError::NoUpstream(
                "chainId not support, no available nodes".to_string(),
            ));
        }

        let urls: Vec<&String> = if source.is_empty() {
            buckets.free.iter().chain(buckets.paid.iter()).collect()
        } else {
            let bucket = if is_paid_source(source) { &buckets.paid } else { &buckets.free };
            if bucket.is_empty() {
                return Err(ProxyError::NoUpstream(
                    "source not support, no available nodes".to_string(),
                ));
            }
            bucket.iter().collect()
        };

        Ok(urls.into_iter().map(|u| redact_endpoint(u)).collect())
    }

    /// POST handler body: the full route/select/fan-out pipeline.
    ///
    /// Emits exactly one trace line per request, also on failure paths.
    ///
    /// # Errors
    ///
    /// See [`ProxyError`] for the client-visible mapping.
    pub async fn handle_post(&self, request: ProxyRequest) -> Result<ProxyReply, ProxyError> {
        let start = Instant::now();
        let mut trace = TraceBuilder::new(&request.service, &request.secret.group);

        if let Err(e) = trace.with_request(&request.body, &request.headers) {
            return Err(ProxyError::BadRequest(format!("failed to parse request body: {e}")));
        }

        let rules = load_route_rules(&self.store, &request.secret).await?;
        let method = trace.method().to_string();
        let source = apply_route_rules(&rules, &method, &request.chain_id, &request.source);
        trace.with_chain_id_and_source(&request.chain_id, &source);

        let buckets = match load_endpoints(&self.store, &request.chain_id, &source).await {
            Ok(buckets) => buckets,
            Err(e) => {
                trace.with_error(e.status_code(), &e.to_string());
                trace.build().println();
                return Err(e);
            }
        };
        if buckets.is_empty() {
            let message = "chainId not support, no available nodes";
            trace.with_error(400, message);
            trace.build().println();
            return Err(ProxyError::NoUpstream(message.to_string()));
        }
        if !source.is_empty() {
            let bucket = if is_paid_source(&source) { &buckets.paid } else { &buckets.free };
            if bucket.is_empty() {
                let message = "source not support, no available nodes";
                trace.with_error(400, message);
                trace.build().println();
                return Err(ProxyError::NoUpstream(message.to_string()));
            }
        }

        let targets = match select_targets(&buckets, &method, &source, &mut trace) {
            Ok(targets) => targets,
            Err(e) => {
                trace.with_error(e.status_code(), &e.to_string());
                trace.build().println();
                return Err(e);
            }
        };

        let upstream = match fan_out(
            &self.client,
            &targets,
            &request.body,
            &request.headers,
            &mut trace,
            start,
        )
        .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                trace.with_error(e.status_code(), &e.to_string());
                trace.build().println();
                return Err(e);
            }
        };

        trace.with_version(GATEWAY_VERSION);
        let built = trace.build();
        let trace_status = built.status.clone();
        built.println();

        Ok(ProxyReply { upstream, trace_status })
    }
}

static KEY_SUFFIX_32: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*/([a-z0-9]{32})").expect("static redaction pattern"));
static KEY_SUFFIX_21: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*/([a-zA-Z-]{21})").expect("static redaction pattern"));

/// Strips API-key-looking path segments from an endpoint URL.
///
/// 32-char lowercase-alphanumeric and 21-char alpha-hyphen suffixes are
/// replaced by `REDACTED`, preserving the host. The leading `.*/` in the
/// patterns is greedy; on path-heavy URLs this matches the last candidate
/// segment, which is the historically observed behavior.
#[must_use]
pub fn redact_endpoint(url: &str) -> String {
    let mut redacted = url.to_string();
    for pattern in [&*KEY_SUFFIX_32, &*KEY_SUFFIX_21] {
        if let Some(captures) = pattern.captures(&redacted) {
            if let Some(group) = captures.get(1) {
                let secret = group.as_str().to_string();
                redacted = redacted.replacen(&secret, "REDACTED", 1);
            }
        }
    }
    redacted
}
