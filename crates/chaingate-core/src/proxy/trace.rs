//! Per-request structured trace records.
//!
//! One compact JSON line per request on stdout, for external log ingestion.
//! The builder accumulates fields as they are discovered along the request
//! path; emission never fails (encoding errors are swallowed, downstream
//! pipelines tolerate gaps).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Request-body shapes the trace layer needs to understand.
#[derive(Debug, Deserialize)]
struct JsonRpcRequestProbe {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponseProbe {
    #[serde(default)]
    error: Option<JsonRpcErrorProbe>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorProbe {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Trace-layer failures that map to client-visible 400/500 responses.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to parse request body: {0}")]
    BadRequestBody(String),
    #[error("empty request")]
    EmptyRequest,
    #[error("empty response")]
    EmptyResponse,
}

/// The JSON-RPC trace record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trace {
    pub protocol: String,
    pub id: String,
    pub method: String,
    #[serde(rename = "chainId")]
    pub chain_id: String,
    pub source: String,
    pub url: String,
    pub latency: i64,
    pub group: String,
    pub service: String,
    pub status: String,
    pub message: String,
    #[serde(rename = "visitorIp")]
    pub visitor_ip: String,
    pub origin: String,
    pub version: String,
    pub retries: u32,
    pub mode: String,
}

impl Trace {
    /// Emits the record as one JSON line on stdout. Never fails.
    pub fn println(&self) {
        if let Ok(line) = serde_json::to_string(self) {
            println!("{line}");
        }
    }
}

/// Mutable accumulator for [`Trace`].
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    trace: Trace,
}

impl TraceBuilder {
    #[must_use]
    pub fn new(service: &str, group: &str) -> Self {
        Self {
            trace: Trace {
                protocol: "jsonrpc".to_string(),
                service: service.to_string(),
                group: group.to_string(),
                ..Trace::default()
            },
        }
    }

    pub fn with_error(&mut self, code: u16, message: &str) {
        self.trace.status = code.to_string();
        self.trace.message = message.to_string();
    }

    pub fn with_version(&mut self, version: &str) {
        self.trace.version = version.to_string();
    }

    pub fn with_mode(&mut self, mode: &str) {
        self.trace.mode = mode.to_string();
    }

    pub fn with_upstream_node(&mut self, url: &str) {
        self.trace.url = url.to_string();
    }

    pub fn with_chain_id_and_source(&mut self, chain_id: &str, source: &str) {
        self.trace.chain_id = chain_id.to_string();
        self.trace.source = source.to_string();
    }

    pub fn increment_retries(&mut self) {
        self.trace.retries += 1;
    }

    /// Records a response over the 5 MiB streaming threshold.
    pub fn with_large_response(&mut self, latency_ms: i64) {
        self.trace.status = "207".to_string();
        self.trace.message = "Response entity too large".to_string();
        self.trace.latency = latency_ms;
    }

    /// Extracts ids, methods and caller identity from the request.
    ///
    /// Accepts a single JSON-RPC request object or a batch; ids and methods
    /// are `&`-joined. Numeric ids render without exponent, nulls as
    /// `"null"`.
    ///
    /// # Errors
    ///
    /// [`TraceError::BadRequestBody`] when the body is neither shape,
    /// [`TraceError::EmptyRequest`] for an empty batch.
    pub fn with_request(
        &mut self,
        body: &[u8],
        headers: &http::HeaderMap,
    ) -> Result<(), TraceError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| TraceError::BadRequestBody(e.to_string()))?;
        let requests: Vec<JsonRpcRequestProbe> = if payload.is_array() {
            serde_json::from_value(payload).map_err(|e| TraceError::BadRequestBody(e.to_string()))?
        } else {
            vec![serde_json::from_value(payload)
                .map_err(|e| TraceError::BadRequestBody(e.to_string()))?]
        };
        if requests.is_empty() {
            return Err(TraceError::EmptyRequest);
        }

        let mut ids = Vec::with_capacity(requests.len());
        let mut methods = Vec::with_capacity(requests.len());
        for request in &requests {
            methods.push(request.method.clone());
            ids.push(render_id(&request.id));
        }
        self.trace.id = ids.join("&");
        self.trace.method = methods.join("&");
        self.trace.visitor_ip = header_str(headers, "cf-connecting-ip");
        self.trace.origin = header_str(headers, "origin");
        Ok(())
    }

    /// Derives the composite status and message from an upstream response.
    ///
    /// Non-200 HTTP statuses carry the body text as message. For 200, single
    /// responses yield `"200"`/`"OK"` or the error code/message; batches
    /// `&`-join each element.
    ///
    /// # Errors
    ///
    /// [`TraceError::EmptyResponse`] for an empty batch body.
    pub fn with_response(
        &mut self,
        status_code: u16,
        body: &[u8],
        latency_ms: i64,
    ) -> Result<(), TraceError> {
        self.trace.latency = latency_ms;
        if status_code != 200 {
            self.trace.status = status_code.to_string();
            self.trace.message = String::from_utf8_lossy(body).into_owned();
            return Ok(());
        }

        let keep_raw_body = |trace: &mut Trace| {
            trace.status = status_code.to_string();
            trace.message = String::from_utf8_lossy(body).into_owned();
        };

        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            // Not JSON at all; keep the raw body.
            keep_raw_body(&mut self.trace);
            return Ok(());
        };
        let responses: Vec<JsonRpcResponseProbe> = if payload.is_array() {
            match serde_json::from_value::<Vec<JsonRpcResponseProbe>>(payload) {
                Ok(list) if list.is_empty() => return Err(TraceError::EmptyResponse),
                Ok(list) => list,
                Err(_) => {
                    keep_raw_body(&mut self.trace);
                    return Ok(());
                }
            }
        } else {
            match serde_json::from_value::<JsonRpcResponseProbe>(payload) {
                Ok(single) => vec![single],
                Err(_) => {
                    keep_raw_body(&mut self.trace);
                    return Ok(());
                }
            }
        };

        let mut statuses = Vec::with_capacity(responses.len());
        let mut messages = Vec::with_capacity(responses.len());
        for response in &responses {
            match &response.error {
                Some(error) => {
                    statuses.push(error.code.to_string());
                    messages.push(error.message.clone());
                }
                None => {
                    statuses.push("200".to_string());
                    messages.push("OK".to_string());
                }
            }
        }
        self.trace.status = statuses.join("&");
        self.trace.message = messages.join("&");
        Ok(())
    }

    /// Composite status of the last recorded response.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.trace.status
    }

    /// Resolved method string (set by [`with_request`](Self::with_request)).
    #[must_use]
    pub fn method(&self) -> &str {
        &self.trace.method
    }

    #[must_use]
    pub fn build(&self) -> Trace {
        self.trace.clone()
    }
}

/// The gRPC trace record: numeric status, no id/retries/mode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GrpcTrace {
    pub protocol: String,
    pub method: String,
    #[serde(rename = "chainId")]
    pub chain_id: String,
    pub source: String,
    pub url: String,
    pub latency: i64,
    pub group: String,
    pub service: String,
    pub status: u32,
    pub message: String,
    #[serde(rename = "visitorIp")]
    pub visitor_ip: String,
}

impl GrpcTrace {
    /// Emits the record as one JSON line on stdout. Never fails.
    pub fn println(&self) {
        if let Ok(line) = serde_json::to_string(self) {
            println!("{line}");
        }
    }
}

/// Mutable accumulator for [`GrpcTrace`].
#[derive(Debug, Clone)]
pub struct GrpcTraceBuilder {
    trace: GrpcTrace,
}

impl GrpcTraceBuilder {
    #[must_use]
    pub fn new(service: &str, group: &str) -> Self {
        Self {
            trace: GrpcTrace {
                protocol: "grpc".to_string(),
                service: service.to_string(),
                group: group.to_string(),
                ..GrpcTrace::default()
            },
        }
    }

    #[must_use]
    pub fn with_chain_id_and_source(mut self, chain_id: &str, source: &str) -> Self {
        self.trace.chain_id = chain_id.to_string();
        self.trace.source = source.to_string();
        self
    }

    #[must_use]
    pub fn with_upstream_node(mut self, url: &str) -> Self {
        self.trace.url = url.to_string();
        self
    }

    /// Records the method and visitor IP (`x-forwarded-for`, falling back to
    /// `x-real-ip`).
    #[must_use]
    pub fn with_request(mut self, headers: &http::HeaderMap, method: &str) -> Self {
        self.trace.method = method.to_string();
        let forwarded = header_str(headers, "x-forwarded-for");
        self.trace.visitor_ip =
            if forwarded.is_empty() { header_str(headers, "x-real-ip") } else { forwarded };
        self
    }

    #[must_use]
    pub fn with_response(mut self, latency_ms: i64, code: u32, message: &str) -> Self {
        self.trace.status = code;
        self.trace.message = message.to_string();
        self.trace.latency = latency_ms;
        self
    }

    #[must_use]
    pub fn build(self) -> GrpcTrace {
        self.trace
    }
}

fn header_str(headers: &http::HeaderMap, name: &str) -> String {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

fn render_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format!("{:.0}", n.as_f64().unwrap_or_default())
            }
        }
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
