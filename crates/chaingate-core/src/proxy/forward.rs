//! Fan-out forwarding with retry classification.
//!
//! Candidate URLs are attempted in order (the list arrives pre-randomized).
//! An attempt is terminal when its composite trace status is `200`,
//! `200&200` or `3`; every other response is retryable until the list is
//! exhausted, at which point the last response is forwarded as-is. Responses
//! above the streaming threshold bypass buffering entirely.

use super::trace::{TraceBuilder, TraceError};
use super::ProxyError;
use bytes::Bytes;
use http::HeaderMap;
use std::time::Instant;
use tracing::warn;

/// Responses larger than this stream straight through to the client.
pub const LARGE_RESPONSE_BYTES: u64 = 5 * 1024 * 1024;

/// Composite statuses that finish the fan-out loop.
const TERMINAL_STATUSES: &[&str] = &["200", "200&200", "3"];

/// Body of a forwarded upstream reply.
pub enum UpstreamBody {
    Buffered(Bytes),
    /// Over-threshold reply; the caller streams it to the client.
    Stream(reqwest::Response),
}

/// One upstream reply, ready to be written to the client.
pub struct UpstreamReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

fn clean_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut cleaned = headers.clone();
    for name in [
        http::header::HOST,
        http::header::CONTENT_LENGTH,
        http::header::CONNECTION,
        http::header::TRANSFER_ENCODING,
        http::header::TE,
        http::header::UPGRADE,
    ] {
        cleaned.remove(name);
    }
    cleaned
}

/// Attempts each target in order, recording retries and per-attempt results
/// on the trace.
///
/// Returns the terminal reply, or the last retryable reply when the list is
/// exhausted.
///
/// # Errors
///
/// [`ProxyError::Internal`] when the final attempt produced no response
/// object at all (transport failure) or an empty batch body.
pub async fn fan_out(
    client: &reqwest::Client,
    targets: &[String],
    body: &Bytes,
    headers: &HeaderMap,
    trace: &mut TraceBuilder,
    start: Instant,
) -> Result<UpstreamReply, ProxyError> {
    let request_headers = clean_request_headers(headers);
    let mut last_reply: Option<UpstreamReply> = None;

    for (attempt, url) in targets.iter().enumerate() {
        if attempt != 0 {
            trace.increment_retries();
        }
        trace.with_upstream_node(url);

        let response = match client
            .post(url)
            .headers(request_headers.clone())
            .body(body.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "upstream attempt failed");
                last_reply = None;
                if attempt + 1 == targets.len() {
                    return Err(ProxyError::Internal(e.to_string()));
                }
                continue;
            }
        };

        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as i64;

        if response.content_length().unwrap_or(0) > LARGE_RESPONSE_BYTES {
            trace.with_large_response(latency_ms);
            return Ok(UpstreamReply {
                status: response.status().as_u16(),
                headers: response.headers().clone(),
                body: UpstreamBody::Stream(response),
            });
        }

        let status = response.status().as_u16();
        let reply_headers = response.headers().clone();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %url, error = %e, "upstream body read failed");
                last_reply = None;
                if attempt + 1 == targets.len() {
                    return Err(ProxyError::Internal(e.to_string()));
                }
                continue;
            }
        };

        match trace.with_response(status, &bytes, latency_ms) {
            Ok(()) => {}
            Err(TraceError::EmptyResponse) => {
                return Err(ProxyError::Internal("empty response".to_string()));
            }
            Err(e) => return Err(ProxyError::Internal(e.to_string())),
        }

        let reply =
            UpstreamReply { status, headers: reply_headers, body: UpstreamBody::Buffered(bytes) };
        if TERMINAL_STATUSES.contains(&trace.status()) {
            return Ok(reply);
        }
        last_reply = Some(reply);
    }

    last_reply.ok_or_else(|| ProxyError::Internal("no upstream response".to_string()))
}
