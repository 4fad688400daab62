//! JSON-RPC probe caller.

use super::CheckError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Builds the shared probe HTTP client.
///
/// Probes target arbitrary community endpoints, so the client carries its own
/// conservative timeouts instead of relying on an outer deadline.
///
/// # Errors
///
/// Returns [`CheckError::Transport`] if the underlying client fails to build.
pub fn probe_client() -> Result<Client, CheckError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .user_agent("chaingate-checker/0.2")
        .build()
        .map_err(|e| CheckError::Transport(e.to_string()))
}

/// POSTs a JSON-RPC payload and decodes the response body.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcCaller;

impl JsonRpcCaller {
    /// Issues the probe and decodes the body as a JSON object.
    ///
    /// A decoded body containing an `error` member is still returned so the
    /// caller can inspect it; only transport failures and non-200 statuses
    /// are errors at this layer.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Transport`] on network failure, a non-200 status
    /// or an undecodable body.
    pub async fn call(&self, cli: &Client, url: &str, payload: &str) -> Result<Value, CheckError> {
        let response = cli
            .post(url)
            .header("content-type", "application/json")
            .body(payload.to_owned())
            .send()
            .await
            .map_err(|e| {
                warn!(url = url, error = %e, "probe call failed");
                CheckError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(url = url, status = status.as_u16(), "probe returned unexpected status");
            return Err(CheckError::Transport(format!(
                "unexpected status code, url: {url}, code: {}",
                status.as_u16()
            )));
        }

        response.json::<Value>().await.map_err(|e| CheckError::Transport(e.to_string()))
    }
}

/// Probes a URL through the response cache.
///
/// Returns `None` when the probe fails or the decoded body carries a non-null
/// `error` member; such responses are not cached. Successful bodies are
/// installed with `ttl`.
pub(super) async fn cached_probe(
    caller: &JsonRpcCaller,
    cli: &Client,
    cache: &super::cache::ResponseCache,
    url: &str,
    payload: &str,
    ttl: Duration,
) -> Option<Value> {
    if let Some(hit) = cache.fetch(url, payload) {
        tracing::debug!(url = url, "probe cache hit");
        return Some(hit);
    }

    let value = match caller.call(cli, url, payload).await {
        Ok(value) => value,
        Err(e) => {
            warn!(url = url, error = %e, "probe failed");
            return None;
        }
    };
    if !value.is_object() {
        warn!(url = url, "probe body is not a json object");
        return None;
    }

    if let Some(error) = value.get("error") {
        if !error.is_null() {
            warn!(
                url = url,
                code = error.get("code").and_then(serde_json::Value::as_i64).unwrap_or_default(),
                message = error.get("message").and_then(serde_json::Value::as_str).unwrap_or_default(),
                "probe returned rpc error"
            );
            return None;
        }
    }

    cache.store(url, payload, value.clone(), ttl);
    Some(value)
}
