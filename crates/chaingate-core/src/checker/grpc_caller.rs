//! Dynamic gRPC probe caller.
//!
//! Probes gRPC nodes without generated stubs: the condition payload names a
//! file-descriptor-set on disk plus a service and method; a zero-valued
//! request message of the declared input type is sent as a unary call and the
//! reply is rendered to canonical JSON for the same path-based extraction the
//! JSON-RPC checkers use.

use super::CheckError;
use crate::grpc::channel::GrpcChannel;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const CALL_ATTEMPTS: u32 = 3;
const CALL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Payload of a `GrpcBlockHeight` condition.
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcProbeTarget {
    pub protoset: String,
    pub service: String,
    pub method: String,
}

/// Invokes dynamic unary gRPC methods described by a protoset file.
#[derive(Debug, Clone, Default)]
pub struct GrpcCaller;

impl GrpcCaller {
    /// Calls `<package>.<service>/<method>` on `url` with a zero-valued
    /// request and returns the reply as a JSON tree.
    ///
    /// Retries up to three attempts with a 500 ms delay. TLS is selected when
    /// the target authority carries `:443`.
    ///
    /// # Errors
    ///
    /// [`CheckError::InvalidCondition`] when the protoset does not contain
    /// the requested service or method; [`CheckError::Transport`] for call
    /// failures after all attempts.
    pub async fn call(&self, url: &str, target: &GrpcProbeTarget) -> Result<Value, CheckError> {
        let descriptor_bytes = std::fs::read(&target.protoset)
            .map_err(|e| CheckError::InvalidCondition(format!("protoset read failed: {e}")))?;
        let pool = DescriptorPool::decode(descriptor_bytes.as_slice())
            .map_err(|e| CheckError::InvalidCondition(format!("protoset decode failed: {e}")))?;

        let service = pool
            .services()
            .find(|s| s.name() == target.service)
            .ok_or_else(|| {
                CheckError::InvalidCondition(format!("service {} not in protoset", target.service))
            })?;
        let method = service
            .methods()
            .find(|m| m.name() == target.method)
            .ok_or_else(|| {
                CheckError::InvalidCondition(format!(
                    "method {} not on service {}",
                    target.method,
                    service.full_name()
                ))
            })?;

        let request = DynamicMessage::new(method.input());
        let request_bytes = request.encode_to_vec();
        let path = format!("/{}/{}", service.full_name(), method.name());

        let channel = GrpcChannel::connect(url)
            .map_err(|e| CheckError::Transport(e.to_string()))?;

        let mut last_err = CheckError::Transport("no attempts made".to_string());
        for attempt in 0..CALL_ATTEMPTS {
            if attempt != 0 {
                tokio::time::sleep(CALL_RETRY_DELAY).await;
            }
            match channel.unary(&path, &request_bytes).await {
                Ok(reply_bytes) => {
                    let reply = DynamicMessage::decode(method.output(), reply_bytes)
                        .map_err(|e| CheckError::Transport(format!("reply decode failed: {e}")))?;
                    return serde_json::to_value(&reply)
                        .map_err(|e| CheckError::Transport(format!("reply render failed: {e}")));
                }
                Err(e) => {
                    warn!(url = url, attempt = attempt + 1, error = %e, "grpc probe attempt failed");
                    last_err = CheckError::Transport(e.to_string());
                }
            }
        }
        Err(last_err)
    }
}
