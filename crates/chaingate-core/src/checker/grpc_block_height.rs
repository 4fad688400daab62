//! `GrpcBlockHeight` strategy: heights fetched via dynamic gRPC invocation.
//!
//! The condition payload is `{"protoset", "service", "method"}`; the matcher
//! key is `field_path` or `field_path|regex`, where the regex's first capture
//! group extracts the height from the rendered field. Heights feed the same
//! max-tracking and tolerance evaluation as the JSON-RPC strategy.

use super::{
    block_height::{check_heights, validate_height_condition, HeightProbe, HeightTracker, ProbeHeight},
    cache::ResponseCache,
    extract::{extract_field, parse_height, NO_VALUE},
    grpc_caller::{GrpcCaller, GrpcProbeTarget},
    CheckError, HealthCheckCondition, StrategyChecker, UrlValidity,
};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

struct GrpcHeightProbe {
    caller: GrpcCaller,
}

impl GrpcHeightProbe {
    fn extract_height(value: &serde_json::Value, key: &str) -> Result<ProbeHeight, CheckError> {
        let (path, pattern) = match key.split_once('|') {
            Some((path, pattern)) => (path, Some(pattern)),
            None => (key, None),
        };

        let mut extracted = extract_field(value, path);
        if extracted.is_empty() || extracted == NO_VALUE {
            return Ok(ProbeHeight::Failed);
        }

        if let Some(pattern) = pattern {
            let re = Regex::new(pattern)
                .map_err(|e| CheckError::InvalidCondition(format!("bad key regex: {e}")))?;
            let Some(captures) = re.captures(&extracted) else {
                return Ok(ProbeHeight::Failed);
            };
            let Some(group) = captures.get(1) else {
                return Ok(ProbeHeight::Failed);
            };
            extracted = group.as_str().to_string();
        }

        match parse_height(&extracted) {
            Ok(height) => Ok(ProbeHeight::Value(height)),
            Err(e) => {
                warn!(value = %extracted, error = %e, "grpc height parse failed");
                Ok(ProbeHeight::Failed)
            }
        }
    }
}

#[async_trait]
impl HeightProbe for GrpcHeightProbe {
    async fn height(
        &self,
        url: &str,
        condition: &HealthCheckCondition,
        _cache: &Arc<ResponseCache>,
    ) -> Result<ProbeHeight, CheckError> {
        if condition.ignores(url) {
            return Ok(ProbeHeight::Exempt);
        }
        let target: GrpcProbeTarget = serde_json::from_str(&condition.payload)
            .map_err(|e| CheckError::InvalidCondition(format!("bad grpc payload: {e}")))?;

        let value = match self.caller.call(url, &target).await {
            Ok(value) => value,
            Err(CheckError::InvalidCondition(e)) => {
                return Err(CheckError::InvalidCondition(e));
            }
            Err(e) => {
                warn!(url = url, error = %e, "grpc probe failed");
                return Ok(ProbeHeight::Failed);
            }
        };

        Self::extract_height(&value, &condition.matchers[0].key)
    }
}

/// `GrpcBlockHeight` strategy. Owns its own [`HeightTracker`]; gRPC and
/// JSON-RPC pools for the same chain are tracked independently.
pub struct GrpcBlockHeightChecker {
    probe: Arc<GrpcHeightProbe>,
    tracker: HeightTracker,
}

impl Default for GrpcBlockHeightChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl GrpcBlockHeightChecker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe: Arc::new(GrpcHeightProbe { caller: GrpcCaller }),
            tracker: HeightTracker::new(),
        }
    }
}

#[async_trait]
impl StrategyChecker for GrpcBlockHeightChecker {
    fn valid_condition(&self, condition: &mut HealthCheckCondition) -> Result<(), CheckError> {
        validate_height_condition(condition)
    }

    async fn check(
        &self,
        chain_id: &str,
        urls: &[String],
        condition: &HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError> {
        check_heights(
            Arc::clone(&self.probe) as Arc<dyn HeightProbe>,
            &self.tracker,
            chain_id,
            urls,
            condition,
            cache,
        )
        .await
    }
}
