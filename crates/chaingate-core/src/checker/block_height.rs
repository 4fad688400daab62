//! `BlockHeight` strategy and the shared height evaluation machinery.
//!
//! Both height-based strategies (JSON-RPC and gRPC) differ only in how a
//! single URL's height is fetched; collection, maximum tracking and
//! tolerance evaluation are shared here. Per-chain maxima are kept in a
//! [`HeightTracker`] that only ever moves forward and is never evicted
//! (the chain set is finite).

use super::{
    cache::ResponseCache,
    caller::{cached_probe, JsonRpcCaller},
    extract::{extract_field, parse_height, NO_VALUE},
    CheckError, HealthCheckCondition, StrategyChecker, UrlValidity,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Monotone per-chain maximum of observed block heights.
#[derive(Default)]
pub struct HeightTracker {
    last: Mutex<HashMap<String, i64>>,
}

impl HeightTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the effective maximum for the chain: the larger of the
    /// observed round maximum and the stored value. The stored value is
    /// raised when the observation exceeds it.
    pub fn clamp_max(&self, chain_id: &str, observed: i64) -> i64 {
        let mut last = self.last.lock();
        match last.get(chain_id) {
            Some(&prev) if prev > observed => prev,
            _ => {
                last.insert(chain_id.to_owned(), observed);
                observed
            }
        }
    }

    #[must_use]
    pub fn last_known(&self, chain_id: &str) -> Option<i64> {
        self.last.lock().get(chain_id).copied()
    }
}

/// Outcome of fetching one URL's height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHeight {
    /// Listed in the condition's ignore set; valid without probing.
    Exempt,
    /// Probe or extraction failed; invalid.
    Failed,
    Value(i64),
}

/// Height source shared by the JSON-RPC and gRPC height strategies.
#[async_trait]
pub(super) trait HeightProbe: Send + Sync {
    async fn height(
        &self,
        url: &str,
        condition: &HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<ProbeHeight, CheckError>;
}

/// Shared condition validation for height strategies.
pub(super) fn validate_height_condition(
    condition: &mut HealthCheckCondition,
) -> Result<(), CheckError> {
    if condition.payload.is_empty() {
        return Err(CheckError::InvalidCondition("invalid or empty payload".to_string()));
    }
    condition.matchers.retain(|m| m.match_type == "<" || m.match_type == "<=");
    if condition.matchers.is_empty() {
        return Err(CheckError::InvalidCondition("invalid or empty matchers".to_string()));
    }
    Ok(())
}

/// Fans out height probes, tracks the chain maximum and applies the lag
/// tolerance from the condition's first matcher.
pub(super) async fn check_heights(
    probe: Arc<dyn HeightProbe>,
    tracker: &HeightTracker,
    chain_id: &str,
    urls: &[String],
    condition: &HealthCheckCondition,
    cache: &Arc<ResponseCache>,
) -> Result<UrlValidity, CheckError> {
    let matcher = condition.matchers[0].clone();
    let (tx, mut rx) = mpsc::channel(urls.len().max(1));

    let mut pending = 0usize;
    for url in urls {
        let tx = tx.clone();
        let probe = Arc::clone(&probe);
        let condition = condition.clone();
        let cache = Arc::clone(cache);
        let url = url.clone();
        pending += 1;
        tokio::spawn(async move {
            let height = probe.height(&url, &condition, &cache).await;
            let _ = tx.send((url, height)).await;
        });
    }
    drop(tx);

    let mut results = UrlValidity::with_capacity(urls.len());
    let mut height_map: HashMap<String, i64> = HashMap::new();
    for _ in 0..pending {
        let Some((url, height)) = rx.recv().await else { break };
        match height? {
            ProbeHeight::Exempt => {
                results.insert(url, true);
            }
            ProbeHeight::Failed => {
                results.insert(url, false);
            }
            ProbeHeight::Value(h) => {
                height_map.insert(url, h);
            }
        }
    }

    if height_map.is_empty() {
        return Ok(results);
    }

    let tolerance = parse_height(&matcher.value)
        .map_err(|e| CheckError::InvalidCondition(format!("bad tolerance: {e}")))?;
    let observed = height_map.values().copied().max().unwrap_or(0);
    let max = tracker.clamp_max(chain_id, observed);

    for (url, height) in height_map {
        let lag = max - height;
        let valid = match matcher.match_type.as_str() {
            "<" => lag < tolerance,
            "<=" => lag <= tolerance,
            _ => false,
        };
        if !valid {
            debug!(
                url = %url,
                max = max,
                height = height,
                match_type = %matcher.match_type,
                tolerance = tolerance,
                "block height lag exceeded"
            );
        }
        results.insert(url, valid);
    }
    Ok(results)
}

/// Probes heights over JSON-RPC; the matcher key locates the height field in
/// the response, decimal or `0x`-hex.
struct JsonRpcHeightProbe {
    caller: JsonRpcCaller,
    client: reqwest::Client,
    cache_ttl: Duration,
}

#[async_trait]
impl HeightProbe for JsonRpcHeightProbe {
    async fn height(
        &self,
        url: &str,
        condition: &HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<ProbeHeight, CheckError> {
        if condition.ignores(url) {
            return Ok(ProbeHeight::Exempt);
        }
        let Some(value) = cached_probe(
            &self.caller,
            &self.client,
            cache,
            url,
            &condition.payload,
            self.cache_ttl,
        )
        .await
        else {
            return Ok(ProbeHeight::Failed);
        };

        let extracted = extract_field(&value, &condition.matchers[0].key);
        if extracted.is_empty() || extracted == NO_VALUE {
            return Ok(ProbeHeight::Failed);
        }
        match parse_height(&extracted) {
            Ok(height) => Ok(ProbeHeight::Value(height)),
            Err(e) => {
                warn!(url = url, value = %extracted, error = %e, "height parse failed");
                Ok(ProbeHeight::Failed)
            }
        }
    }
}

/// `BlockHeight` strategy over JSON-RPC upstreams.
pub struct BlockHeightChecker {
    probe: Arc<JsonRpcHeightProbe>,
    tracker: HeightTracker,
}

impl BlockHeightChecker {
    #[must_use]
    pub fn new(client: reqwest::Client, cache_ttl: Duration) -> Self {
        Self {
            probe: Arc::new(JsonRpcHeightProbe { caller: JsonRpcCaller, client, cache_ttl }),
            tracker: HeightTracker::new(),
        }
    }

    #[must_use]
    pub fn last_known(&self, chain_id: &str) -> Option<i64> {
        self.tracker.last_known(chain_id)
    }
}

#[async_trait]
impl StrategyChecker for BlockHeightChecker {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckStrategy, Matcher};
    use serde_json::json;

    fn condition(match_type: &str, tolerance: &str) -> HealthCheckCondition {
        HealthCheckCondition {
            ignore: Vec::new(),
            check_strategy: CheckStrategy::BlockHeight,
            payload: r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#
                .to_string(),
            matchers: vec![Matcher {
                match_type: match_type.to_string(),
                key: "result".to_string(),
                value: tolerance.to_string(),
            }],
        }
    }

    fn checker() -> BlockHeightChecker {
        BlockHeightChecker::new(reqwest::Client::new(), Duration::from_secs(60))
    }

    fn seed(cache: &ResponseCache, url: &str, payload: &str, result: &str) {
        cache.store(url, payload, json!({"result": result}), Duration::from_secs(60));
    }

    #[test]
    fn test_tracker_monotone() {
        let tracker = HeightTracker::new();

        assert_eq!(tracker.clamp_max("1", 100), 100);
        assert_eq!(tracker.clamp_max("1", 90), 100, "lower observation must not win");
        assert_eq!(tracker.clamp_max("1", 120), 120);
        assert_eq!(tracker.last_known("1"), Some(120));
        assert_eq!(tracker.last_known("56"), None);
    }

    #[test]
    fn test_valid_condition_requires_payload() {
        let c = checker();
        let mut cond = condition("<=", "0x2");
        cond.payload = String::new();
        assert!(c.valid_condition(&mut cond).is_err());
    }

    #[tokio::test]
    async fn test_tolerance_le_both_valid() {
        // Heights 100 (0x64) and 98 (0x62), tolerance 2, "<=": both valid.
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition("<=", "0x2");
        seed(&cache, "http://h100", &cond.payload, "0x64");
        seed(&cache, "http://h98", &cond.payload, "0x62");

        let ret = c
            .check("1", &["http://h100".to_string(), "http://h98".to_string()], &cond, &cache)
            .await
            .unwrap();

        assert_eq!(ret.get("http://h100"), Some(&true));
        assert_eq!(ret.get("http://h98"), Some(&true));
    }

    #[tokio::test]
    async fn test_tolerance_lt_lagging_node_invalid() {
        // Same heights with "<": lag 2 is not < 2, so the 98 node fails.
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition("<", "0x2");
        seed(&cache, "http://h100", &cond.payload, "0x64");
        seed(&cache, "http://h98", &cond.payload, "0x62");

        let ret = c
            .check("1", &["http://h100".to_string(), "http://h98".to_string()], &cond, &cache)
            .await
            .unwrap();

        assert_eq!(ret.get("http://h100"), Some(&true));
        assert_eq!(ret.get("http://h98"), Some(&false));
    }

    #[tokio::test]
    async fn test_prior_round_maximum_dominates() {
        // The tracker already saw 20 for this chain; probes now return 10
        // and 8 with tolerance 12 and "<=": both lag from 20, both valid.
        let c = checker();
        c.tracker.clamp_max("9000", 20);
        let cache = Arc::new(ResponseCache::new());
        let cond = condition("<=", "12");
        seed(&cache, "http://h10", &cond.payload, "10");
        seed(&cache, "http://h8", &cond.payload, "8");

        let ret = c
            .check("9000", &["http://h10".to_string(), "http://h8".to_string()], &cond, &cache)
            .await
            .unwrap();

        assert_eq!(ret.get("http://h10"), Some(&true));
        assert_eq!(ret.get("http://h8"), Some(&true));
        assert_eq!(c.last_known("9000"), Some(20), "lower round must not regress the maximum");
    }

    #[tokio::test]
    async fn test_ignored_url_valid_without_probe() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let mut cond = condition("<=", "1");
        cond.ignore = vec!["http://ignored".to_string()];

        let ret = c.check("1", &["http://ignored".to_string()], &cond, &cache).await.unwrap();
        assert_eq!(ret.get("http://ignored"), Some(&true));
    }

    #[tokio::test]
    async fn test_unreachable_url_invalid() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition("<=", "1");

        let ret = c.check("1", &["http://127.0.0.1:1".to_string()], &cond, &cache).await.unwrap();
        assert_eq!(ret.get("http://127.0.0.1:1"), Some(&false));
    }

    #[tokio::test]
    async fn test_unparsable_height_invalid() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition("<=", "1");
        seed(&cache, "http://weird", &cond.payload, "not-a-number");

        let ret = c.check("1", &["http://weird".to_string()], &cond, &cache).await.unwrap();
        assert_eq!(ret.get("http://weird"), Some(&false));
    }
}
