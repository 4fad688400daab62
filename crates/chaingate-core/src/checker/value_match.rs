//! `ValueMatch` strategy: probe each URL and compare extracted fields.

use super::{
    cache::ResponseCache,
    caller::{cached_probe, JsonRpcCaller},
    extract::extract_field,
    CheckError, HealthCheckCondition, StrategyChecker, UrlValidity,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::debug;

/// Probes each URL with the condition payload and requires every matcher to
/// pass (`=` compares the extracted field with the matcher value, `!=`
/// inverts). Any transport or decode failure marks the URL invalid without
/// failing the whole check.
pub struct ValueMatchChecker {
    caller: JsonRpcCaller,
    client: reqwest::Client,
    cache_ttl: Duration,
}

impl ValueMatchChecker {
    #[must_use]
    pub fn new(client: reqwest::Client, cache_ttl: Duration) -> Self {
        Self { caller: JsonRpcCaller, client, cache_ttl }
    }
}

async fn check_url(
    caller: &JsonRpcCaller,
    client: &reqwest::Client,
    url: &str,
    condition: &HealthCheckCondition,
    cache: &ResponseCache,
    cache_ttl: Duration,
) -> bool {
    let Some(value) = cached_probe(caller, client, cache, url, &condition.payload, cache_ttl).await
    else {
        return false;
    };

    for matcher in &condition.matchers {
        let extracted = extract_field(&value, &matcher.key);
        let mut valid = extracted == matcher.value;
        if matcher.match_type == "!=" {
            valid = !valid;
        }
        if !valid {
            debug!(
                url = url,
                extracted = %extracted,
                match_type = %matcher.match_type,
                expected = %matcher.value,
                "value match failed"
            );
            return false;
        }
    }
    true
}

#[async_trait]
impl StrategyChecker for ValueMatchChecker {
    fn valid_condition(&self, condition: &mut HealthCheckCondition) -> Result<(), CheckError> {
        condition.matchers.retain(|m| m.match_type == "=" || m.match_type == "!=");
        if condition.matchers.is_empty() {
            return Err(CheckError::InvalidCondition("invalid or empty matchers".to_string()));
        }
        Ok(())
    }

    async fn check(
        &self,
        _chain_id: &str,
        urls: &[String],
        condition: &HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError> {
        let (tx, mut rx) = mpsc::channel(urls.len().max(1));

        let mut pending = 0usize;
        let mut results = UrlValidity::with_capacity(urls.len());
        for url in urls {
            if condition.ignores(url) {
                results.insert(url.clone(), true);
                continue;
            }
            let tx = tx.clone();
            let caller = self.caller.clone();
            let client = self.client.clone();
            let cache_ttl = self.cache_ttl;
            let condition = condition.clone();
            let cache = Arc::clone(cache);
            let url = url.clone();
            pending += 1;
            tokio::spawn(async move {
                let valid =
                    check_url(&caller, &client, &url, &condition, &cache, cache_ttl).await;
                let _ = tx.send((url, valid)).await;
            });
        }
        drop(tx);

        for _ in 0..pending {
            if let Some((url, valid)) = rx.recv().await {
                results.insert(url, valid);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckStrategy, Matcher};

    fn checker() -> ValueMatchChecker {
        ValueMatchChecker::new(reqwest::Client::new(), Duration::from_secs(60))
    }

    fn condition(matchers: Vec<Matcher>, ignore: Vec<String>) -> HealthCheckCondition {
        HealthCheckCondition {
            ignore,
            check_strategy: CheckStrategy::ValueMatch,
            payload: r#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#.to_string(),
            matchers,
        }
    }

    fn eq_matcher(key: &str, value: &str) -> Matcher {
        Matcher { match_type: "=".to_string(), key: key.to_string(), value: value.to_string() }
    }

    #[test]
    fn test_valid_condition_filters_matchers() {
        let c = checker();
        let mut cond = condition(
            vec![
                eq_matcher("result", "0x1"),
                Matcher {
                    match_type: "<".to_string(),
                    key: "result".to_string(),
                    value: "2".to_string(),
                },
            ],
            Vec::new(),
        );

        c.valid_condition(&mut cond).unwrap();
        assert_eq!(cond.matchers.len(), 1, "foreign match types must be dropped");
    }

    #[test]
    fn test_valid_condition_empty_after_filter_is_error() {
        let c = checker();
        let mut cond = condition(
            vec![Matcher {
                match_type: "<".to_string(),
                key: "result".to_string(),
                value: "2".to_string(),
            }],
            Vec::new(),
        );

        assert!(c.valid_condition(&mut cond).is_err());
    }

    #[tokio::test]
    async fn test_ignore_wins_over_probe_failure() {
        // "http://a" never gets probed; the unreachable peer comes back false.
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition(
            vec![eq_matcher("result", "0x1")],
            vec!["http://a".to_string()],
        );
        let urls = vec!["http://a".to_string(), "http://127.0.0.1:1".to_string()];

        let ret = c.check("1", &urls, &cond, &cache).await.unwrap();

        assert_eq!(ret.get("http://a"), Some(&true));
        assert_eq!(ret.get("http://127.0.0.1:1"), Some(&false));
    }

    #[tokio::test]
    async fn test_matchers_evaluate_against_cached_response() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition(vec![eq_matcher("result", "0x38")], Vec::new());
        cache.store(
            "http://bsc.example",
            &cond.payload,
            serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x38"}),
            Duration::from_secs(60),
        );

        let ret = c
            .check("56", &["http://bsc.example".to_string()], &cond, &cache)
            .await
            .unwrap();
        assert_eq!(ret.get("http://bsc.example"), Some(&true));
    }

    #[tokio::test]
    async fn test_not_equal_inverts() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition(
            vec![Matcher {
                match_type: "!=".to_string(),
                key: "result".to_string(),
                value: "0x38".to_string(),
            }],
            Vec::new(),
        );
        cache.store(
            "http://bsc.example",
            &cond.payload,
            serde_json::json!({"result": "0x38"}),
            Duration::from_secs(60),
        );

        let ret = c
            .check("56", &["http://bsc.example".to_string()], &cond, &cache)
            .await
            .unwrap();
        assert_eq!(ret.get("http://bsc.example"), Some(&false));
    }

    #[tokio::test]
    async fn test_all_matchers_must_pass() {
        let c = checker();
        let cache = Arc::new(ResponseCache::new());
        let cond = condition(
            vec![eq_matcher("result", "0x38"), eq_matcher("jsonrpc", "2.0")],
            Vec::new(),
        );
        cache.store(
            "http://bsc.example",
            &cond.payload,
            serde_json::json!({"jsonrpc": "1.0", "result": "0x38"}),
            Duration::from_secs(60),
        );

        let ret = c
            .check("56", &["http://bsc.example".to_string()], &cond, &cache)
            .await
            .unwrap();
        assert_eq!(ret.get("http://bsc.example"), Some(&false));
    }
}
