//! `Simple` strategy: a URL is valid when the probe returns 200 and the body
//! decodes without an `error` member. No matchers.

use super::{
    cache::ResponseCache,
    caller::{cached_probe, JsonRpcCaller},
    CheckError, HealthCheckCondition, StrategyChecker, UrlValidity,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

pub struct SimpleChecker {
    caller: JsonRpcCaller,
    client: reqwest::Client,
    cache_ttl: Duration,
}

impl SimpleChecker {
    #[must_use]
    pub fn new(client: reqwest::Client, cache_ttl: Duration) -> Self {
        Self { caller: JsonRpcCaller, client, cache_ttl }
    }
}

#[async_trait]
impl StrategyChecker for SimpleChecker {
    fn valid_condition(&self, condition: &mut HealthCheckCondition) -> Result<(), CheckError> {
        if condition.payload.is_empty() {
            return Err(CheckError::InvalidCondition("invalid or empty payload".to_string()));
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
            let payload = condition.payload.clone();
            let cache = Arc::clone(cache);
            let url = url.clone();
            pending += 1;
            tokio::spawn(async move {
                let valid =
                    cached_probe(&caller, &client, &cache, &url, &payload, cache_ttl).await.is_some();
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
