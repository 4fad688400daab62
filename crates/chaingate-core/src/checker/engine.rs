//! Control-plane orchestrator: periodic check ticks over all rules.

use super::{cache::ResponseCache, CheckError, CheckRule, CheckerSet};
use crate::registry::UpstreamRegistry;
use crate::store::GatewayStore;
use crate::types::{unique_urls, Protocol, RpcList};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, time::interval};
use tracing::{error, info, warn};

/// Clears the in-progress flag even when a tick exits early.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs the health-check loop: every tick, probe all candidate pools against
/// their rules and publish the surviving URL sets as ready upstreams.
///
/// A tick that is still running when the next one fires is skipped; the
/// in-progress flag is cleared on exit even when the tick fails part-way.
pub struct HealthCheckEngine {
    store: Arc<dyn GatewayStore>,
    registry: Arc<UpstreamRegistry>,
    checkers: Arc<CheckerSet>,
    check_interval: Duration,
    in_progress: Arc<AtomicBool>,
}

impl HealthCheckEngine {
    /// # Errors
    ///
    /// Returns [`CheckError::Transport`] if the probe client cannot be built.
    pub fn new(
        store: Arc<dyn GatewayStore>,
        registry: Arc<UpstreamRegistry>,
        check_interval: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, CheckError> {
        Ok(Self {
            store,
            registry,
            checkers: Arc::new(CheckerSet::new(cache_ttl)?),
            check_interval,
            in_progress: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(engine.check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.run_tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health check engine shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Runs one check round. Public so rounds can be driven outside the
    /// schedule.
    pub async fn run_tick(&self) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            // A missed tick is acceptable; the next one fires in a minute.
            info!("previous check round still running, skipping tick");
            return;
        }
        let _guard = TickGuard { flag: Arc::clone(&self.in_progress) };

        if let Err(e) = self.check_round().await {
            error!(error = %e, "check round failed");
        }
    }

    async fn check_round(&self) -> Result<(), CheckError> {
        let candidates = self.candidate_pools().await?;
        let rule_groups = self.rules_by_source().await?;
        let cache = Arc::new(ResponseCache::new());

        for (source, rules) in rule_groups {
            for mut rule in rules {
                let Some(urls) = candidates.get(&(rule.protocol, rule.chain_id.clone())) else {
                    continue;
                };

                let results = match self
                    .checkers
                    .check_conditions(&rule.chain_id, urls.clone(), &mut rule.rules, &cache)
                    .await
                {
                    Ok(results) => results,
                    Err(e) => {
                        error!(
                            source = %source,
                            chain_id = %rule.chain_id,
                            error = %e,
                            "check rule failed"
                        );
                        continue;
                    }
                };

                let valid: Vec<String> = urls
                    .iter()
                    .filter(|u| results.get(*u).copied().unwrap_or(false))
                    .cloned()
                    .collect();

                match self
                    .registry
                    .publish(rule.protocol, &source, &rule.chain_id, RpcList::join(&valid))
                    .await
                {
                    Ok(true) => {
                        info!(
                            source = %source,
                            chain_id = %rule.chain_id,
                            count = valid.len(),
                            "published ready upstream set"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            source = %source,
                            chain_id = %rule.chain_id,
                            error = %e,
                            "ready upstream write failed, will retry next tick"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Candidate URL sets from `ready = false` rows, grouped by
    /// (protocol, chain) with duplicates dropped across sources.
    async fn candidate_pools(
        &self,
    ) -> Result<HashMap<(Protocol, String), Vec<String>>, CheckError> {
        let upstreams = self
            .store
            .list_upstreams(false)
            .await
            .map_err(|e| CheckError::Transport(e.to_string()))?;

        let mut pools: HashMap<(Protocol, String), Vec<String>> = HashMap::new();
        for upstream in upstreams {
            let urls = RpcList::from(upstream.rpc.as_str()).urls();
            pools
                .entry((upstream.protocol, upstream.chain_id))
                .or_default()
                .extend(urls);
        }
        for urls in pools.values_mut() {
            *urls = unique_urls(urls);
        }
        Ok(pools)
    }

    async fn rules_by_source(&self) -> Result<HashMap<String, Vec<CheckRule>>, CheckError> {
        let rules = self
            .store
            .list_check_rules()
            .await
            .map_err(|e| CheckError::Transport(e.to_string()))?;

        let mut groups: HashMap<String, Vec<CheckRule>> = HashMap::new();
        for rule in rules {
            if rule.disabled {
                continue;
            }
            groups.entry(rule.source.clone()).or_default().push(rule);
        }
        Ok(groups)
    }
}
