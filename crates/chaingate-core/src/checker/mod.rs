//! Health-check engine: strategy checkers, factory and condition chaining.
//!
//! A check rule carries an ordered list of [`HealthCheckCondition`]s. Each
//! condition names a strategy; the [`CheckerSet`] dispatches to a lazily
//! created per-strategy singleton so strategy-local state (probe cache hits,
//! last observed block heights) survives across chains within a round.
//!
//! Conditions short-circuit: a URL marked invalid by one condition is removed
//! from the working set before the next condition runs, and later conditions
//! can only further invalidate.

pub mod cache;
pub mod caller;
mod engine;
pub mod extract;
pub mod grpc_caller;

mod block_height;
mod grpc_block_height;
mod manual;
mod simple;
mod value_match;

pub use block_height::{BlockHeightChecker, HeightTracker};
pub use engine::HealthCheckEngine;
pub use grpc_block_height::GrpcBlockHeightChecker;
pub use manual::ManualChecker;
pub use simple::SimpleChecker;
pub use value_match::ValueMatchChecker;

use crate::types::Protocol;
use async_trait::async_trait;
use cache::ResponseCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;

/// Per-URL validity map produced by a check.
pub type UrlValidity = HashMap<String, bool>;

/// Errors from condition validation and check execution.
///
/// Per-URL probe failures are never errors; they mark the URL invalid.
/// Errors here abort the current rule only (the orchestrator proceeds with
/// the next rule).
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Probe strategy named by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckStrategy {
    ValueMatch,
    BlockHeight,
    GrpcBlockHeight,
    Simple,
    Manual,
}

/// A single matcher inside a condition; `match_type` semantics vary by
/// strategy (`=`/`!=` for value and URL matching, `<`/`<=` for height lag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    #[serde(rename = "matchType")]
    pub match_type: String,
    #[serde(default)]
    pub key: String,
    pub value: String,
}

/// One probe condition of a check rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckCondition {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(rename = "checkStrategy")]
    pub check_strategy: CheckStrategy,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub matchers: Vec<Matcher>,
}

impl HealthCheckCondition {
    /// True when `url` is listed as exempt from probing.
    #[must_use]
    pub fn ignores(&self, url: &str) -> bool {
        self.ignore.iter().any(|u| u == url)
    }
}

/// Health-check rule: ordered conditions for one (source, chain, protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRule {
    pub chain_id: String,
    pub source: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub rules: Vec<HealthCheckCondition>,
    #[serde(default)]
    pub disabled: bool,
}

/// A strategy implementation: validates conditions and probes URL sets.
#[async_trait]
pub trait StrategyChecker: Send + Sync {
    /// Normalizes and validates a condition for this strategy, filtering out
    /// matchers with foreign match types.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvalidCondition`] for unusable conditions.
    fn valid_condition(&self, condition: &mut HealthCheckCondition) -> Result<(), CheckError>;

    /// Decides per-URL validity for one condition.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError`] only for rule-level failures (bad tolerance,
    /// bad regex, unparsable payload); individual probe failures mark the
    /// URL `false` instead.
    async fn check(
        &self,
        chain_id: &str,
        urls: &[String],
        condition: &HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError>;
}

/// Lazily constructed per-strategy checker singletons.
///
/// Re-used across chains within a round so the block-height checkers keep
/// their `last known height` maps and the probe client its connection pool.
pub struct CheckerSet {
    checkers: RwLock<HashMap<CheckStrategy, Arc<dyn StrategyChecker>>>,
    client: reqwest::Client,
    cache_ttl: Duration,
}

impl CheckerSet {
    /// Creates a checker set with the shared probe client.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Transport`] when the probe client cannot be
    /// built.
    pub fn new(cache_ttl: Duration) -> Result<Self, CheckError> {
        Ok(Self { checkers: RwLock::new(HashMap::new()), client: caller::probe_client()?, cache_ttl })
    }

    fn checker_for(&self, strategy: CheckStrategy) -> Arc<dyn StrategyChecker> {
        {
            let checkers = self.checkers.read();
            if let Some(existing) = checkers.get(&strategy) {
                return Arc::clone(existing);
            }
        }

        let mut checkers = self.checkers.write();
        if let Some(existing) = checkers.get(&strategy) {
            return Arc::clone(existing);
        }
        let created: Arc<dyn StrategyChecker> = match strategy {
            CheckStrategy::ValueMatch => {
                Arc::new(ValueMatchChecker::new(self.client.clone(), self.cache_ttl))
            }
            CheckStrategy::BlockHeight => {
                Arc::new(BlockHeightChecker::new(self.client.clone(), self.cache_ttl))
            }
            CheckStrategy::Simple => {
                Arc::new(SimpleChecker::new(self.client.clone(), self.cache_ttl))
            }
            CheckStrategy::Manual => Arc::new(ManualChecker),
            CheckStrategy::GrpcBlockHeight => Arc::new(GrpcBlockHeightChecker::new()),
        };
        checkers.insert(strategy, Arc::clone(&created));
        created
    }

    /// Validates the condition, then runs its strategy over `urls`.
    ///
    /// # Errors
    ///
    /// Propagates [`CheckError`] from validation or rule-level check
    /// failures.
    pub async fn check(
        &self,
        chain_id: &str,
        urls: &[String],
        condition: &mut HealthCheckCondition,
        cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError> {
        if urls.is_empty() {
            return Ok(UrlValidity::new());
        }
        let checker = self.checker_for(condition.check_strategy);
        checker.valid_condition(condition)?;
        checker.check(chain_id, urls, condition, cache).await
    }

    /// Runs a condition chain with short-circuit narrowing.
    ///
    /// The working set starts as the full URL list; after each condition the
    /// URLs marked invalid are removed before the next condition runs. Each
    /// condition's results are merged into the final map.
    ///
    /// # Errors
    ///
    /// Propagates the first [`CheckError`] from any condition.
    pub async fn check_conditions(
        &self,
        chain_id: &str,
        urls: Vec<String>,
        conditions: &mut [HealthCheckCondition],
        cache: &Arc<ResponseCache>,
    ) -> Result<UrlValidity, CheckError> {
        let mut results = UrlValidity::new();
        let mut working = urls;
        for condition in conditions.iter_mut() {
            working.retain(|u| results.get(u).copied().unwrap_or(true));
            let current = self.check(chain_id, &working, condition, cache).await?;
            results.extend(current);
        }
        Ok(results)
    }
}
