//! Upstream partitioning and selection policy for the JSON-RPC data plane.
//!
//! Ready rows for a chain are split into a `paid` bucket (any source whose
//! label contains `paid`) and a deduplicated `free` bucket. Selection then
//! depends on three orthogonal request flags: transaction-sending method,
//! paid mode (source contains `paid`) and MEV mode (source contains `mev`).

use super::trace::TraceBuilder;
use super::ProxyError;
use crate::store::GatewayStore;
use crate::types::{unique_urls, Protocol, RpcList};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::warn;

/// Transaction-submission methods that route through the paid/MEV policy.
pub const TX_METHODS: &[&str] =
    &["eth_sign", "eth_signTransaction", "eth_sendTransaction", "eth_sendRawTransaction"];

/// Number of distinct upstreams attempted for a query before giving up.
const QUERY_FANOUT: usize = 3;

#[must_use]
pub fn is_tx_method(method: &str) -> bool {
    TX_METHODS.contains(&method)
}

#[must_use]
pub fn is_paid_source(source: &str) -> bool {
    source.contains("paid")
}

#[must_use]
pub fn is_mev_source(source: &str) -> bool {
    source.contains("mev")
}

/// Paid/free partition of a chain's ready endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointBuckets {
    pub paid: Vec<String>,
    pub free: Vec<String>,
}

impl EndpointBuckets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paid.is_empty() && self.free.is_empty()
    }
}

/// Loads and partitions the ready endpoints for a chain.
///
/// Store reads are retried up to three times. Only `jsonrpc` rows
/// participate. When `source` names a specific non-paid source, the free
/// bucket is narrowed to that source's URLs.
///
/// # Errors
///
/// [`ProxyError::Internal`] when the store stays unreachable.
pub async fn load_endpoints(
    store: &Arc<dyn GatewayStore>,
    chain_id: &str,
    source: &str,
) -> Result<EndpointBuckets, ProxyError> {
    const ATTEMPTS: usize = 3;

    let mut last_err = None;
    let mut rows = None;
    for attempt in 0..ATTEMPTS {
        match store.list_ready_upstreams_by_chain_id(chain_id, None).await {
            Ok(found) => {
                rows = Some(found);
                break;
            }
            Err(e) => {
                warn!(chain_id = chain_id, attempt = attempt + 1, error = %e, "ready upstream lookup failed");
                last_err = Some(e);
            }
        }
    }
    let rows = match rows {
        Some(rows) => rows,
        None => {
            return Err(ProxyError::Internal(
                last_err.map(|e| e.to_string()).unwrap_or_else(|| "store unavailable".to_string()),
            ))
        }
    };

    let mut buckets = EndpointBuckets::default();
    let mut free_raw: Vec<String> = Vec::new();
    for row in rows.iter().filter(|r| r.protocol == Protocol::Jsonrpc) {
        if is_paid_source(&row.source) {
            buckets.paid.extend(RpcList::from(row.rpc.as_str()).urls());
        } else if source.is_empty() {
            free_raw.extend(RpcList::from(row.rpc.as_str()).urls());
        } else if row.source == source {
            free_raw.extend(RpcList::from(row.rpc.as_str()).urls());
        }
    }
    buckets.paid = unique_urls(&buckets.paid);
    buckets.free = unique_urls(&free_raw);
    Ok(buckets)
}

/// Applies the selection policy and records the routing mode on the trace.
///
/// Returns the ordered candidate list for the fan-out loop (already
/// randomized).
///
/// # Errors
///
/// [`ProxyError::NoUpstream`] when the required bucket is empty.
pub fn select_targets(
    buckets: &EndpointBuckets,
    method: &str,
    source: &str,
    trace: &mut TraceBuilder,
) -> Result<Vec<String>, ProxyError> {
    let mut rng = rand::thread_rng();
    let no_nodes =
        || ProxyError::NoUpstream("chainId or source not support, no available nodes".to_string());

    if is_tx_method(method) {
        // Transactions go to a single node; fanning a signed transaction out
        // would double-submit it.
        if is_mev_source(source) {
            trace.with_mode("mev_tx");
            let url = buckets.free.choose(&mut rng).ok_or_else(no_nodes)?;
            return Ok(vec![url.clone()]);
        }
        if let Some(url) = buckets.paid.choose(&mut rng) {
            trace.with_mode("paid_tx");
            return Ok(vec![url.clone()]);
        }
        trace.with_mode("free_tx");
        let url = buckets.free.choose(&mut rng).ok_or_else(no_nodes)?;
        return Ok(vec![url.clone()]);
    }

    if is_paid_source(source) {
        trace.with_mode("paid_query");
        let mut targets = buckets.paid.clone();
        targets.shuffle(&mut rng);
        targets.truncate(QUERY_FANOUT);
        if targets.is_empty() {
            return Err(ProxyError::NoUpstream(
                "source not support, no available nodes".to_string(),
            ));
        }
        return Ok(targets);
    }

    trace.with_mode("free_query");
    let mut targets = buckets.free.clone();
    targets.shuffle(&mut rng);
    targets.truncate(QUERY_FANOUT);
    if targets.is_empty() {
        return Err(no_nodes());
    }
    if !is_mev_source(source) {
        if let Some(url) = buckets.paid.choose(&mut rng) {
            targets.push(url.clone());
        }
    }
    Ok(targets)
}
