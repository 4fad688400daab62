//! Upstream registry: reconciles published endpoint sets against the store.
//!
//! Reconciliation is per-source and not transactional; a partial failure is
//! surfaced to the caller, which retries on the next control-plane tick.

use crate::store::{GatewayStore, StoreError};
use crate::types::{Protocol, ReadyUpstream, Upstream};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Ready rows grouped by source, as produced by one check round.
pub type ReadyUpstreamGroup = HashMap<String, Vec<ReadyUpstream>>;

pub struct UpstreamRegistry {
    store: Arc<dyn GatewayStore>,
}

impl UpstreamRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self { store }
    }

    /// Reconciles the candidate set for one source.
    ///
    /// New entries are inserted, entries with changed `rpc` are updated, and
    /// stored entries absent from the published set are removed together
    /// with their ready counterpart. An empty published set clears the
    /// source entirely.
    ///
    /// # Errors
    ///
    /// Propagates the first [`StoreError`]; remaining entries are retried
    /// next tick.
    pub async fn register(&self, source: &str, upstreams: &[Upstream]) -> Result<(), StoreError> {
        let stored = self.store.list_upstreams_by_source(source).await?;

        if upstreams.is_empty() {
            for upstream in &stored {
                self.store
                    .delete_upstream(upstream.protocol, source, &upstream.chain_id)
                    .await?;
                self.store
                    .delete_ready_upstream(upstream.protocol, source, &upstream.chain_id)
                    .await?;
            }
            return Ok(());
        }

        let stored_by_chain: HashMap<&str, &Upstream> =
            stored.iter().map(|u| (u.chain_id.as_str(), u)).collect();
        let published_by_chain: HashMap<&str, &Upstream> =
            upstreams.iter().map(|u| (u.chain_id.as_str(), u)).collect();

        for upstream in upstreams {
            match stored_by_chain.get(upstream.chain_id.as_str()) {
                None => {
                    self.store.put_upstream(upstream.clone()).await?;
                    info!(chain_id = %upstream.chain_id, source = source, "registered new upstream");
                }
                Some(existing) if existing.rpc != upstream.rpc => {
                    self.store.put_upstream(upstream.clone()).await?;
                    info!(chain_id = %upstream.chain_id, source = source, "updated upstream rpc");
                }
                Some(_) => {}
            }
        }

        for upstream in &stored {
            if !published_by_chain.contains_key(upstream.chain_id.as_str()) {
                self.store
                    .delete_upstream(upstream.protocol, source, &upstream.chain_id)
                    .await?;
                self.store
                    .delete_ready_upstream(upstream.protocol, source, &upstream.chain_id)
                    .await?;
                info!(
                    chain_id = %upstream.chain_id,
                    source = source,
                    "removed upstream and ready counterpart"
                );
            }
        }
        Ok(())
    }

    /// Applies the per-source diff to the ready projection only.
    ///
    /// # Errors
    ///
    /// Propagates the first [`StoreError`].
    pub async fn refresh(&self, group: &ReadyUpstreamGroup) -> Result<(), StoreError> {
        for (source, ready_upstreams) in group {
            if ready_upstreams.is_empty() {
                continue;
            }
            let stored = self.store.list_ready_upstreams_by_source(source).await?;
            let stored_by_chain: HashMap<&str, &ReadyUpstream> =
                stored.iter().map(|u| (u.chain_id.as_str(), u)).collect();

            for ready in ready_upstreams {
                match stored_by_chain.get(ready.chain_id.as_str()) {
                    None => {
                        self.store.put_ready_upstream(ready.clone()).await?;
                        info!(chain_id = %ready.chain_id, source = %source, "new ready upstream");
                    }
                    Some(existing) if existing.rpc != ready.rpc => {
                        self.store.put_ready_upstream(ready.clone()).await?;
                        info!(chain_id = %ready.chain_id, source = %source, "refreshed ready upstream");
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Writes one ready row when it differs from the stored one.
    ///
    /// Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from lookup or write.
    pub async fn publish(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
        rpc: String,
    ) -> Result<bool, StoreError> {
        let stored = match self.store.get_ready_upstream(protocol, source, chain_id).await {
            Ok(existing) => Some(existing),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e),
        };
        if stored.as_ref().is_some_and(|existing| existing.rpc == rpc) {
            return Ok(false);
        }

        self.store
            .put_ready_upstream(ReadyUpstream {
                chain_id: chain_id.to_owned(),
                source: source.to_owned(),
                rpc,
                protocol,
                created_at: chrono::Utc::now().timestamp_millis(),
            })
            .await?;
        Ok(true)
    }
}
