//! Per-chain upstream connection pools with hot-swap refresh.

use super::channel::{ChannelError, GrpcChannel};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info};

/// Grace period before connections removed by a refresh are dropped, so
/// in-flight streams can drain.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

struct PoolState {
    rpc: Vec<String>,
    channels: HashMap<String, Arc<GrpcChannel>>,
}

/// Endpoint pool for one chain: parallel URL list, URL -> live channel map
/// and a monotonically advancing round-robin counter.
pub struct GrpcUpstream {
    chain_id: String,
    state: RwLock<PoolState>,
    next: AtomicU32,
}

impl GrpcUpstream {
    #[must_use]
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            state: RwLock::new(PoolState { rpc: Vec::new(), channels: HashMap::new() }),
            next: AtomicU32::new(0),
        }
    }

    /// Round-robin selection over the current endpoint list.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidTarget`] when the pool is empty or the chosen
    /// URL has no live channel.
    pub fn select(&self) -> Result<Arc<GrpcChannel>, ChannelError> {
        let state = self.state.read();
        if state.rpc.is_empty() {
            return Err(ChannelError::InvalidTarget("zero endpoints".to_string()));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % state.rpc.len();
        let url = &state.rpc[idx];
        state
            .channels
            .get(url)
            .cloned()
            .ok_or_else(|| ChannelError::InvalidTarget(format!("no client for url: {url}")))
    }

    /// Reconciles the pool against a freshly read endpoint list.
    ///
    /// New URLs get freshly opened channels; URLs that disappeared are
    /// dropped after [`CLOSE_GRACE`]; the list is swapped atomically under
    /// the pool's write lock. A channel that fails to open aborts the whole
    /// refresh, keeping the previous pool intact.
    pub fn refresh(self: &Arc<Self>, rpc: Vec<String>) {
        let (to_add, to_remove) = {
            let state = self.state.read();
            let to_add: Vec<String> =
                rpc.iter().filter(|u| !state.channels.contains_key(*u)).cloned().collect();
            let to_remove: Vec<String> =
                state.rpc.iter().filter(|u| !rpc.contains(u)).cloned().collect();
            (to_add, to_remove)
        };

        let mut opened = HashMap::with_capacity(to_add.len());
        for url in &to_add {
            match GrpcChannel::connect(url) {
                Ok(channel) => {
                    opened.insert(url.clone(), Arc::new(channel));
                }
                Err(e) => {
                    error!(chain_id = %self.chain_id, url = %url, error = %e, "grpc channel open failed, refresh aborted");
                    return;
                }
            }
        }

        {
            let mut state = self.state.write();
            state.rpc = rpc;
            for (url, channel) in opened {
                state.channels.insert(url, channel);
            }
        }

        if !to_remove.is_empty() {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                pool.close(&to_remove);
            });
        }
    }

    fn close(&self, urls: &[String]) {
        let mut state = self.state.write();
        for url in urls {
            if state.channels.remove(url).is_some() {
                info!(chain_id = %self.chain_id, url = %url, "closed drained grpc channel");
            }
        }
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.state.read().rpc.clone()
    }

    #[cfg(test)]
    #[must_use]
    pub fn live_channel_count(&self) -> usize {
        self.state.read().channels.len()
    }
}

/// Chain id -> pool map shared between the refresh loop and the director.
#[derive(Default)]
pub struct GrpcUpstreamCache {
    pools: DashMap<String, Arc<GrpcUpstream>>,
}

impl GrpcUpstreamCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, chain_id: &str) -> Option<Arc<GrpcUpstream>> {
        self.pools.get(chain_id).map(|p| Arc::clone(&p))
    }

    /// Creates the pool on first sight and reconciles its endpoint list.
    pub fn put(&self, chain_id: &str, rpc: Vec<String>) {
        let pool = self
            .pools
            .entry(chain_id.to_string())
            .or_insert_with(|| Arc::new(GrpcUpstream::new(chain_id)))
            .clone();
        pool.refresh(rpc);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
