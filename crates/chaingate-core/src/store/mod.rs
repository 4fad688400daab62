//! Store contract and in-memory implementation.
//!
//! The collections backend proper (record CRUD, schema, migrations) is an
//! external collaborator. The core consumes the narrow [`GatewayStore`]
//! contract below and reacts to the after-save events the store emits.
//! [`MemoryStore`] is the process-local implementation used by the server
//! binary and the test suites.

use crate::checker::CheckRule;
use crate::types::{ConfigEntry, Protocol, ReadyUpstream, SecretKey, Upstream};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Event emitted after a record was successfully created or updated.
///
/// Mirrors the collections backend's "after create/update success" hooks; the
/// control plane subscribes to propagate changes (push sink, check-rule
/// toggling, route-rule distribution).
#[derive(Debug, Clone)]
pub enum StoreEvent {
    SecretKeySaved(SecretKey),
    UpstreamSaved(Upstream),
    ConfigSaved(ConfigEntry),
}

/// The operations the core issues against the record store.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_secret_by_access_key(&self, access_key: &str) -> Result<SecretKey, StoreError>;

    async fn put_secret_key(&self, secret: SecretKey) -> Result<(), StoreError>;

    /// Lists promoted endpoint pools for a chain, optionally narrowed to one
    /// source. All protocols are returned; callers filter.
    async fn list_ready_upstreams_by_chain_id(
        &self,
        chain_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<ReadyUpstream>, StoreError>;

    async fn list_ready_upstreams_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<ReadyUpstream>, StoreError>;

    async fn list_ready_upstreams_by_protocol(
        &self,
        protocol: Protocol,
    ) -> Result<Vec<ReadyUpstream>, StoreError>;

    async fn get_ready_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<ReadyUpstream, StoreError>;

    async fn put_ready_upstream(&self, upstream: ReadyUpstream) -> Result<(), StoreError>;

    async fn delete_ready_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_upstreams_by_source(&self, source: &str) -> Result<Vec<Upstream>, StoreError>;

    /// Lists candidate (`ready = false`) or promoted (`ready = true`) rows.
    async fn list_upstreams(&self, ready: bool) -> Result<Vec<Upstream>, StoreError>;

    async fn put_upstream(&self, upstream: Upstream) -> Result<(), StoreError>;

    async fn delete_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_check_rules(&self) -> Result<Vec<CheckRule>, StoreError>;

    async fn save_check_rule(&self, rule: CheckRule) -> Result<(), StoreError>;

    async fn get_config(&self, module: &str, key: &str) -> Result<String, StoreError>;

    async fn put_config(&self, entry: ConfigEntry) -> Result<(), StoreError>;

    /// Subscribes to after-save events.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

type UpstreamKey = (Protocol, String, String, bool);
type PoolKey = (Protocol, String, String);

/// DashMap-backed store.
///
/// Keys encode the uniqueness invariants directly: upstream rows are keyed by
/// (protocol, source, chain_id, ready) so at most one ready row exists per
/// triple, and the ready projection is keyed by (protocol, source, chain_id).
pub struct MemoryStore {
    secrets: DashMap<String, SecretKey>,
    upstreams: DashMap<UpstreamKey, Upstream>,
    ready: DashMap<PoolKey, ReadyUpstream>,
    rules: DashMap<PoolKey, CheckRule>,
    configs: DashMap<(String, String), ConfigEntry>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            secrets: DashMap::new(),
            upstreams: DashMap::new(),
            ready: DashMap::new(),
            rules: DashMap::new(),
            configs: DashMap::new(),
            events,
        }
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine; events are best-effort signals.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn get_secret_by_access_key(&self, access_key: &str) -> Result<SecretKey, StoreError> {
        self.secrets.get(access_key).map(|s| s.clone()).ok_or(StoreError::NotFound)
    }

    async fn put_secret_key(&self, secret: SecretKey) -> Result<(), StoreError> {
        self.secrets.insert(secret.access_key.clone(), secret.clone());
        self.emit(StoreEvent::SecretKeySaved(secret));
        Ok(())
    }

    async fn list_ready_upstreams_by_chain_id(
        &self,
        chain_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<ReadyUpstream>, StoreError> {
        Ok(self
            .ready
            .iter()
            .filter(|e| e.chain_id == chain_id)
            .filter(|e| source.is_none_or(|s| e.source == s))
            .map(|e| e.clone())
            .collect())
    }

    async fn list_ready_upstreams_by_source(
        &self,
        source: &str,
    ) -> Result<Vec<ReadyUpstream>, StoreError> {
        Ok(self.ready.iter().filter(|e| e.source == source).map(|e| e.clone()).collect())
    }

    async fn list_ready_upstreams_by_protocol(
        &self,
        protocol: Protocol,
    ) -> Result<Vec<ReadyUpstream>, StoreError> {
        Ok(self.ready.iter().filter(|e| e.protocol == protocol).map(|e| e.clone()).collect())
    }

    async fn get_ready_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<ReadyUpstream, StoreError> {
        self.ready
            .get(&(protocol, source.to_owned(), chain_id.to_owned()))
            .map(|e| e.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn put_ready_upstream(&self, upstream: ReadyUpstream) -> Result<(), StoreError> {
        let key = (upstream.protocol, upstream.source.clone(), upstream.chain_id.clone());
        self.ready.insert(key, upstream.clone());
        // The ready projection mirrors a ready=true upstream row; emit the
        // same after-save signal the backend would.
        self.emit(StoreEvent::UpstreamSaved(Upstream {
            chain_id: upstream.chain_id,
            source: upstream.source,
            rpc: upstream.rpc,
            protocol: upstream.protocol,
            ready: true,
        }));
        Ok(())
    }

    async fn delete_ready_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<(), StoreError> {
        self.ready.remove(&(protocol, source.to_owned(), chain_id.to_owned()));
        Ok(())
    }

    async fn list_upstreams_by_source(&self, source: &str) -> Result<Vec<Upstream>, StoreError> {
        Ok(self.upstreams.iter().filter(|e| e.source == source).map(|e| e.clone()).collect())
    }

    async fn list_upstreams(&self, ready: bool) -> Result<Vec<Upstream>, StoreError> {
        Ok(self.upstreams.iter().filter(|e| e.ready == ready).map(|e| e.clone()).collect())
    }

    async fn put_upstream(&self, upstream: Upstream) -> Result<(), StoreError> {
        let key = (
            upstream.protocol,
            upstream.source.clone(),
            upstream.chain_id.clone(),
            upstream.ready,
        );
        self.upstreams.insert(key, upstream.clone());
        self.emit(StoreEvent::UpstreamSaved(upstream));
        Ok(())
    }

    async fn delete_upstream(
        &self,
        protocol: Protocol,
        source: &str,
        chain_id: &str,
    ) -> Result<(), StoreError> {
        for ready in [false, true] {
            self.upstreams.remove(&(protocol, source.to_owned(), chain_id.to_owned(), ready));
        }
        Ok(())
    }

    async fn list_check_rules(&self) -> Result<Vec<CheckRule>, StoreError> {
        Ok(self.rules.iter().map(|e| e.clone()).collect())
    }

    async fn save_check_rule(&self, rule: CheckRule) -> Result<(), StoreError> {
        self.rules.insert((rule.protocol, rule.source.clone(), rule.chain_id.clone()), rule);
        Ok(())
    }

    async fn get_config(&self, module: &str, key: &str) -> Result<String, StoreError> {
        self.configs
            .get(&(module.to_owned(), key.to_owned()))
            .map(|e| e.value.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn put_config(&self, entry: ConfigEntry) -> Result<(), StoreError> {
        self.configs.insert((entry.module.clone(), entry.key.clone()), entry.clone());
        self.emit(StoreEvent::ConfigSaved(entry));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
