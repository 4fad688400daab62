//! Store-event subscribers.
//!
//! The control plane reacts to after-save events from the record store:
//! secret keys and routing config are mirrored to the push sink, promoted
//! JSON-RPC pools are mirrored when the mirror flag is on, and the
//! per-protocol health-check switch flips the `disabled` flag on every
//! check rule.

use crate::push::PushClient;
use crate::store::{GatewayStore, StoreError, StoreEvent};
use crate::types::{ConfigEntry, HealthCheckSwitch, Protocol, PushSinkConfig, ReadyUpstream, SecretKey, Upstream};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub struct EventHooks {
    store: Arc<dyn GatewayStore>,
    push: Option<Arc<PushClient>>,
}

impl EventHooks {
    #[must_use]
    pub fn new(store: Arc<dyn GatewayStore>, push: Option<Arc<PushClient>>) -> Self {
        Self { store, push }
    }

    /// Spawns the subscriber loop until shutdown.
    #[must_use]
    pub fn start(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let hooks = Arc::clone(self);
        let mut events = hooks.store.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => hooks.handle(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "store event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => {
                        info!("event hooks shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn handle(&self, event: StoreEvent) {
        match event {
            StoreEvent::SecretKeySaved(secret) => self.on_secret_key(&secret).await,
            StoreEvent::UpstreamSaved(upstream) => self.on_upstream(&upstream).await,
            StoreEvent::ConfigSaved(entry) => self.on_config(&entry).await,
        }
    }

    async fn on_secret_key(&self, secret: &SecretKey) {
        let Some(push) = &self.push else { return };
        match push.post_secret_key(secret).await {
            Ok(()) => {
                info!(group = %secret.group, service = %secret.service, "mirrored secret key");
            }
            Err(e) => error!(error = %e, "secret key mirror failed"),
        }
    }

    async fn on_upstream(&self, upstream: &Upstream) {
        if !upstream.ready || upstream.protocol != Protocol::Jsonrpc {
            return;
        }
        let Some(push) = &self.push else { return };
        if !self.mirror_enabled().await {
            return;
        }

        let ready = ReadyUpstream {
            chain_id: upstream.chain_id.clone(),
            source: upstream.source.clone(),
            rpc: upstream.rpc.clone(),
            protocol: upstream.protocol,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        match push.post_ready_upstream(&ready).await {
            Ok(()) => {
                info!(chain_id = %ready.chain_id, source = %ready.source, "mirrored ready upstream");
            }
            Err(e) => error!(error = %e, "ready upstream mirror failed"),
        }
    }

    async fn on_config(&self, entry: &ConfigEntry) {
        if entry.module != "upstream" {
            return;
        }
        match entry.key.as_str() {
            "route_rules" => {
                let Some(push) = &self.push else { return };
                match push.post_config(entry).await {
                    Ok(()) => info!("mirrored route_rules config"),
                    Err(e) => error!(error = %e, "route_rules mirror failed"),
                }
            }
            "health_check" => {
                let switch: HealthCheckSwitch = match serde_json::from_str(&entry.value) {
                    Ok(switch) => switch,
                    Err(e) => {
                        error!(error = %e, "bad health_check config value");
                        return;
                    }
                };
                if let Err(e) = self.apply_health_check_switch(switch).await {
                    error!(error = %e, "health check switch apply failed");
                } else {
                    info!(grpc = switch.grpc, jsonrpc = switch.jsonrpc, "applied health check switch");
                }
            }
            _ => {}
        }
    }

    async fn mirror_enabled(&self) -> bool {
        match self.store.get_config("upstream", "cloudflare_worker").await {
            Ok(value) => serde_json::from_str::<PushSinkConfig>(&value)
                .map(|c| c.push)
                .unwrap_or_default(),
            Err(StoreError::NotFound) => false,
            Err(e) => {
                warn!(error = %e, "cloudflare_worker config lookup failed");
                false
            }
        }
    }

    async fn apply_health_check_switch(&self, switch: HealthCheckSwitch) -> Result<(), StoreError> {
        let rules = self.store.list_check_rules().await?;
        for mut rule in rules {
            rule.disabled = match rule.protocol {
                Protocol::Jsonrpc => !switch.jsonrpc,
                Protocol::Grpc => !switch.grpc,
            };
            self.store.save_check_rule(rule).await?;
        }
        Ok(())
    }
}
