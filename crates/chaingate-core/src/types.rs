//! Core record and protocol types shared by the data plane and control plane.
//!
//! # Record types
//!
//! - [`SecretKey`]: per-tenant credential with CORS policy and routing overrides
//! - [`Upstream`] / [`ReadyUpstream`]: candidate and promoted endpoint pools
//! - [`CheckRule`]: health-check conditions attached to a (source, chain, protocol)
//! - [`ConfigEntry`]: free-form (module, key) -> value configuration records
//!
//! All records are owned by the store; the core only holds short-lived copies.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Wire protocol served by an upstream pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Jsonrpc,
    Grpc,
}

impl Protocol {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Jsonrpc => "jsonrpc",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant credential record.
///
/// `access_key` is the public 32-character identifier carried in request paths
/// and gRPC metadata. `secret_key` is never exposed by the data plane.
/// `allow_origins` is a regular expression; empty means any origin (`*`).
/// `route_rules` is a serialized map of JSON-RPC method to [`MethodRouteRule`]
/// overriding the global routing config for this tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretKey {
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    pub group: String,
    pub service: String,
    #[serde(default)]
    pub allow_origins: String,
    #[serde(default)]
    pub allow_ips: String,
    #[serde(default)]
    pub route_rules: String,
}

/// A candidate endpoint pool for one (chain, source) pair.
///
/// `rpc` is a comma-joined URL list. `ready = true` marks a promoted row; for
/// each (protocol, source, chain_id) at most one ready row exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Upstream {
    pub chain_id: String,
    pub source: String,
    pub rpc: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub ready: bool,
}

/// Projection of [`Upstream`] rows with `ready = true`.
///
/// The source of truth consumed by the JSON-RPC and gRPC data planes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyUpstream {
    pub chain_id: String,
    pub source: String,
    pub rpc: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub created_at: i64,
}

/// Global or per-tenant routing override for a single JSON-RPC method.
///
/// Matches when the request's chain id appears in the comma-joined
/// `chain_ids`; on match the request's source is replaced by `source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRouteRule {
    pub source: String,
    #[serde(rename = "chainIds")]
    pub chain_ids: String,
}

impl MethodRouteRule {
    #[must_use]
    pub fn matches(&self, chain_id: &str) -> bool {
        self.chain_ids.split(',').any(|id| id == chain_id)
    }
}

/// Configuration record, addressed by (module, key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub module: String,
    pub key: String,
    pub value: String,
}

/// Value of the `upstream`/`cloudflare_worker` config entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PushSinkConfig {
    pub push: bool,
}

/// Value of the `upstream`/`health_check` config entry: per-protocol master
/// switch for check rules.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthCheckSwitch {
    pub grpc: bool,
    pub jsonrpc: bool,
}

/// Comma-joined endpoint list as stored in upstream records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcList(pub String);

impl RpcList {
    /// Splits into URLs, preserving order and duplicates.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        if self.0.is_empty() {
            return Vec::new();
        }
        self.0.split(',').map(str::to_owned).collect()
    }

    /// Splits into URLs, dropping duplicates while preserving first-seen order.
    #[must_use]
    pub fn unique_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.urls().into_iter().filter(|u| seen.insert(u.clone())).collect()
    }

    #[must_use]
    pub fn join(urls: &[String]) -> String {
        urls.join(",")
    }
}

impl From<&str> for RpcList {
    fn from(value: &str) -> Self {
        RpcList(value.to_owned())
    }
}

/// Deduplicates a URL list in place order, first occurrence wins.
#[must_use]
pub fn unique_urls(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter().filter(|u| seen.insert((*u).clone())).cloned().collect()
}
