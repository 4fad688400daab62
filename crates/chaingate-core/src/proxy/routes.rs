//! Per-request route-rule resolution.
//!
//! The global routing table lives in the (`upstream`, `route_rules`) config
//! record; each tenant may carry overrides in its secret-key record. A rule
//! matches when the request's chain id is listed; on match the request's
//! source is replaced by the rule's source.

use super::ProxyError;
use crate::store::{GatewayStore, StoreError};
use crate::types::{MethodRouteRule, SecretKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Route-rule table keyed by JSON-RPC method.
pub type RouteRules = HashMap<String, MethodRouteRule>;

/// Loads the global table and overlays the tenant's rules.
///
/// # Errors
///
/// [`ProxyError::Internal`] on store failures (a missing config record is
/// not a failure) or unparsable rule JSON.
pub async fn load_route_rules(
    store: &Arc<dyn GatewayStore>,
    secret: &SecretKey,
) -> Result<RouteRules, ProxyError> {
    let mut rules: RouteRules = match store.get_config("upstream", "route_rules").await {
        Ok(value) if !value.is_empty() => serde_json::from_str(&value)
            .map_err(|e| ProxyError::Internal(format!("bad route_rules config: {e}")))?,
        Ok(_) | Err(StoreError::NotFound) => RouteRules::new(),
        Err(e) => return Err(ProxyError::Internal(e.to_string())),
    };

    if !secret.route_rules.is_empty() {
        let overrides: RouteRules = serde_json::from_str(&secret.route_rules)
            .map_err(|e| ProxyError::Internal(format!("bad tenant route_rules: {e}")))?;
        rules.extend(overrides);
    }
    Ok(rules)
}

/// Applies the table to one request: returns the (possibly overridden)
/// source for `method` on `chain_id`.
#[must_use]
pub fn apply_route_rules(
    rules: &RouteRules,
    method: &str,
    chain_id: &str,
    source: &str,
) -> String {
    match rules.get(method) {
        Some(rule) if rule.matches(chain_id) => rule.source.clone(),
        _ => source.to_string(),
    }
}
