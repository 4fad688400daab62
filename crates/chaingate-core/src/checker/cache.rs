//! TTL-bounded memoization of probe responses.
//!
//! Keyed by endpoint URL concatenated with the request body so identical
//! probes within one orchestrator tick are coalesced. Entries are replaced
//! wholesale, never mutated in place; there is no LRU bound, so callers pass
//! a short TTL (one probe round).

use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

/// Process-local probe response cache.
#[derive(Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &str, body: &str) -> String {
        let mut key = String::with_capacity(url.len() + body.len());
        key.push_str(url);
        key.push_str(body);
        key
    }

    /// Returns the cached response for (url, body) when present and fresh.
    #[must_use]
    pub fn fetch(&self, url: &str, body: &str) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(&Self::key(url, body))?;
        if entry.stored_at.elapsed() > entry.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Installs or overwrites the cached response for (url, body).
    pub fn store(&self, url: &str, body: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.insert(Self::key(url, body), CacheEntry { value, stored_at: Instant::now(), ttl });
    }

    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
