//! Observed-state cache
//!
//! Last fetched snapshot of every remote resource, keyed by record. The
//! reconciler always re-reads before acting; entries here are advisory and
//! only answer "what did we last see, and when".

use crate::store::ResourceKey;
use chrono::{DateTime, Utc};
use cloud_client::ObservedState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ObservedCache {
    entries: Arc<Mutex<HashMap<ResourceKey, ObservedState>>>,
}

impl ObservedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &ResourceKey, observed: ObservedState) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.clone(), observed);
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<ObservedState> {
        self.entries.lock().ok().and_then(|entries| entries.get(key).cloned())
    }

    pub fn remove(&self, key: &ResourceKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Time since the snapshot for `key` was fetched
    pub fn age(&self, key: &ResourceKey, now: DateTime<Utc>) -> Option<Duration> {
        self.get(key)
            .map(|observed| (now - observed.fetched_at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
