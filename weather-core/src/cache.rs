//! Dual-tier result cache.
//!
//! The fresh tier answers only while an entry's TTL has not elapsed. The
//! durable tier keeps the last successfully fetched value for every key
//! forever and is consulted only when both upstreams have failed.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use tokio::time::Instant;

use crate::model::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Reading,
    pub inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Tiers {
    fresh: HashMap<String, CacheEntry>,
    durable: HashMap<String, CacheEntry>,
}

#[derive(Debug)]
pub struct DualTierCache {
    ttl: Duration,
    // One lock over both tiers so a `set` is never observed half-applied.
    tiers: RwLock<Tiers>,
}

impl DualTierCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tiers: RwLock::new(Tiers::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Value for `key` if it was set less than one TTL ago.
    ///
    /// Expired entries are left in place; a later `set` replaces them.
    pub fn get(&self, key: &str) -> Option<Reading> {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        let entry = tiers.fresh.get(key)?;

        (entry.inserted_at.elapsed() < self.ttl).then_some(entry.value)
    }

    /// Last value ever set for `key`, regardless of age.
    pub fn get_stale(&self, key: &str) -> Option<Reading> {
        let tiers = self.tiers.read().unwrap_or_else(PoisonError::into_inner);
        tiers.durable.get(key).map(|entry| entry.value)
    }

    /// Writes `value` to both tiers and restarts the TTL for `key`.
    pub fn set(&self, key: &str, value: Reading) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };

        let mut tiers = self.tiers.write().unwrap_or_else(PoisonError::into_inner);
        tiers.fresh.insert(key.to_string(), entry);
        tiers.durable.insert(key.to_string(), entry);
    }

    /// Number of locations with a last-known-good value.
    pub fn len(&self) -> usize {
        self.tiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .durable
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
