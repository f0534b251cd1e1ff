//! In-process cache with a fixed TTL.

use super::Cache;
use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default bound on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A `HashMap` cache with a TTL and an entry cap.
///
/// Useful for single-instance deployments and tests. Entries live for
/// `ttl` after their last write. Expired entries are evicted when read, and
/// swept from the whole map when a write finds it at capacity. If the map is
/// still full after the sweep, the entry closest to expiry makes room.
#[derive(Debug)]
pub struct MemoryCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cap the number of stored entries (at least 1).
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some((value, expires)) if Instant::now() < *expires => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
            }
        }
        // Expired: re-check under the write lock, a writer may have refreshed it.
        let mut entries = self.entries.write().await;
        if let Some((value, expires)) = entries.get(key) {
            if Instant::now() < *expires {
                return Ok(Some(value.clone()));
            }
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            entries.retain(|_, (_, expires)| now < *expires);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (_, expires))| *expires)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + self.ttl));
        Ok(())
    }
}
