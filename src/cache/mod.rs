//! Response cache: key derivation and best-effort lookup/store.
//!
//! The cache is an optimisation, never a dependency. [`CacheCoordinator`]
//! logs every [`CacheError`] and degrades to a miss (lookup) or a no-op
//! (store), so a dead Redis never fails a request.
//!
//! ## Key contents
//!
//! [`cache_key`] hashes the file name, the prompt and the generation
//! overrides. It does **not** hash the file itself: two different uploads
//! that share a name, prompt and parameters share a cache entry.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::{MemoryCache, DEFAULT_MAX_ENTRIES};
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use crate::error::CacheError;
use crate::request::ExplainRequest;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// A string key/value store with an implementation-defined TTL.
///
/// Implementations must tolerate concurrent calls from independent requests.
#[async_trait]
pub trait Cache: Send + Sync {
    /// `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// Derive the cache key for a request: hex SHA-256 of
/// `file_name-prompt[-temperature][-max_tokens]`.
pub fn cache_key(request: &ExplainRequest) -> String {
    let mut fields = vec![request.file_name.clone(), request.prompt.clone()];
    if let Some(temperature) = request.temperature() {
        fields.push(format!("{temperature:.6}"));
    }
    if let Some(max_tokens) = request.max_tokens() {
        fields.push(max_tokens.to_string());
    }
    hex::encode(Sha256::digest(fields.join("-").as_bytes()))
}

/// Best-effort front end over an optional [`Cache`].
#[derive(Clone, Default)]
pub struct CacheCoordinator {
    cache: Option<Arc<dyn Cache>>,
}

impl CacheCoordinator {
    pub fn new(cache: Option<Arc<dyn Cache>>) -> Self {
        Self { cache }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Look up a previous answer. Errors count as a miss.
    pub async fn lookup(&self, request: &ExplainRequest) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let key = cache_key(request);
        match cache.get(&key).await {
            Ok(Some(value)) => {
                debug!("Cache hit for {} ({})", request.file_name, key);
                Some(value)
            }
            Ok(None) => {
                debug!("Cache miss for {}", request.file_name);
                None
            }
            Err(e) => {
                warn!("Cache get failed for {}: {}", request.file_name, e);
                None
            }
        }
    }

    /// Remember an answer. Errors are logged and dropped.
    pub async fn store(&self, request: &ExplainRequest, explanation: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let key = cache_key(request);
        if let Err(e) = cache.set(&key, explanation).await {
            warn!("Cache set failed for {}: {}", request.file_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GenerationParams;
    use std::time::Duration;

    fn request(file_base64: &str, generation: Option<GenerationParams>) -> ExplainRequest {
        ExplainRequest {
            prompt: "explain".into(),
            file_base64: file_base64.into(),
            file_name: "arch.png".into(),
            file_format: "png".into(),
            generation,
        }
    }

    /// Every call fails.
    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[test]
    fn key_ignores_file_content() {
        let a = cache_key(&request("AAAA", None));
        let b = cache_key(&request("BBBB", None));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_matches_known_digest() {
        // sha256("arch.png-explain")
        let expected = hex::encode(Sha256::digest(b"arch.png-explain"));
        assert_eq!(cache_key(&request("x", None)), expected);

        // sha256("arch.png-explain-0.700000-512")
        let with_params = request(
            "x",
            Some(GenerationParams {
                temperature: Some(0.7),
                max_tokens: Some(512),
            }),
        );
        let expected = hex::encode(Sha256::digest(b"arch.png-explain-0.700000-512"));
        assert_eq!(cache_key(&with_params), expected);
    }

    #[test]
    fn key_changes_with_generation_parameters() {
        let plain = cache_key(&request("x", None));
        let tuned = cache_key(&request(
            "x",
            Some(GenerationParams {
                temperature: None,
                max_tokens: Some(100),
            }),
        ));
        assert_ne!(plain, tuned);
    }

    #[tokio::test]
    async fn round_trip_through_coordinator() {
        let coordinator =
            CacheCoordinator::new(Some(Arc::new(MemoryCache::new(Duration::from_secs(60)))));
        let req = request("x", None);

        assert_eq!(coordinator.lookup(&req).await, None);
        coordinator.store(&req, "a flowchart").await;
        assert_eq!(coordinator.lookup(&req).await.as_deref(), Some("a flowchart"));
    }

    #[tokio::test]
    async fn errors_degrade_to_miss_and_noop() {
        let coordinator = CacheCoordinator::new(Some(Arc::new(BrokenCache)));
        let req = request("x", None);
        coordinator.store(&req, "ignored").await;
        assert_eq!(coordinator.lookup(&req).await, None);
    }

    #[tokio::test]
    async fn disabled_coordinator_always_misses() {
        let coordinator = CacheCoordinator::default();
        assert!(!coordinator.is_enabled());
        let req = request("x", None);
        coordinator.store(&req, "v").await;
        assert_eq!(coordinator.lookup(&req).await, None);
    }
}
