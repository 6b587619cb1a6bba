//! Read-through cache for the signing public key.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokenbridge_core::{PublicKeyMaterial, PublicKeyReader, Result};
use tokio::sync::RwLock;
use tracing::debug;

/// Caches the public key for `ttl`. A failed refresh is returned as an
/// error; an expired entry is never served.
pub struct CachedPublicKeyReader {
    inner: Arc<dyn PublicKeyReader>,
    ttl: Duration,
    cached: RwLock<Option<(PublicKeyMaterial, Instant)>>,
}

impl CachedPublicKeyReader {
    pub fn new(inner: Arc<dyn PublicKeyReader>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl PublicKeyReader for CachedPublicKeyReader {
    fn key_id(&self) -> &str {
        self.inner.key_id()
    }

    async fn public_key(&self) -> Result<PublicKeyMaterial> {
        if let Some((material, fetched_at)) = self.cached.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(material.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some((material, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(material.clone());
            }
        }

        debug!(key_id = %self.inner.key_id(), "Refreshing cached public key");
        let material = self.inner.public_key().await?;
        *cached = Some((material.clone(), Instant::now()));
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokenbridge_core::{Error, SigningAlgorithm};

    #[derive(Default)]
    struct CountingReader {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PublicKeyReader for CountingReader {
        fn key_id(&self) -> &str {
            "key-1"
        }

        async fn public_key(&self) -> Result<PublicKeyMaterial> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::KeyUnavailable("denied".to_string()));
            }
            Ok(PublicKeyMaterial {
                key_id: "key-1".to_string(),
                algorithm: SigningAlgorithm::RS256,
                spki_der: vec![1, 2, 3],
            })
        }
    }

    #[tokio::test]
    async fn test_serves_from_cache_within_ttl() {
        let inner = Arc::new(CountingReader::default());
        let cache = CachedPublicKeyReader::new(inner.clone(), Duration::from_secs(300));

        for _ in 0..5 {
            assert_eq!(cache.public_key().await.unwrap().spki_der, vec![1, 2, 3]);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_after_ttl() {
        let inner = Arc::new(CountingReader::default());
        let cache = CachedPublicKeyReader::new(inner.clone(), Duration::ZERO);

        cache.public_key().await.unwrap();
        cache.public_key().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let inner = Arc::new(CountingReader {
            fail: true,
            ..Default::default()
        });
        let cache = CachedPublicKeyReader::new(inner.clone(), Duration::from_secs(300));

        assert!(cache.public_key().await.is_err());
        assert!(cache.public_key().await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
