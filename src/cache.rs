//! ConversionCache (C4): an on-disk, content-addressed store of converted
//! artifacts with single-flight semantics.

use crate::model::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// On-disk cache keyed by `(bookId, targetFormat)`.
pub struct ConversionCache {
    dir: PathBuf,
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

impl ConversionCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.filename())
    }

    /// Return the cached artifact's path iff it exists.
    pub fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.exists().then_some(path)
    }

    /// Atomically move `source_path` into the canonical location for `key`,
    /// overwriting any prior artifact.
    pub async fn put(&self, key: &CacheKey, source_path: &Path) -> std::io::Result<PathBuf> {
        let dest = self.path_for(key);
        let tmp = dest.with_extension(format!("{}.tmp", std::process::id()));
        tokio::fs::copy(source_path, &tmp).await?;
        tokio::fs::rename(&tmp, &dest).await?;
        if source_path != dest {
            let _ = tokio::fs::remove_file(source_path).await;
        }
        Ok(dest)
    }

    /// Acquire the per-key single-flight lock for `key`. The returned guard
    /// must be held for the duration of a check-then-convert-then-populate
    /// sequence; concurrent callers for the same key block until the first
    /// releases its guard, at which point the cache has already been
    /// populated and a fresh `get` will hit.
    pub async fn lock(&self, key: &CacheKey) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn put_then_get_round_trips_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConversionCache::new(dir.path()).unwrap();
        let key = CacheKey::new("b2", "mobi");

        let src = dir.path().join("scratch.mobi");
        tokio::fs::write(&src, b"converted bytes").await.unwrap();

        assert!(cache.get(&key).is_none());
        let stored = cache.put(&key, &src).await.unwrap();
        assert!(cache.get(&key).is_some());
        assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"converted bytes");
    }

    #[tokio::test]
    async fn put_overwrites_a_prior_artifact_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConversionCache::new(dir.path()).unwrap();
        let key = CacheKey::new("b2", "mobi");

        let first = dir.path().join("first.mobi");
        tokio::fs::write(&first, b"v1").await.unwrap();
        cache.put(&key, &first).await.unwrap();

        let second = dir.path().join("second.mobi");
        tokio::fs::write(&second, b"v2").await.unwrap();
        let stored = cache.put(&key, &second).await.unwrap();

        assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn concurrent_getorconvert_invokes_the_converter_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ConversionCache::new(dir.path()).unwrap());
        let key = CacheKey::new("b2", "mobi");
        let conversions = Arc::new(AtomicUsize::new(0));

        async fn get_or_convert(
            cache: &ConversionCache,
            key: &CacheKey,
            conversions: &AtomicUsize,
        ) -> PathBuf {
            if let Some(hit) = cache.get(key) {
                return hit;
            }
            let _guard = cache.lock(key).await;
            if let Some(hit) = cache.get(key) {
                return hit;
            }
            conversions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let scratch = std::env::temp_dir().join(format!("scratch-{}", uuid::Uuid::new_v4()));
            tokio::fs::write(&scratch, b"data").await.unwrap();
            cache.put(key, &scratch).await.unwrap()
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let conversions = conversions.clone();
            handles.push(tokio::spawn(async move {
                get_or_convert(&cache, &key, &conversions).await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(conversions.load(Ordering::SeqCst), 1);
    }
}
