//! Process-wide caches for parsed configuration and clients.
//!
//! Entries are keyed by a fingerprint of the configuration they were built
//! from, so a changed configuration simply misses the cache. Concurrent
//! loads of the same key may both run; the last writer wins.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3;

/// Hex XXH3-128 digest over an identity and a set of selectors.
///
/// Selectors are sorted and de-duplicated first, so their order does not
/// change the fingerprint.
#[must_use]
pub fn fingerprint<I, S>(identity: &str, selectors: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selectors: Vec<String> = selectors
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    selectors.sort();
    selectors.dedup();

    let mut hasher = Xxh3::new();
    hasher.update(identity.as_bytes());
    for selector in &selectors {
        hasher.update(&[0u8]);
        hasher.update(selector.as_bytes());
    }
    hex::encode(hasher.digest128().to_be_bytes())
}

/// A keyed cache of shared values.
#[derive(Debug)]
pub struct ConfigCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for ConfigCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConfigCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&self, key: impl Into<String>, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries.write().insert(key.into(), Arc::clone(&value));
        value
    }

    /// Returns the cached value for `key`, loading and storing it on a miss.
    ///
    /// The lock is not held while `load` runs.
    ///
    /// # Errors
    ///
    /// Returns the error from `load`; nothing is cached in that case.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: &str, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = load().await?;
        Ok(self.insert(key, value))
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
