use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use trends_core::config::CacheConfig;
use tracing::debug;

/// In-memory key-value cache with a default expiry and a bounded entry count.
///
/// Once more than `threshold` entries are held, expired entries are purged
/// and then the least recently used ones are evicted.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    threshold: usize,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: Instant,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            threshold,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            Duration::from_secs(config.default_timeout_secs),
            config.threshold,
        )
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Stores every entry under one lock, so readers never observe a mix of
    /// old and new values from the same batch. Eviction only considers keys
    /// outside the batch, so a batch larger than the threshold is kept whole.
    pub async fn set_many<K, I>(&self, batch: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut written = HashSet::new();

        for (key, value) in batch {
            let key: String = key.into();
            written.insert(key.clone());
            entries.insert(
                key,
                Entry {
                    value,
                    expires_at: now + self.ttl,
                    last_used: now,
                },
            );
        }

        if entries.len() > self.threshold {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        while entries.len() > self.threshold {
            let Some(oldest) = entries
                .iter()
                .filter(|(key, _)| !written.contains(key.as_str()))
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            entries.remove(&oldest);
            counter!("trends_cache_evictions").increment(1);
            debug!(key = %oldest, "Evicted least recently used cache entry");
        }
    }

    /// Number of held entries, including any that have expired but not yet been purged.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_default_timeout() {
        let cache = TtlCache::new(Duration::from_secs(300), 5);
        cache.set_many([("cases", 1u32)]).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("cases").await, Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("cases").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overwriting_resets_expiry() {
        let cache = TtlCache::new(Duration::from_secs(10), 5);
        cache.set_many([("cases", 1u32)]).await;

        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set_many([("cases", 2)]).await;
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("cases").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_entry_is_evicted_past_threshold() {
        let cache = TtlCache::new(Duration::from_secs(300), 2);

        cache.set_many([("a", 1u32)]).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set_many([("b", 2)]).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        // Touch "a" so "b" becomes the oldest
        assert_eq!(cache.get("a").await, Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set_many([("c", 3)]).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("c").await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_before_live_ones() {
        let cache = TtlCache::new(Duration::from_secs(5), 2);

        cache.set_many([("stale", 0u32)]).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.set_many([("a", 1)]).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.set_many([("b", 2)]).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("b").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_never_split_by_eviction() {
        let cache = TtlCache::new(Duration::from_secs(300), 1);

        cache.set_many([("older", 0u32)]).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set_many([("cases", 1), ("deaths", 2)]).await;

        assert_eq!(cache.get("older").await, None);
        assert_eq!(cache.get("cases").await, Some(1));
        assert_eq!(cache.get("deaths").await, Some(2));
    }

    #[tokio::test]
    async fn set_many_publishes_a_batch() {
        let cache = TtlCache::new(Duration::from_secs(300), 5);
        cache.set_many([("cases", 1u32), ("deaths", 2)]).await;

        assert_eq!(cache.get("cases").await, Some(1));
        assert_eq!(cache.get("deaths").await, Some(2));
        assert_eq!(cache.get("missing").await, None);
    }
}
