//! Bounded TTL cache for summary reads.
//!
//! Entries expire `ttl` after insertion and are purged lazily. When full, the
//! least-read entry goes first (oldest insertion on ties).

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use memoria_core::{SegmentId, SummaryRecord};
use memoria_settings::CacheSettings;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    hits: u64,
}

/// Concurrent TTL cache with a size cap.
pub struct TtlCache<K, V> {
    data: DashMap<K, CacheEntry<V>>,
    max_entries: usize,
    ttl: Duration,
}

/// Cache of summary records keyed by segment ID.
pub type SummaryCache = TtlCache<SegmentId, SummaryRecord>;

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Empty cache. A `max_entries` of zero disables caching.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            data: DashMap::new(),
            max_entries,
            ttl,
        }
    }

    /// Build from store cache settings.
    #[must_use]
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries, Duration::from_secs(settings.ttl_secs))
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let mut entry = self.data.get_mut(key)?;
            if entry.inserted_at.elapsed() <= self.ttl {
                entry.hits += 1;
                return Some(entry.value.clone());
            }
        }
        let _ = self.data.remove(key);
        None
    }

    /// Insert or replace `key`.
    pub fn insert(&self, key: K, value: V) {
        if self.max_entries == 0 {
            return;
        }
        if !self.data.contains_key(&key) && self.data.len() >= self.max_entries {
            self.purge_expired();
            if self.data.len() >= self.max_entries {
                self.evict_one();
            }
        }
        let _ = self.data.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                hits: 0,
            },
        );
    }

    /// Drop `key`.
    pub fn invalidate(&self, key: &K) {
        let _ = self.data.remove(key);
    }

    /// Drop every entry whose value matches `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&V) -> bool) {
        self.data.retain(|_, entry| !predicate(&entry.value));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Entries currently held (expired ones included until purged).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn purge_expired(&self) {
        let ttl = self.ttl;
        self.data.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    fn evict_one(&self) {
        let victim = self
            .data
            .iter()
            .min_by(|a, b| {
                a.hits
                    .cmp(&b.hits)
                    .then_with(|| a.inserted_at.cmp(&b.inserted_at))
            })
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            let _ = self.data.remove(&key);
        }
    }
}
