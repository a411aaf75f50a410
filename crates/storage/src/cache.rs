//! Read-through cache in front of any [`Storage`](crate::Storage).
//!
//! Single-document reads are served from memory while the entry is younger
//! than the configured TTL. Every write through the cache drops the entry for
//! that key, whether the write succeeded or lost a compare-and-swap, so the
//! next read goes to the backing store and sees the winner.
//!
//! Each key also carries a write generation. A read that missed only fills
//! the slot if no write for that key landed while it was fetching; otherwise
//! the value it holds may predate the write and is returned uncached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use learnpath_core::{AdaptationRecord, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord};

use super::trait_::{CurriculumStore, ProgressStore, Result};

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

#[derive(Debug)]
struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    generation: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            entry: None,
            generation: 0,
        }
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from memory
    pub hits: u64,
    /// Reads that went to the backing store
    pub misses: u64,
}

/// Caching wrapper around a storage backend.
pub struct CachedStorage<S> {
    inner: S,
    ttl: Duration,
    phases: DashMap<(LearnerId, PhaseId), Slot<Phase>>,
    progress: DashMap<ProgressKey, Slot<ProgressRecord>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S> CachedStorage<S> {
    /// Wrap `inner`, keeping entries for `ttl`.
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            phases: DashMap::new(),
            progress: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Backing store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached entry. Write generations are kept.
    pub fn clear(&self) {
        self.phases.iter_mut().for_each(|mut slot| slot.entry = None);
        self.progress.iter_mut().for_each(|mut slot| slot.entry = None);
    }

    fn fresh<K, T>(&self, map: &DashMap<K, Slot<T>>, key: &K) -> Option<T>
    where
        K: std::hash::Hash + Eq,
        T: Clone,
    {
        let hit = map.get(key).and_then(|slot| {
            slot.entry
                .as_ref()
                .filter(|e| e.stored_at.elapsed() < self.ttl)
                .map(|e| e.value.clone())
        });
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

fn generation<K, T>(map: &DashMap<K, Slot<T>>, key: &K) -> u64
where
    K: std::hash::Hash + Eq,
{
    map.get(key).map_or(0, |slot| slot.generation)
}

/// Cache `value` unless a write for `key` happened after `seen` was read.
///
/// The check and the insert run under the shard lock that [`invalidate`]
/// also takes, so a write cannot slip in between them.
fn fill<K, T>(map: &DashMap<K, Slot<T>>, key: K, seen: u64, value: T) -> bool
where
    K: std::hash::Hash + Eq,
{
    let mut slot = map.entry(key).or_default();
    if slot.generation != seen {
        return false;
    }
    slot.entry = Some(CacheEntry {
        value,
        stored_at: Instant::now(),
    });
    true
}

fn invalidate<K, T>(map: &DashMap<K, Slot<T>>, key: K)
where
    K: std::hash::Hash + Eq,
{
    let mut slot = map.entry(key).or_default();
    slot.generation += 1;
    slot.entry = None;
}

#[async_trait]
impl<S: CurriculumStore> CurriculumStore for CachedStorage<S> {
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>> {
        let key = (learner_id.clone(), phase_id);
        if let Some(phase) = self.fresh(&self.phases, &key) {
            return Ok(Some(phase));
        }

        let seen = generation(&self.phases, &key);
        let loaded = self.inner.load_phase(learner_id, phase_id).await?;
        if let Some(phase) = &loaded {
            if !fill(&self.phases, key, seen, phase.clone()) {
                tracing::debug!(phase_id = %phase_id, "phase written during read, not cached");
            }
        }
        Ok(loaded)
    }

    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>> {
        self.inner.list_phases(learner_id).await
    }

    async fn save_phase(&self, phase: &Phase) -> Result<u64> {
        let result = self.inner.save_phase(phase).await;
        invalidate(&self.phases, (phase.learner_id.clone(), phase.id));
        if let Err(e) = &result {
            tracing::debug!(phase_id = %phase.id, error = %e, "phase write failed, cache entry dropped");
        }
        result
    }
}

#[async_trait]
impl<S: ProgressStore> ProgressStore for CachedStorage<S> {
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        if let Some(record) = self.fresh(&self.progress, key) {
            return Ok(Some(record));
        }

        let seen = generation(&self.progress, key);
        let loaded = self.inner.load_progress(key).await?;
        if let Some(record) = &loaded {
            if !fill(&self.progress, key.clone(), seen, record.clone()) {
                tracing::debug!(key = %key, "progress written during read, not cached");
            }
        }
        Ok(loaded)
    }

    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
        let result = self.inner.save_progress(record).await;
        invalidate(&self.progress, record.key());
        if let Err(e) = &result {
            tracing::debug!(key = %record.key(), error = %e, "progress write failed, cache entry dropped");
        }
        result
    }

    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
        self.inner.append_adaptation(record).await
    }

    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
        self.inner.list_adaptations(learner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Backing store whose next progress read stalls after fetching.
    #[derive(Default)]
    struct PausingStore {
        inner: MemoryStorage,
        armed: AtomicBool,
        fetched: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl ProgressStore for PausingStore {
        async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
            let loaded = self.inner.load_progress(key).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.fetched.notify_one();
                self.resume.notified().await;
            }
            Ok(loaded)
        }

        async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
            self.inner.save_progress(record).await
        }

        async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
            self.inner.append_adaptation(record).await
        }

        async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
            self.inner.list_adaptations(learner_id).await
        }
    }

    fn key() -> ProgressKey {
        ProgressKey::new(LearnerId::parse("cached").unwrap(), PhaseId(0))
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() {
        let cache = CachedStorage::new(MemoryStorage::new(), Duration::from_secs(60));
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();

        cache.load_progress(&key()).await.unwrap();
        cache.load_progress(&key()).await.unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_write_invalidates() {
        let cache = CachedStorage::new(MemoryStorage::new(), Duration::from_secs(60));
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();

        let mut loaded = cache.load_progress(&key()).await.unwrap().unwrap();
        loaded.unlocked_days.insert(2);
        cache.save_progress(&loaded).await.unwrap();

        let reread = cache.load_progress(&key()).await.unwrap().unwrap();
        assert!(reread.unlocked_days.contains(&2));
        assert_eq!(reread.version, 2);
    }

    #[tokio::test]
    async fn test_conflict_drops_stale_entry() {
        let backing = Arc::new(MemoryStorage::new());
        let cache = CachedStorage::new(Arc::clone(&backing), Duration::from_secs(60));
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();

        // cache holds version 1
        let stale = cache.load_progress(&key()).await.unwrap().unwrap();

        // someone else writes straight to the backing store
        let mut other = stale.clone();
        other.unlocked_days.insert(2);
        backing.save_progress(&other).await.unwrap();

        assert!(cache.save_progress(&stale).await.unwrap_err().is_conflict());
        let reread = cache.load_progress(&key()).await.unwrap().unwrap();
        assert_eq!(reread.version, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_hits() {
        let cache = CachedStorage::new(MemoryStorage::new(), Duration::ZERO);
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();

        cache.load_progress(&key()).await.unwrap();
        cache.load_progress(&key()).await.unwrap();
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_read_overtaken_by_write_is_not_cached() {
        let backing = Arc::new(PausingStore::default());
        let cache = Arc::new(CachedStorage::new(Arc::clone(&backing), Duration::from_secs(300)));
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();

        backing.armed.store(true, Ordering::SeqCst);
        let reader = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.load_progress(&key()).await }
        });
        backing.fetched.notified().await;

        // the reader now holds version 1; commit version 2 through the cache
        let mut next = backing.inner.load_progress(&key()).await.unwrap().unwrap();
        next.unlocked_days.insert(2);
        assert_eq!(cache.save_progress(&next).await.unwrap(), 2);
        backing.resume.notify_one();

        let overtaken = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(overtaken.version, 1);

        let reread = cache.load_progress(&key()).await.unwrap().unwrap();
        assert_eq!(reread.version, 2);
        assert!(reread.unlocked_days.contains(&2));
    }

    #[tokio::test]
    async fn test_clear_keeps_serving_after_refill() {
        let cache = CachedStorage::new(MemoryStorage::new(), Duration::from_secs(60));
        let record = ProgressRecord::first_unlock(&key(), chrono::Utc::now());
        cache.save_progress(&record).await.unwrap();
        cache.load_progress(&key()).await.unwrap();

        cache.clear();
        cache.load_progress(&key()).await.unwrap();
        cache.load_progress(&key()).await.unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
    }
}
