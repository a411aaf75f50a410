//! In-memory storage backend.
//!
//! Used by tests and by the CLI's `--memory` mode. Compare-and-swap happens
//! under the map's shard lock, so concurrent writers on the same key are
//! serialized and writers on different keys are not.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use learnpath_core::{AdaptationRecord, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord};

use super::trait_::{check_version, phase_key, CurriculumStore, ProgressStore, Result};

/// Map-backed storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    phases: DashMap<(LearnerId, PhaseId), Phase>,
    progress: DashMap<ProgressKey, ProgressRecord>,
    adaptations: DashMap<LearnerId, Vec<AdaptationRecord>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CurriculumStore for MemoryStorage {
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>> {
        Ok(self
            .phases
            .get(&(learner_id.clone(), phase_id))
            .map(|p| p.value().clone()))
    }

    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>> {
        let mut phases: Vec<Phase> = self
            .phases
            .iter()
            .filter(|e| &e.key().0 == learner_id)
            .map(|e| e.value().clone())
            .collect();
        phases.sort_by_key(|p| p.id);
        Ok(phases)
    }

    async fn save_phase(&self, phase: &Phase) -> Result<u64> {
        let key = (phase.learner_id.clone(), phase.id);
        let found = match self.phases.entry(key) {
            Entry::Occupied(mut e) => {
                let found = e.get().revision;
                check_version(phase_key(&phase.learner_id, phase.id), phase.revision, found)?;
                let mut stored = phase.clone();
                stored.revision = found + 1;
                e.insert(stored);
                found
            }
            Entry::Vacant(e) => {
                check_version(phase_key(&phase.learner_id, phase.id), phase.revision, 0)?;
                let mut stored = phase.clone();
                stored.revision = 1;
                e.insert(stored);
                0
            }
        };
        Ok(found + 1)
    }
}

#[async_trait]
impl ProgressStore for MemoryStorage {
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        Ok(self.progress.get(key).map(|r| r.value().clone()))
    }

    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
        let key = record.key();
        let found = match self.progress.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                let found = e.get().version;
                check_version(&key, record.version, found)?;
                let mut stored = record.clone();
                stored.version = found + 1;
                e.insert(stored);
                found
            }
            Entry::Vacant(e) => {
                check_version(&key, record.version, 0)?;
                let mut stored = record.clone();
                stored.version = 1;
                e.insert(stored);
                0
            }
        };
        Ok(found + 1)
    }

    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
        self.adaptations
            .entry(record.learner_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
        Ok(self
            .adaptations
            .get(learner_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    fn learner() -> LearnerId {
        LearnerId::parse("mem-user").unwrap()
    }

    #[tokio::test]
    async fn test_phase_cas_bumps_revision() {
        let store = MemoryStorage::new();
        let mut phase = Phase::new(PhaseId(0), learner(), "Basics", chrono::Utc::now());

        assert_eq!(store.save_phase(&phase).await.unwrap(), 1);
        phase.revision = 1;
        assert_eq!(store.save_phase(&phase).await.unwrap(), 2);

        // stale copy
        let err = store.save_phase(&phase).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { expected: 1, found: 2, .. }));
    }

    #[tokio::test]
    async fn test_new_record_must_not_exist() {
        let store = MemoryStorage::new();
        let key = ProgressKey::new(learner(), PhaseId(0));
        let record = ProgressRecord::first_unlock(&key, chrono::Utc::now());

        store.save_progress(&record).await.unwrap();
        assert!(store.save_progress(&record).await.unwrap_err().is_conflict());

        let loaded = store.load_progress(&key).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_list_phases_is_ordered_and_scoped() {
        let store = MemoryStorage::new();
        let other = LearnerId::parse("other").unwrap();
        for id in [2, 0, 1] {
            let phase = Phase::new(PhaseId(id), learner(), "p", chrono::Utc::now());
            store.save_phase(&phase).await.unwrap();
        }
        store
            .save_phase(&Phase::new(PhaseId(0), other, "p", chrono::Utc::now()))
            .await
            .unwrap();

        let ids: Vec<u32> = store
            .list_phases(&learner())
            .await
            .unwrap()
            .iter()
            .map(|p| p.id.0)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
