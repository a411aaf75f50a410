//! JSON file storage implementation.
//!
//! Stores one JSON file per document under the storage root:
//!
//! ```text
//! <root>/<learner>/phases/<phase>.json
//! <root>/<learner>/progress/<phase>.json
//! <root>/<learner>/adaptations/<id>.json
//! ```
//!
//! The version counter lives inside each document. Writes for one file are
//! serialized by a per-path lock and land through a rename, so readers never
//! see a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use dashmap::DashMap;
use learnpath_core::{AdaptationRecord, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord};
use super::trait_::{check_version, phase_key, CurriculumStore, ProgressStore, Result};
use tokio::fs;
use tokio::sync::Mutex;

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    fn learner_dir(&self, learner_id: &LearnerId) -> PathBuf {
        self.root.join(learner_id.as_str())
    }
    fn phase_path(&self, learner_id: &LearnerId, id: PhaseId) -> PathBuf {
        self.learner_dir(learner_id).join("phases").join(format!("{}.json", id))
    }
    fn progress_path(&self, key: &ProgressKey) -> PathBuf {
        self.learner_dir(&key.learner_id)
            .join("progress")
            .join(format!("{}.json", key.phase_id))
    }
    fn adaptation_path(&self, record: &AdaptationRecord) -> PathBuf {
        self.learner_dir(&record.learner_id)
            .join("adaptations")
            .join(format!("{}.json", record.id))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait::async_trait]
impl CurriculumStore for JsonStorage {
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>> {
        read_json(&self.phase_path(learner_id, phase_id)).await
    }

    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>> {
        let mut phases: Vec<Phase> = list_dir(&self.learner_dir(learner_id).join("phases")).await?;
        phases.sort_by_key(|p| p.id);
        Ok(phases)
    }

    async fn save_phase(&self, phase: &Phase) -> Result<u64> {
        let path = self.phase_path(&phase.learner_id, phase.id);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let found = read_json::<Phase>(&path).await?.map(|p| p.revision).unwrap_or(0);
        check_version(phase_key(&phase.learner_id, phase.id), phase.revision, found)?;

        let mut stored = phase.clone();
        stored.revision = found + 1;
        write_json(&path, &stored).await?;

        tracing::debug!(key = %phase_key(&phase.learner_id, phase.id), revision = stored.revision, "phase saved");
        Ok(stored.revision)
    }
}

#[async_trait::async_trait]
impl ProgressStore for JsonStorage {
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        read_json(&self.progress_path(key)).await
    }

    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
        let key = record.key();
        let path = self.progress_path(&key);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let found = read_json::<ProgressRecord>(&path)
            .await?
            .map(|r| r.version)
            .unwrap_or(0);
        check_version(&key, record.version, found)?;

        let mut stored = record.clone();
        stored.version = found + 1;
        write_json(&path, &stored).await?;

        tracing::debug!(key = %key, version = stored.version, "progress saved");
        Ok(stored.version)
    }

    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
        write_json(&self.adaptation_path(record), record).await
    }

    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
        let mut records: Vec<AdaptationRecord> =
            list_dir(&self.learner_dir(learner_id).join("adaptations")).await?;
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable document"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::{Adaptations, AdaptationId, LearningVelocity, RiskLevel};

    fn learner() -> LearnerId {
        LearnerId::parse("json-user").unwrap()
    }

    #[tokio::test]
    async fn test_phase_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).await.unwrap();

        let mut phase = Phase::new(PhaseId(3), learner(), "Ownership", chrono::Utc::now());
        phase.push_week("Week 1", &["Moves", "Borrows"]);
        store.save_phase(&phase).await.unwrap();

        // a second handle sees the file
        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let loaded = reopened.load_phase(&learner(), PhaseId(3)).await.unwrap().unwrap();
        assert_eq!(loaded.total_days(), 2);
        assert_eq!(loaded.revision, 1);
        assert!(dir.path().join("json-user/phases/3.json").exists());
    }

    #[tokio::test]
    async fn test_progress_conflict_on_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).await.unwrap();
        let key = ProgressKey::new(learner(), PhaseId(0));

        let record = ProgressRecord::first_unlock(&key, chrono::Utc::now());
        store.save_progress(&record).await.unwrap();

        let mut current = store.load_progress(&key).await.unwrap().unwrap();
        current.unlocked_days.insert(2);
        assert_eq!(store.save_progress(&current).await.unwrap(), 2);

        // writing the version-1 copy again must fail
        assert!(store.save_progress(&current).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_missing_learner_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).await.unwrap();
        assert!(store.list_phases(&learner()).await.unwrap().is_empty());
        assert!(store.list_adaptations(&learner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adaptations_listed_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).await.unwrap();
        let now = chrono::Utc::now();

        for offset in [2, 0, 1] {
            let record = AdaptationRecord {
                id: AdaptationId::new(),
                learner_id: learner(),
                created_at: now + chrono::Duration::minutes(offset),
                learning_velocity: LearningVelocity::Normal,
                risk_level: RiskLevel::Low,
                adaptations: Adaptations::default(),
            };
            store.append_adaptation(&record).await.unwrap();
        }

        let listed = store.list_adaptations(&learner()).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
