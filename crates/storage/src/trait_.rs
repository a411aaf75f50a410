//! Storage trait abstraction.
//!
//! Writes are compare-and-swap: the caller hands back the document it read,
//! and the store only accepts it when the stored version still matches.
//! Version 0 means "must not exist yet".

use async_trait::async_trait;
use learnpath_core::{AdaptationRecord, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored version moved since the caller read it
    #[error("Write conflict on {key}: expected version {expected}, found {found}")]
    Conflict {
        /// Storage key
        key: String,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether a fresh read and retry may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Fail with [`StorageError::Conflict`] unless `expected == found`.
pub fn check_version(key: impl std::fmt::Display, expected: u64, found: u64) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StorageError::Conflict {
            key: key.to_string(),
            expected,
            found,
        })
    }
}

/// Persistence of curriculum documents.
#[async_trait]
pub trait CurriculumStore: Send + Sync {
    /// Load one phase.
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>>;

    /// All phases of a learner, ordered by phase id.
    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>>;

    /// Store a phase if `phase.revision` matches the stored revision.
    ///
    /// Returns the new revision.
    async fn save_phase(&self, phase: &Phase) -> Result<u64>;
}

/// Persistence of progress records and adaptation history.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Load the record for a learner and phase.
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>>;

    /// Store a record if `record.version` matches the stored version.
    ///
    /// Returns the new version.
    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64>;

    /// Append one adaptation run to the learner's history.
    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()>;

    /// Adaptation history of a learner, oldest first.
    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>>;
}

#[async_trait]
impl<T: CurriculumStore + ?Sized> CurriculumStore for std::sync::Arc<T> {
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>> {
        (**self).load_phase(learner_id, phase_id).await
    }

    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>> {
        (**self).list_phases(learner_id).await
    }

    async fn save_phase(&self, phase: &Phase) -> Result<u64> {
        (**self).save_phase(phase).await
    }
}

#[async_trait]
impl<T: ProgressStore + ?Sized> ProgressStore for std::sync::Arc<T> {
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        (**self).load_progress(key).await
    }

    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
        (**self).save_progress(record).await
    }

    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
        (**self).append_adaptation(record).await
    }

    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
        (**self).list_adaptations(learner_id).await
    }
}

/// Storage abstraction for learnpath data.
///
/// This trait allows different storage backends to be plugged in.
pub trait Storage: CurriculumStore + ProgressStore {}

impl<T: CurriculumStore + ProgressStore + ?Sized> Storage for T {}

pub(crate) fn phase_key(learner_id: &LearnerId, phase_id: PhaseId) -> String {
    format!("{}/phase-{}", learner_id, phase_id)
}
