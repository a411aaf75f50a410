//! Progress record - per learner and phase unlock state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use crate::id::{LearnerId, PhaseId};
use crate::Time;

/// Storage key of a progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgressKey {
    /// Learner
    pub learner_id: LearnerId,
    /// Phase
    pub phase_id: PhaseId,
}

impl ProgressKey {
    /// Build a key.
    pub fn new(learner_id: LearnerId, phase_id: PhaseId) -> Self {
        Self { learner_id, phase_id }
    }
}

impl std::fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/phase-{}", self.learner_id, self.phase_id)
    }
}

/// What caused the last write of `unlocked_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockTrigger {
    /// Record created with day 1 unlocked
    FirstUnlock,
    /// Drift repaired during a status check
    Corrected,
    /// Rebuilt on explicit reset
    ResetCorrected,
    /// Next day unlocked by a passing submission
    AutoSequential,
}

impl UnlockTrigger {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockTrigger::FirstUnlock => "first_unlock",
            UnlockTrigger::Corrected => "corrected",
            UnlockTrigger::ResetCorrected => "reset_corrected",
            UnlockTrigger::AutoSequential => "auto_sequential",
        }
    }
}

impl std::fmt::Display for UnlockTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable unlock/completion state of one learner in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Learner
    pub learner_id: LearnerId,

    /// Phase
    pub phase_id: PhaseId,

    /// Days the learner may open
    pub unlocked_days: BTreeSet<u32>,

    /// Days whose assessment was passed
    pub completed_assessments: BTreeSet<u32>,

    /// Cause of the last unlock write
    pub unlock_trigger: UnlockTrigger,

    /// Version this copy was read at; 0 means never stored
    #[serde(default)]
    pub version: u64,

    /// Creation time
    pub created_at: Time,

    /// Last write
    pub updated_at: Time,
}

impl ProgressRecord {
    /// A fresh record with only day 1 unlocked.
    pub fn first_unlock(key: &ProgressKey, now: Time) -> Self {
        Self {
            learner_id: key.learner_id.clone(),
            phase_id: key.phase_id,
            unlocked_days: BTreeSet::from([1]),
            completed_assessments: BTreeSet::new(),
            unlock_trigger: UnlockTrigger::FirstUnlock,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Key of this record.
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.learner_id.clone(), self.phase_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_unlock_has_day_one() {
        let key = ProgressKey::new(LearnerId::parse("l").unwrap(), PhaseId(1));
        let record = ProgressRecord::first_unlock(&key, chrono::Utc::now());
        assert!(record.unlocked_days.contains(&1));
        assert!(record.completed_assessments.is_empty());
        assert_eq!(record.version, 0);
        assert_eq!(record.key(), key);
    }

    #[test]
    fn test_trigger_wire_names() {
        let json = serde_json::to_string(&UnlockTrigger::ResetCorrected).unwrap();
        assert_eq!(json, "\"reset_corrected\"");
        assert_eq!(UnlockTrigger::AutoSequential.to_string(), "auto_sequential");
    }
}
