//! Unlock reconciler.
//!
//! The only writer of `unlocked_days`. Every operation is a read-modify-write
//! of one progress record guarded by the store's compare-and-swap; a lost race
//! re-reads the record and tries again, up to `max_write_retries` times.

use std::collections::BTreeSet;
use std::sync::Arc;

use learnpath_core::{
    Clock, GateConfig, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord, UnlockTrigger,
};
use learnpath_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::rules::{self, Inconsistency};
use crate::{Result, UnlockError};

/// Unlock state of one learner in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockStatus {
    /// Learner
    pub learner_id: LearnerId,
    /// Phase
    pub phase_id: PhaseId,
    /// Days the learner may open
    pub unlocked_days: BTreeSet<u32>,
    /// Days whose assessment is passed
    pub completed_assessments: BTreeSet<u32>,
    /// Day to work on next
    pub current_day: u32,
    /// Cause of the last unlock write
    pub unlock_trigger: UnlockTrigger,
    /// Invariant violations repaired by this call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repaired: Vec<Inconsistency>,
}

impl UnlockStatus {
    fn from_record(record: &ProgressRecord, repaired: Vec<Inconsistency>) -> Self {
        Self {
            learner_id: record.learner_id.clone(),
            phase_id: record.phase_id,
            unlocked_days: record.unlocked_days.clone(),
            completed_assessments: record.completed_assessments.clone(),
            current_day: rules::current_day(&record.unlocked_days, &record.completed_assessments),
            unlock_trigger: record.unlock_trigger,
            repaired,
        }
    }
}

/// What a passing submission did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// The next day was opened by this pass
    Unlocked,
    /// The next day was already open
    AlreadyUnlocked,
    /// The day was the last one allowed by the cap
    CapReached,
}

/// Result of [`UnlockReconciler::record_pass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockResult {
    /// What happened
    pub status: UnlockOutcome,
    /// The day after the passed one, unless the cap was reached
    pub unlocked_day: Option<u32>,
    /// State after the write
    pub state: UnlockStatus,
}

/// Derives and persists the canonical unlock state.
pub struct UnlockReconciler {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
}

impl UnlockReconciler {
    /// Create a new reconciler.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: GateConfig) -> Self {
        Self {
            storage,
            clock,
            config: config.normalized(),
        }
    }

    /// Gate configuration in use.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Load, create or repair the progress record and report its state.
    ///
    /// A missing record is created from the passes found in the curriculum
    /// document. A record that breaks an invariant is rebuilt from the document;
    /// one whose unlocked set merely drifted from its passes is re-derived.
    pub async fn check_unlock_status(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<UnlockStatus> {
        let key = ProgressKey::new(learner_id.clone(), phase_id);
        let cap = self.config.day_cap;

        for _ in 0..self.config.max_write_retries {
            let now = self.clock.now();

            let Some(mut record) = self.storage.load_progress(&key).await? else {
                let record = self.seed(&key).await?;
                if let Some(stored) = self.try_write(record).await? {
                    info!(key = %key, "created progress record");
                    return Ok(UnlockStatus::from_record(&stored, Vec::new()));
                }
                continue;
            };

            let found = rules::inconsistencies(&record, cap);
            if found.is_empty() {
                let derived = rules::derive_unlocked(&record.completed_assessments, cap);
                if derived == record.unlocked_days {
                    debug!(key = %key, version = record.version, "progress record consistent");
                    return Ok(UnlockStatus::from_record(&record, Vec::new()));
                }
                info!(
                    key = %key,
                    stored = ?record.unlocked_days,
                    derived = ?derived,
                    "unlocked days drifted from passes, correcting"
                );
                record.unlocked_days = derived;
            } else {
                for inconsistency in &found {
                    warn!(key = %key, %inconsistency, "progress record inconsistent, rebuilding");
                }
                let phase = self.load_phase(&key).await?;
                let rebuilt = self.rebuild_from(&phase);
                record.completed_assessments = rebuilt.completed;
                record.unlocked_days = rebuilt.unlocked;
            }

            record.unlock_trigger = UnlockTrigger::Corrected;
            record.updated_at = now;
            if let Some(stored) = self.try_write(record).await? {
                return Ok(UnlockStatus::from_record(&stored, found));
            }
        }

        Err(self.exhausted(&key))
    }

    /// Count a passed assessment for `day` and open the next day.
    ///
    /// Fails with a validation error when `day` is locked. Passing a day that
    /// is already counted changes nothing.
    pub async fn record_pass(&self, learner_id: &LearnerId, phase_id: PhaseId, day: u32) -> Result<UnlockResult> {
        let key = ProgressKey::new(learner_id.clone(), phase_id);
        let cap = self.config.day_cap;
        let next = day.checked_add(1).filter(|n| *n <= cap);

        for _ in 0..self.config.max_write_retries {
            let mut record = match self.storage.load_progress(&key).await? {
                Some(record) => record,
                None => self.seed(&key).await?,
            };

            if !record.unlocked_days.contains(&day) {
                return Err(UnlockError::Validation(format!(
                    "day {} of {} is locked (unlocked: {:?})",
                    day, key, record.unlocked_days
                )));
            }

            if record.version > 0 && record.completed_assessments.contains(&day) {
                debug!(key = %key, day, "pass already counted");
                return Ok(UnlockResult {
                    status: next.map_or(UnlockOutcome::CapReached, |_| UnlockOutcome::AlreadyUnlocked),
                    unlocked_day: next,
                    state: UnlockStatus::from_record(&record, Vec::new()),
                });
            }

            // a fresh seed may already hold this pass from the document
            let mut before = record.completed_assessments.clone();
            before.remove(&day);
            let status = match next {
                None => UnlockOutcome::CapReached,
                Some(n) if rules::derive_unlocked(&before, cap).contains(&n) => UnlockOutcome::AlreadyUnlocked,
                Some(_) => UnlockOutcome::Unlocked,
            };

            record.completed_assessments.insert(day);
            record.unlocked_days = rules::derive_unlocked(&record.completed_assessments, cap);
            record.unlock_trigger = UnlockTrigger::AutoSequential;
            record.updated_at = self.clock.now();

            if let Some(stored) = self.try_write(record).await? {
                info!(key = %key, day, unlocked_day = ?next, ?status, "assessment pass recorded");
                return Ok(UnlockResult {
                    status,
                    unlocked_day: next,
                    state: UnlockStatus::from_record(&stored, Vec::new()),
                });
            }
        }

        Err(self.exhausted(&key))
    }

    /// Rebuild the record from the curriculum document. Idempotent.
    pub async fn reset(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<UnlockStatus> {
        let key = ProgressKey::new(learner_id.clone(), phase_id);

        for _ in 0..self.config.max_write_retries {
            let now = self.clock.now();
            let phase = self.load_phase(&key).await?;
            let rebuilt = self.rebuild_from(&phase);

            let mut record = self
                .storage
                .load_progress(&key)
                .await?
                .unwrap_or_else(|| ProgressRecord::first_unlock(&key, now));
            record.completed_assessments = rebuilt.completed;
            record.unlocked_days = rebuilt.unlocked;
            record.unlock_trigger = UnlockTrigger::ResetCorrected;
            record.updated_at = now;

            if let Some(stored) = self.try_write(record).await? {
                info!(
                    key = %key,
                    completed = stored.completed_assessments.len(),
                    unlocked = stored.unlocked_days.len(),
                    "unlock status reset"
                );
                return Ok(UnlockStatus::from_record(&stored, Vec::new()));
            }
        }

        Err(self.exhausted(&key))
    }

    /// Reset every phase of a learner, in phase order.
    pub async fn reset_all(&self, learner_id: &LearnerId) -> Result<Vec<UnlockStatus>> {
        let phases = self.storage.list_phases(learner_id).await?;
        let mut out = Vec::with_capacity(phases.len());
        for phase in phases {
            out.push(self.reset(learner_id, phase.id).await?);
        }
        Ok(out)
    }

    async fn load_phase(&self, key: &ProgressKey) -> Result<Phase> {
        self.storage
            .load_phase(&key.learner_id, key.phase_id)
            .await?
            .ok_or_else(|| UnlockError::NotFound(format!("phase {}", key)))
    }

    fn rebuild_from(&self, phase: &Phase) -> rules::Rebuild {
        let rebuilt = rules::rebuild(phase.passed_days(), self.config.day_cap);
        if !rebuilt.skipped.is_empty() {
            warn!(
                learner_id = %phase.learner_id,
                phase_id = %phase.id,
                skipped = ?rebuilt.skipped,
                "passed assessments on unreachable days ignored"
            );
        }
        rebuilt
    }

    /// A new, unsaved record derived from the document.
    async fn seed(&self, key: &ProgressKey) -> Result<ProgressRecord> {
        let phase = self.load_phase(key).await?;
        let rebuilt = self.rebuild_from(&phase);
        let mut record = ProgressRecord::first_unlock(key, self.clock.now());
        record.completed_assessments = rebuilt.completed;
        record.unlocked_days = rebuilt.unlocked;
        Ok(record)
    }

    /// Compare-and-swap one record. `None` means another writer won.
    async fn try_write(&self, mut record: ProgressRecord) -> Result<Option<ProgressRecord>> {
        match self.storage.save_progress(&record).await {
            Ok(version) => {
                record.version = version;
                Ok(Some(record))
            }
            Err(e) if e.is_conflict() => {
                warn!(key = %record.key(), error = %e, "progress write conflict, retrying");
                Ok(None)
            }
            Err(e) => {
                error!(key = %record.key(), error = %e, "progress write failed");
                Err(e.into())
            }
        }
    }

    fn exhausted(&self, key: &ProgressKey) -> UnlockError {
        error!(key = %key, attempts = self.config.max_write_retries, "giving up after repeated write conflicts");
        UnlockError::Conflict {
            key: key.to_string(),
            attempts: self.config.max_write_retries,
        }
    }
}
