//! Submission orchestration.
//!
//! One submission is a single state transition:
//! `SUBMITTED -> EVALUATED -> PASSED | FAILED`. The attempt is written onto the
//! day's embedded assessment first; a pass is then handed to the unlock
//! reconciler, and only after that write succeeds is analysis run. If the
//! reconciler fails, the day is put back the way it was before the attempt.
//! Analysis and adaptation are best-effort and never change the pass/fail outcome.

use std::sync::Arc;

use learnpath_core::{
    passes, AdaptationId, AdaptationRecord, Adaptations, Clock, CompletionSource, Day, DayKey,
    GateConfig, LearnerId, Phase, PhaseId, MAX_SCORE, PASS_THRESHOLD,
};
use learnpath_progress::{
    AdaptationGenerator, DelayAnalysis, DelayDetector, PhaseAnalysis, ProgressAnalysis,
    ProgressAnalyzer,
};
use learnpath_storage::Storage;
use learnpath_unlock::{UnlockReconciler, UnlockResult, UnlockStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::evaluator::{Evaluation, Evaluator, Submission};
use crate::{AssessmentError, Result};

/// Analysis, delay and adaptation output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveReport {
    /// Pacing
    pub progress_analysis: ProgressAnalysis,
    /// Delays and risk
    pub delay_analysis: DelayAnalysis,
    /// Directives emitted
    pub adaptations: Adaptations,
    /// History entry written for this run
    pub record_id: AdaptationId,
}

/// Best-effort analysis attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressMetrics {
    /// Analysis ran
    Available(Box<AdaptiveReport>),
    /// Analysis failed; the primary result still stands
    Unavailable {
        /// Why
        reason: String,
    },
}

impl ProgressMetrics {
    /// The report, if analysis ran.
    pub fn report(&self) -> Option<&AdaptiveReport> {
        match self {
            ProgressMetrics::Available(report) => Some(report),
            ProgressMetrics::Unavailable { .. } => None,
        }
    }
}

/// Result of an assessment submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Score cleared the threshold
    Passed {
        /// Score of this attempt
        score: u32,
        /// Attempts so far
        attempts: u32,
        /// Evaluator feedback
        feedback: String,
        /// What the pass did to the gate
        unlock_result: UnlockResult,
        /// Analysis after the pass
        progress_metrics: ProgressMetrics,
    },
    /// Score fell short
    Failed {
        /// Score of this attempt
        score: u32,
        /// Points missing to pass
        score_gap: u32,
        /// Attempts so far
        attempts: u32,
        /// Evaluator feedback
        feedback: String,
    },
}

impl SubmissionOutcome {
    /// Whether this attempt passed.
    pub fn passed(&self) -> bool {
        matches!(self, SubmissionOutcome::Passed { .. })
    }

    /// Attempts recorded on the assessment so far.
    pub fn attempts(&self) -> u32 {
        match self {
            SubmissionOutcome::Passed { attempts, .. } | SubmissionOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Result of a manual task toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// Address of the task
    pub key: DayKey,
    /// Its day number
    pub day: u32,
    /// New completion state
    pub completed: bool,
    /// Analysis after the change
    pub progress_metrics: ProgressMetrics,
}

/// Entry point for submissions, resets and analysis.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: GateConfig,
    reconciler: UnlockReconciler,
    analyzer: ProgressAnalyzer,
    delays: DelayDetector,
    generator: AdaptationGenerator,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: GateConfig) -> Self {
        let config = config.normalized();
        Self {
            reconciler: UnlockReconciler::new(storage.clone(), clock.clone(), config.clone()),
            analyzer: ProgressAnalyzer::new(storage.clone(), clock.clone()),
            delays: DelayDetector::new(storage.clone(), clock.clone()),
            generator: AdaptationGenerator,
            storage,
            clock,
            config,
        }
    }

    /// Current unlock state, repairing it if needed.
    pub async fn check_unlock_status(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<UnlockStatus> {
        Ok(self.reconciler.check_unlock_status(learner_id, phase_id).await?)
    }

    /// Record a scored attempt for `day`.
    ///
    /// The pass decision is made here from the score; an evaluator verdict
    /// that disagrees is logged and ignored.
    pub async fn submit_assessment(
        &self,
        learner_id: &LearnerId,
        phase_id: PhaseId,
        day: u32,
        evaluation: Evaluation,
    ) -> Result<SubmissionOutcome> {
        if evaluation.score > u32::from(MAX_SCORE) {
            return Err(AssessmentError::Validation(format!(
                "score {} is above {}",
                evaluation.score, MAX_SCORE
            )));
        }
        let key = self.validate_day(learner_id, phase_id, day).await?;

        let score = evaluation.score as u8;
        let passed = passes(score);
        if evaluation.passed != passed {
            warn!(
                learner_id = %learner_id,
                phase_id = %phase_id,
                day,
                score,
                reported = evaluation.passed,
                "evaluator verdict disagrees with threshold, using threshold"
            );
        }

        let feedback = evaluation.feedback.clone();
        let (attempts, previous) = self
            .update_phase(learner_id, phase_id, |phase, now| {
                let target = phase
                    .day_mut(key)
                    .ok_or_else(|| AssessmentError::NotFound(format!("day {} in phase {}", day, phase_id)))?;
                let previous = target.clone();
                let assessment = target.assessment.get_or_insert_with(Default::default);
                let feedback = (!feedback.is_empty()).then(|| feedback.clone());
                assessment.record_attempt(score, feedback, now);
                let attempts = assessment.attempts;
                if passed && !target.completed {
                    target.set_completed(true, CompletionSource::Assessment, now);
                }
                Ok((attempts, previous))
            })
            .await?;

        if !passed {
            info!(learner_id = %learner_id, phase_id = %phase_id, day, score, attempts, "assessment failed");
            return Ok(SubmissionOutcome::Failed {
                score: evaluation.score,
                score_gap: u32::from(PASS_THRESHOLD) - evaluation.score,
                attempts,
                feedback: evaluation.feedback,
            });
        }

        let unlock_result = match self.reconciler.record_pass(learner_id, phase_id, day).await {
            Ok(result) => result,
            Err(e) => {
                // the pass is not counted, so the document must not show it either
                self.restore_day(learner_id, phase_id, key, previous).await;
                return Err(e.into());
            }
        };
        info!(
            learner_id = %learner_id,
            phase_id = %phase_id,
            day,
            score,
            unlocked_day = ?unlock_result.unlocked_day,
            "assessment passed"
        );

        let progress_metrics = self.best_effort_metrics(learner_id).await;
        Ok(SubmissionOutcome::Passed {
            score: evaluation.score,
            attempts,
            feedback: evaluation.feedback,
            unlock_result,
            progress_metrics,
        })
    }

    /// Evaluate answers externally, then record the result.
    ///
    /// Nothing is written when the request is invalid or the evaluator fails.
    pub async fn submit_answers(&self, submission: &Submission, evaluator: &dyn Evaluator) -> Result<SubmissionOutcome> {
        self.validate_day(&submission.learner_id, submission.phase_id, submission.day)
            .await?;

        let evaluation = evaluator.evaluate(submission).await.map_err(|e| {
            warn!(
                learner_id = %submission.learner_id,
                phase_id = %submission.phase_id,
                day = submission.day,
                error = %e,
                "evaluation failed"
            );
            AssessmentError::Upstream(e)
        })?;
        if evaluation.score > u32::from(MAX_SCORE) {
            return Err(AssessmentError::Upstream(
                crate::EvaluatorError::InvalidResponse(format!("score {} is above {}", evaluation.score, MAX_SCORE)),
            ));
        }

        self.submit_assessment(&submission.learner_id, submission.phase_id, submission.day, evaluation)
            .await
    }

    /// Mark a task completed or not by hand.
    pub async fn complete_task(
        &self,
        learner_id: &LearnerId,
        phase_id: PhaseId,
        week_index: usize,
        task_index: usize,
        completed: bool,
    ) -> Result<TaskCompletion> {
        let key = DayKey {
            phase_id,
            week_index,
            task_index,
        };

        let day = self
            .update_phase(learner_id, phase_id, |phase, now| {
                let target = phase.day_mut(key).ok_or_else(|| {
                    AssessmentError::NotFound(format!(
                        "task {}/{} in phase {}",
                        week_index, task_index, phase_id
                    ))
                })?;
                if target.completed != completed {
                    target.set_completed(completed, CompletionSource::Manual, now);
                }
                Ok(target.day)
            })
            .await?;

        info!(learner_id = %learner_id, phase_id = %phase_id, day, completed, "task completion updated");
        let progress_metrics = self.best_effort_metrics(learner_id).await;
        Ok(TaskCompletion {
            key,
            day,
            completed,
            progress_metrics,
        })
    }

    /// Rebuild one phase's unlock state from its document. Idempotent.
    pub async fn reset_unlock_status(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<UnlockStatus> {
        Ok(self.reconciler.reset(learner_id, phase_id).await?)
    }

    /// Rebuild every phase's unlock state.
    pub async fn reset_all_phases(&self, learner_id: &LearnerId) -> Result<Vec<UnlockStatus>> {
        Ok(self.reconciler.reset_all(learner_id).await?)
    }

    /// Pacing analysis only.
    pub async fn refresh_progress(&self, learner_id: &LearnerId) -> Result<ProgressAnalysis> {
        Ok(self.analyzer.analyze_learner(learner_id).await?)
    }

    /// Pacing of a single phase.
    pub async fn phase_progress(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<PhaseAnalysis> {
        Ok(self.analyzer.analyze(learner_id, phase_id).await?)
    }

    /// Delay summary only.
    pub async fn detect_delays(&self, learner_id: &LearnerId) -> Result<DelayAnalysis> {
        Ok(self.delays.detect(learner_id).await?)
    }

    /// Analyze, detect delays, and write adaptation flags and history.
    pub async fn analyze_and_adapt(&self, learner_id: &LearnerId) -> Result<AdaptiveReport> {
        let progress_analysis = self.analyzer.analyze_learner(learner_id).await?;
        let delay_analysis = self.delays.detect(learner_id).await?;
        let adaptations = self.generator.generate(&progress_analysis, &delay_analysis);

        let phases = self.storage.list_phases(learner_id).await?;
        for phase in phases.iter().filter(|p| p.total_days() > 0) {
            self.update_phase(learner_id, phase.id, |phase, now| {
                self.generator.apply(phase, &adaptations, now);
                Ok(())
            })
            .await?;
        }

        let record = AdaptationRecord {
            id: AdaptationId::new(),
            learner_id: learner_id.clone(),
            created_at: self.clock.now(),
            learning_velocity: progress_analysis.learning_velocity,
            risk_level: delay_analysis.risk_level,
            adaptations: adaptations.clone(),
        };
        self.storage.append_adaptation(&record).await?;

        info!(
            learner_id = %learner_id,
            velocity = progress_analysis.learning_velocity.as_str(),
            risk = delay_analysis.risk_level.as_str(),
            directives = adaptations.kinds().count(),
            catch_up_plans = adaptations.catch_up_plans.len(),
            "adaptation run recorded"
        );

        Ok(AdaptiveReport {
            progress_analysis,
            delay_analysis,
            adaptations,
            record_id: record.id,
        })
    }

    async fn best_effort_metrics(&self, learner_id: &LearnerId) -> ProgressMetrics {
        match self.analyze_and_adapt(learner_id).await {
            Ok(report) => ProgressMetrics::Available(Box::new(report)),
            Err(e) => {
                warn!(learner_id = %learner_id, error = %e, "progress analysis unavailable");
                ProgressMetrics::Unavailable { reason: e.to_string() }
            }
        }
    }

    /// Check that `day` exists in the phase and is unlocked.
    async fn validate_day(&self, learner_id: &LearnerId, phase_id: PhaseId, day: u32) -> Result<DayKey> {
        let phase = self.load_phase(learner_id, phase_id).await?;
        let key = phase
            .find_day(day)
            .ok_or_else(|| AssessmentError::NotFound(format!("day {} in phase {}", day, phase_id)))?;

        let status = self.reconciler.check_unlock_status(learner_id, phase_id).await?;
        if !status.unlocked_days.contains(&day) {
            return Err(AssessmentError::Validation(format!(
                "day {} is locked; complete day {} first",
                day, status.current_day
            )));
        }
        debug!(learner_id = %learner_id, phase_id = %phase_id, day, "submission validated");
        Ok(key)
    }

    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Phase> {
        self.storage
            .load_phase(learner_id, phase_id)
            .await?
            .ok_or_else(|| AssessmentError::NotFound(format!("phase {}/{}", learner_id, phase_id)))
    }

    /// Read-modify-write a phase with compare-and-swap on its revision.
    /// Put a day's completion and assessment back to `previous`.
    ///
    /// Best-effort: a failure is logged, the caller already has an error to report.
    async fn restore_day(&self, learner_id: &LearnerId, phase_id: PhaseId, key: DayKey, previous: Day) {
        let restored = self
            .update_phase(learner_id, phase_id, |phase, _| {
                if let Some(target) = phase.day_mut(key) {
                    target.completed = previous.completed;
                    target.completed_at = previous.completed_at;
                    target.completion_source = previous.completion_source;
                    target.assessment = previous.assessment.clone();
                }
                Ok(())
            })
            .await;
        match restored {
            Ok(()) => info!(learner_id = %learner_id, phase_id = %phase_id, day = previous.day, "unrecorded pass rolled back"),
            Err(e) => error!(
                learner_id = %learner_id,
                phase_id = %phase_id,
                day = previous.day,
                error = %e,
                "could not roll back unrecorded pass; reset the phase to reconcile"
            ),
        }
    }

    async fn update_phase<T, F>(&self, learner_id: &LearnerId, phase_id: PhaseId, mut edit: F) -> Result<T>
    where
        F: FnMut(&mut Phase, learnpath_core::Time) -> Result<T> + Send,
        T: Send,
    {
        for _ in 0..self.config.max_write_retries {
            let now = self.clock.now();
            let mut phase = self.load_phase(learner_id, phase_id).await?;
            let out = edit(&mut phase, now)?;
            phase.updated_at = now;

            match self.storage.save_phase(&phase).await {
                Ok(revision) => {
                    debug!(learner_id = %learner_id, phase_id = %phase_id, revision, "phase updated");
                    return Ok(out);
                }
                Err(e) if e.is_conflict() => {
                    warn!(learner_id = %learner_id, phase_id = %phase_id, error = %e, "phase write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AssessmentError::Conflict {
            key: format!("{}/phase-{}", learner_id, phase_id),
            attempts: self.config.max_write_retries,
        })
    }
}
