//! Assessment model - the scored check embedded in a curriculum day.

use serde::{Deserialize, Serialize};
use crate::Time;

/// Minimum score (out of 100) that passes an assessment.
pub const PASS_THRESHOLD: u8 = 70;

/// Highest score an evaluator may report.
pub const MAX_SCORE: u8 = 100;

/// Whether a score clears the pass threshold.
pub fn passes(score: u8) -> bool {
    score >= PASS_THRESHOLD
}

/// Assessment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    /// Not attempted yet
    #[default]
    Pending,
    /// Best attempt cleared the threshold
    Passed,
    /// Attempted, never cleared the threshold
    Failed,
}

/// A scored evaluation attached to a day.
///
/// `completed` is true exactly when `score >= PASS_THRESHOLD`; the only way to
/// change either is [`Assessment::record_attempt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Number of submissions so far
    #[serde(default)]
    pub attempts: u32,

    /// Best score so far (0-100)
    #[serde(default)]
    pub score: u8,

    /// Score of the most recent submission
    #[serde(default)]
    pub last_score: Option<u8>,

    /// Passed at least once
    #[serde(default)]
    pub completed: bool,

    /// Status derived from the best attempt
    #[serde(default)]
    pub status: AssessmentStatus,

    /// When the last submission was recorded
    #[serde(default)]
    pub submitted_at: Option<Time>,

    /// Evaluator feedback for the last submission
    #[serde(default)]
    pub feedback: Option<String>,

    /// Questions and other generator-owned payload, opaque here
    #[serde(default)]
    pub assessment_data: serde_json::Value,
}

impl Default for Assessment {
    fn default() -> Self {
        Self {
            attempts: 0,
            score: 0,
            last_score: None,
            completed: false,
            status: AssessmentStatus::Pending,
            submitted_at: None,
            feedback: None,
            assessment_data: serde_json::Value::Null,
        }
    }
}

impl Assessment {
    /// Record one submission and return whether this attempt passed.
    ///
    /// A failing retake never demotes an assessment that already passed: the
    /// best score is kept and only `last_score` reflects the retake.
    pub fn record_attempt(&mut self, score: u8, feedback: Option<String>, at: Time) -> bool {
        let score = score.min(MAX_SCORE);
        let passed = passes(score);

        self.attempts = self.attempts.saturating_add(1);
        self.last_score = Some(score);
        self.score = self.score.max(score);
        self.completed = passes(self.score);
        self.status = if self.completed {
            AssessmentStatus::Passed
        } else {
            AssessmentStatus::Failed
        };
        self.submitted_at = Some(at);
        self.feedback = feedback;

        passed
    }

    /// Whether the stored record counts as a pass.
    pub fn is_passed(&self) -> bool {
        self.completed && passes(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert!(passes(70));
        assert!(!passes(69));
        assert!(passes(100));
        assert!(!passes(0));
    }

    #[test]
    fn test_record_attempt_counts_and_passes() {
        let mut a = Assessment::default();
        let now = chrono::Utc::now();

        assert!(!a.record_attempt(40, Some("review loops".into()), now));
        assert_eq!(a.attempts, 1);
        assert!(!a.completed);
        assert_eq!(a.status, AssessmentStatus::Failed);

        assert!(a.record_attempt(85, None, now));
        assert_eq!(a.attempts, 2);
        assert!(a.completed);
        assert_eq!(a.score, 85);
        assert!(a.is_passed());
    }

    #[test]
    fn test_failed_retake_keeps_best_score() {
        let mut a = Assessment::default();
        let now = chrono::Utc::now();
        a.record_attempt(90, None, now);

        assert!(!a.record_attempt(30, None, now));
        assert_eq!(a.score, 90);
        assert_eq!(a.last_score, Some(30));
        assert!(a.completed);
        assert_eq!(a.status, AssessmentStatus::Passed);
    }

    #[test]
    fn test_score_is_clamped() {
        let mut a = Assessment::default();
        a.record_attempt(250, None, chrono::Utc::now());
        assert_eq!(a.score, 100);
    }

    #[test]
    fn test_is_passed_requires_both_fields() {
        let a = Assessment {
            completed: true,
            score: 50,
            ..Default::default()
        };
        assert!(!a.is_passed());
    }
}
