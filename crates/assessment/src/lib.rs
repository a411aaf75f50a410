//! Assessment submission for learnpath.
//!
//! This crate provides:
//! - The external evaluator seam and an HTTP evaluator client
//! - The orchestrator that turns a scored submission into one state
//!   transition: record the attempt, open the next day on a pass, then run
//!   pacing analysis and adaptation best-effort

#![warn(missing_docs)]

pub mod evaluator;
pub mod orchestrator;

pub use evaluator::{normalize_score, Evaluation, Evaluator, EvaluatorError, HttpEvaluator, Submission};
pub use orchestrator::{AdaptiveReport, Orchestrator, ProgressMetrics, SubmissionOutcome, TaskCompletion};

use learnpath_progress::AnalysisError;
use learnpath_storage::StorageError;
use learnpath_unlock::UnlockError;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, AssessmentError>;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    /// Learner, phase or day does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed submission or locked day
    #[error("Validation error: {0}")]
    Validation(String),

    /// External evaluator failed; nothing was written
    #[error("Evaluation failed: {0}")]
    Upstream(#[from] EvaluatorError),

    /// Compare-and-swap kept losing
    #[error("Write conflict on {key} after {attempts} attempts")]
    Conflict {
        /// Record key
        key: String,
        /// Attempts made
        attempts: u32,
    },

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<UnlockError> for AssessmentError {
    fn from(err: UnlockError) -> Self {
        match err {
            UnlockError::NotFound(what) => AssessmentError::NotFound(what),
            UnlockError::Validation(msg) => AssessmentError::Validation(msg),
            UnlockError::Conflict { key, attempts } => AssessmentError::Conflict { key, attempts },
            UnlockError::Storage(e) => AssessmentError::Storage(e),
        }
    }
}

impl From<AnalysisError> for AssessmentError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::NotFound(what) => AssessmentError::NotFound(what),
            AnalysisError::Storage(e) => AssessmentError::Storage(e),
        }
    }
}
