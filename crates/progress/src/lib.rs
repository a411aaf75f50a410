//! Pacing analysis and adaptation for learnpath.
//!
//! Expected-versus-actual progress, delay detection with risk levels, and
//! the rules that turn both into curriculum adaptation flags.

#![warn(missing_docs)]

pub mod analyzer;
pub mod delay;
pub mod adaptation;

pub use analyzer::{
    analyze_phase, analyze_phases, ExpectedVsActual, MissedDay, OverallStats, PacingStatus,
    PhaseAnalysis, ProgressAnalysis, ProgressAnalyzer,
};
pub use delay::{
    detect_delays, phase_delay, DelayAnalysis, DelayDetector, PhaseDelay, Recommendation,
    RecommendationKind,
};
pub use adaptation::{AdaptationGenerator, CATCH_UP_HOURS_PER_DAY};

use learnpath_storage::StorageError;

/// Result type for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors from the analysis services.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Phase does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}
