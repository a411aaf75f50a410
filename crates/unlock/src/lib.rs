//! Sequential unlock gate for learnpath.
//!
//! This crate provides:
//! - Pure rules deriving unlocked days from passed assessments
//! - Invariant checks on stored progress records
//! - The reconciler that persists the canonical state with compare-and-swap

#![warn(missing_docs)]

pub mod rules;
pub mod reconciler;

pub use rules::{derive_unlocked, current_day, rebuild, inconsistencies, Inconsistency, Rebuild};
pub use reconciler::{UnlockReconciler, UnlockStatus, UnlockResult, UnlockOutcome};

use learnpath_storage::StorageError;

/// Result type for unlock operations.
pub type Result<T> = std::result::Result<T, UnlockError>;

/// Errors from the unlock reconciler.
#[derive(Debug, thiserror::Error)]
pub enum UnlockError {
    /// Phase or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request breaks the gate
    #[error("Validation error: {0}")]
    Validation(String),

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
