//! learnpath core data models.
//!
//! This crate defines the curriculum document, the per-phase progress record
//! and the value types shared by the gating, analysis and adaptation crates.

#![warn(missing_docs)]

// Identities
mod id;

// Curriculum document
mod phase;
mod assessment;
pub mod schema;

// Gating state
mod progress;

// Analysis and adaptation
mod pacing;
mod adaptation;

// Runtime
mod clock;
mod config;

/// Timestamp type used throughout the workspace.
pub type Time = chrono::DateTime<chrono::Utc>;

// Re-exports
pub use id::*;

pub use phase::{Phase, Week, Day, DayKey, DayRef, CompletionSource};
pub use assessment::{Assessment, AssessmentStatus, passes, PASS_THRESHOLD, MAX_SCORE};
pub use schema::{CURRENT_SCHEMA_VERSION, SchemaError, RenumberReport, Renumbered};

pub use progress::{ProgressKey, ProgressRecord, UnlockTrigger};

pub use pacing::{LearningVelocity, RiskLevel};
pub use adaptation::{
    AdaptationKind, Adjustment, CatchUpPlan, Adaptations, FocusMode,
    AdaptationFlags, AdaptationRecord,
};

pub use clock::{Clock, SystemClock, FixedClock};
pub use config::{GateConfig, DEFAULT_DAY_CAP};
