//! Adaptation directives and the flags they leave on a phase.

use serde::{Deserialize, Serialize};
use crate::id::{AdaptationId, LearnerId};
use crate::pacing::{LearningVelocity, RiskLevel};
use crate::Time;

/// Kind of adaptation directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationKind {
    /// Give the learner more time per day
    ExtendTimeline,
    /// Focus on core concepts
    SimplifyContent,
    /// Add bonus challenges
    IncreaseChallenge,
}

/// One declarative adjustment for the curriculum generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Directive
    #[serde(rename = "type")]
    pub kind: AdaptationKind,
    /// Human-readable description
    pub description: String,
    /// Category tag
    pub adjustment: String,
}

/// A plan for recovering missed days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpPlan {
    /// Plan template
    #[serde(rename = "type")]
    pub kind: String,
    /// Days to recover
    pub days_to_recover: usize,
    /// Effort estimate, two hours per missed day
    pub estimated_hours: usize,
    /// Human-readable description
    pub description: String,
}

/// Output of one adaptation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adaptations {
    /// Timeline changes
    pub schedule_adjustments: Vec<Adjustment>,
    /// Content scope changes
    pub content_modifications: Vec<Adjustment>,
    /// Difficulty changes
    pub difficulty_changes: Vec<Adjustment>,
    /// Catch-up plans
    pub catch_up_plans: Vec<CatchUpPlan>,
}

impl Adaptations {
    /// Whether the run produced nothing.
    pub fn is_empty(&self) -> bool {
        self.schedule_adjustments.is_empty()
            && self.content_modifications.is_empty()
            && self.difficulty_changes.is_empty()
            && self.catch_up_plans.is_empty()
    }

    /// All directive kinds in the run.
    pub fn kinds(&self) -> impl Iterator<Item = AdaptationKind> + '_ {
        self.schedule_adjustments
            .iter()
            .chain(&self.content_modifications)
            .chain(&self.difficulty_changes)
            .map(|a| a.kind)
    }
}

/// Content focus requested from the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    /// Core concepts only
    CoreConcepts,
}

/// Flags written onto a phase for the next regeneration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationFlags {
    /// Content should be simplified
    pub content_simplified: bool,
    /// Requested focus
    pub focus_mode: Option<FocusMode>,
    /// Daily time should be extended
    pub timeline_extended: bool,
    /// Difficulty should go up
    pub difficulty_increased: bool,
    /// Bonus content requested
    pub bonus_content: bool,
    /// Number of adaptation runs applied
    pub adaptation_count: u32,
    /// Last run
    pub last_adapted_at: Option<Time>,
}

/// History entry of one adaptation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    /// Unique identifier
    pub id: AdaptationId,
    /// Learner
    pub learner_id: LearnerId,
    /// When it ran
    pub created_at: Time,
    /// Velocity at the time
    pub learning_velocity: LearningVelocity,
    /// Risk at the time
    pub risk_level: RiskLevel,
    /// What was emitted
    pub adaptations: Adaptations,
}
