//! Adaptation rules.
//!
//! Maps pace and risk to declarative directives and records them as flags on
//! the phase. Task content is never touched here; the curriculum generator
//! reads the flags on its next pass.

use learnpath_core::{
    AdaptationFlags, AdaptationKind, Adaptations, Adjustment, CatchUpPlan, FocusMode,
    LearningVelocity, Phase, RiskLevel, Time,
};

use crate::analyzer::ProgressAnalysis;
use crate::delay::DelayAnalysis;

/// Hours of catch-up work planned per missed day.
pub const CATCH_UP_HOURS_PER_DAY: usize = 2;

/// Rule-based adaptation generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptationGenerator;

impl AdaptationGenerator {
    /// Directives for the current pace and risk.
    pub fn generate(&self, progress: &ProgressAnalysis, delay: &DelayAnalysis) -> Adaptations {
        let mut out = Adaptations::default();
        let struggling = progress.learning_velocity == LearningVelocity::Slow
            || matches!(delay.risk_level, RiskLevel::High | RiskLevel::Critical);

        if struggling {
            out.schedule_adjustments.push(Adjustment {
                kind: AdaptationKind::ExtendTimeline,
                description: "Extend daily learning time by 30 minutes".to_string(),
                adjustment: "timeline_extension".to_string(),
            });
            out.content_modifications.push(Adjustment {
                kind: AdaptationKind::SimplifyContent,
                description: "Focus on core concepts, reduce advanced topics".to_string(),
                adjustment: "content_simplification".to_string(),
            });
        } else if progress.learning_velocity == LearningVelocity::Fast {
            out.difficulty_changes.push(Adjustment {
                kind: AdaptationKind::IncreaseChallenge,
                description: "Add bonus challenges and advanced projects".to_string(),
                adjustment: "difficulty_increase".to_string(),
            });
        }

        if delay.total_days_behind > 0 {
            out.catch_up_plans.push(CatchUpPlan {
                kind: "weekend_intensive".to_string(),
                days_to_recover: delay.total_days_behind,
                estimated_hours: delay.total_days_behind * CATCH_UP_HOURS_PER_DAY,
                description: format!("Intensive {}-day catch-up program", delay.total_days_behind),
            });
        }

        out
    }

    /// Record directives as flags on a phase.
    ///
    /// Flags only ever get set; clearing them is up to the generator that
    /// consumes them.
    pub fn apply(&self, phase: &mut Phase, adaptations: &Adaptations, now: Time) {
        let flags: &mut AdaptationFlags = &mut phase.adaptation_flags;
        for kind in adaptations.kinds() {
            match kind {
                AdaptationKind::SimplifyContent => {
                    flags.content_simplified = true;
                    flags.focus_mode = Some(FocusMode::CoreConcepts);
                }
                AdaptationKind::ExtendTimeline => flags.timeline_extended = true,
                AdaptationKind::IncreaseChallenge => {
                    flags.difficulty_increased = true;
                    flags.bonus_content = true;
                }
            }
        }
        flags.adaptation_count = flags.adaptation_count.saturating_add(1);
        flags.last_adapted_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{ExpectedVsActual, OverallStats};
    use learnpath_core::{LearnerId, PhaseId};

    fn progress(velocity: LearningVelocity) -> ProgressAnalysis {
        ProgressAnalysis {
            learner_id: LearnerId::parse("adapt").unwrap(),
            analyzed_at: chrono::Utc::now(),
            overall_stats: OverallStats::default(),
            phases: Vec::new(),
            daily_completion_rate: 0.0,
            expected_vs_actual: ExpectedVsActual::default(),
            learning_velocity: velocity,
        }
    }

    fn delay(total_days_behind: usize) -> DelayAnalysis {
        DelayAnalysis {
            total_days_behind,
            phases_behind_schedule: Vec::new(),
            longest_streak_missed: 0,
            risk_level: RiskLevel::from_days_behind(total_days_behind),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn test_slow_learner_gets_simplified() {
        let a = AdaptationGenerator.generate(&progress(LearningVelocity::Slow), &delay(0));
        let kinds: Vec<AdaptationKind> = a.kinds().collect();
        assert_eq!(kinds, vec![AdaptationKind::ExtendTimeline, AdaptationKind::SimplifyContent]);
        assert!(a.catch_up_plans.is_empty());
    }

    #[test]
    fn test_high_risk_overrides_fast_velocity() {
        let a = AdaptationGenerator.generate(&progress(LearningVelocity::Fast), &delay(5));
        assert!(a.difficulty_changes.is_empty());
        assert_eq!(a.schedule_adjustments.len(), 1);
    }

    #[test]
    fn test_fast_learner_gets_challenge() {
        let a = AdaptationGenerator.generate(&progress(LearningVelocity::Fast), &delay(0));
        assert_eq!(a.difficulty_changes[0].kind, AdaptationKind::IncreaseChallenge);
        assert!(a.schedule_adjustments.is_empty());
    }

    #[test]
    fn test_catch_up_plan_sizing() {
        let a = AdaptationGenerator.generate(&progress(LearningVelocity::Normal), &delay(3));
        assert_eq!(a.catch_up_plans.len(), 1);
        assert_eq!(a.catch_up_plans[0].estimated_hours, 6);
        assert_eq!(a.catch_up_plans[0].kind, "weekend_intensive");
        // medium risk at normal pace changes nothing else
        assert_eq!(a.kinds().count(), 0);
    }

    #[test]
    fn test_apply_sets_flags_and_counts() {
        let now = chrono::Utc::now();
        let mut phase = Phase::new(PhaseId(0), LearnerId::parse("adapt").unwrap(), "p", now);
        let slow = AdaptationGenerator.generate(&progress(LearningVelocity::Slow), &delay(0));

        AdaptationGenerator.apply(&mut phase, &slow, now);
        assert!(phase.adaptation_flags.content_simplified);
        assert!(phase.adaptation_flags.timeline_extended);
        assert_eq!(phase.adaptation_flags.focus_mode, Some(FocusMode::CoreConcepts));
        assert!(!phase.adaptation_flags.difficulty_increased);

        AdaptationGenerator.apply(&mut phase, &Adaptations::default(), now);
        assert_eq!(phase.adaptation_flags.adaptation_count, 2);
        assert_eq!(phase.adaptation_flags.last_adapted_at, Some(now));
    }
}
