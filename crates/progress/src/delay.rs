//! Delay detection.
//!
//! Only the tasks due by now count: a phase is behind by the number of those
//! that are still incomplete.

use std::sync::Arc;

use learnpath_core::{Clock, LearnerId, Phase, PhaseId, RiskLevel, Time};
use learnpath_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::analyzer::elapsed_days;
use crate::Result;

/// Delay of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDelay {
    /// Phase
    pub phase_id: PhaseId,
    /// Phase name
    pub phase_name: String,
    /// Due tasks not completed
    pub days_behind: usize,
    /// Tasks due by now
    pub expected_by_now: usize,
    /// Due tasks completed
    pub actually_completed: usize,
    /// Longest run of consecutive incomplete due tasks
    pub longest_missed_streak: usize,
    /// Schedule origin
    pub start_date: Time,
}

/// Template a recommendation was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// On schedule
    Motivation,
    /// Slightly behind
    GentleReminder,
    /// Clearly behind
    IntensiveCatchup,
    /// Far behind
    CurriculumAdjustment,
}

/// A catch-up suggestion for the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Template
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    /// Short heading
    pub title: String,
    /// Explanation
    pub description: String,
    /// What to do
    pub action: String,
}

impl Recommendation {
    /// The template for a risk level.
    pub fn for_risk(risk: RiskLevel, total_behind: usize) -> Self {
        let (kind, title, description, action) = match risk {
            RiskLevel::Low => (
                RecommendationKind::Motivation,
                "Keep up the great work",
                "You're on track with your learning goals. Maintain this momentum!".to_string(),
                "Continue daily practice",
            ),
            RiskLevel::Medium => (
                RecommendationKind::GentleReminder,
                "Small catch-up needed",
                format!(
                    "You're {} days behind schedule. A focused weekend can get you back on track!",
                    total_behind
                ),
                "Dedicate 2-3 hours this weekend to catch up",
            ),
            RiskLevel::High => (
                RecommendationKind::IntensiveCatchup,
                "Time for intensive catch-up",
                format!(
                    "You're {} days behind. Let's create a focused catch-up plan.",
                    total_behind
                ),
                "Switch to accelerated learning mode for 1 week",
            ),
            RiskLevel::Critical => (
                RecommendationKind::CurriculumAdjustment,
                "Curriculum adjustment needed",
                format!(
                    "You're {} days behind. Let's modify your learning path to focus on core concepts.",
                    total_behind
                ),
                "Activate emergency catch-up mode with simplified curriculum",
            ),
        };
        Self {
            kind,
            title: title.to_string(),
            description,
            action: action.to_string(),
        }
    }
}

/// Delay summary for a learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayAnalysis {
    /// Sum of `days_behind` over all phases
    pub total_days_behind: usize,
    /// Phases with at least one overdue task
    pub phases_behind_schedule: Vec<PhaseDelay>,
    /// Longest missed streak in any phase
    pub longest_streak_missed: usize,
    /// Bucket of `total_days_behind`
    pub risk_level: RiskLevel,
    /// Suggestions for the learner
    pub recommendations: Vec<Recommendation>,
}

/// Delay of one phase at `now`.
pub fn phase_delay(phase: &Phase, now: Time) -> PhaseDelay {
    let due = elapsed_days(phase.start_time, now);
    let mut expected_by_now = 0;
    let mut completed = 0;
    let mut streak = 0;
    let mut longest = 0;

    for d in phase.days().take(due) {
        expected_by_now += 1;
        if d.day.completed {
            completed += 1;
            streak = 0;
        } else {
            streak += 1;
            longest = longest.max(streak);
        }
    }

    PhaseDelay {
        phase_id: phase.id,
        phase_name: phase.name.clone(),
        days_behind: expected_by_now - completed,
        expected_by_now,
        actually_completed: completed,
        longest_missed_streak: longest,
        start_date: phase.start_time,
    }
}

/// Delay summary over a learner's phases.
pub fn detect_delays(phases: &[Phase], now: Time) -> DelayAnalysis {
    let behind: Vec<PhaseDelay> = phases
        .iter()
        .filter(|p| p.total_days() > 0)
        .map(|p| phase_delay(p, now))
        .filter(|d| d.days_behind > 0)
        .collect();

    let total_days_behind = behind.iter().map(|d| d.days_behind).sum();
    let longest_streak_missed = behind.iter().map(|d| d.longest_missed_streak).max().unwrap_or(0);
    let risk_level = RiskLevel::from_days_behind(total_days_behind);

    DelayAnalysis {
        total_days_behind,
        phases_behind_schedule: behind,
        longest_streak_missed,
        risk_level,
        recommendations: vec![Recommendation::for_risk(risk_level, total_days_behind)],
    }
}

/// Storage-backed delay detector.
pub struct DelayDetector {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl DelayDetector {
    /// Create a new detector.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Detect delays across a learner's phases.
    pub async fn detect(&self, learner_id: &LearnerId) -> Result<DelayAnalysis> {
        let phases = self.storage.list_phases(learner_id).await?;
        let analysis = detect_delays(&phases, self.clock.now());
        if analysis.risk_level >= RiskLevel::High {
            tracing::info!(
                learner_id = %learner_id,
                days_behind = analysis.total_days_behind,
                risk = analysis.risk_level.as_str(),
                "learner falling behind"
            );
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use learnpath_core::{CompletionSource, FixedClock};
    use learnpath_storage::{CurriculumStore, MemoryStorage};

    fn learner() -> LearnerId {
        LearnerId::parse("late").unwrap()
    }

    fn phase(id: u32, days_ago: i64, done: &[u32], now: Time) -> Phase {
        let mut phase = Phase::new(PhaseId(id), learner(), "Delays", now - Duration::days(days_ago));
        phase.push_week("Week 1", &["a", "b", "c", "d", "e", "f", "g"]);
        phase.push_week("Week 2", &["h", "i", "j", "k", "l", "m", "n"]);
        for &day in done {
            let key = phase.find_day(day).unwrap();
            phase.day_mut(key).unwrap().set_completed(true, CompletionSource::Manual, now);
        }
        phase
    }

    #[test]
    fn test_ten_days_four_done_is_high_risk() {
        let now = chrono::Utc::now();
        let a = detect_delays(&[phase(0, 10, &[1, 2, 3, 4], now)], now);
        assert_eq!(a.total_days_behind, 6);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(a.recommendations[0].kind, RecommendationKind::IntensiveCatchup);
        assert_eq!(a.recommendations[0].action, "Switch to accelerated learning mode for 1 week");
    }

    #[test]
    fn test_longest_streak_spans_gaps() {
        let now = chrono::Utc::now();
        // due: 1..=10, done: 1, 5, 6 -> missed runs 2-4 and 7-10
        let d = phase_delay(&phase(0, 10, &[1, 5, 6], now), now);
        assert_eq!(d.expected_by_now, 10);
        assert_eq!(d.actually_completed, 3);
        assert_eq!(d.longest_missed_streak, 4);
    }

    #[test]
    fn test_completions_ahead_of_schedule_do_not_offset_delay() {
        let now = chrono::Utc::now();
        // due: 1..=3, done: 10..=14 only
        let d = phase_delay(&phase(0, 3, &[10, 11, 12, 13, 14], now), now);
        assert_eq!(d.days_behind, 3);
    }

    #[test]
    fn test_on_schedule_is_low_with_motivation() {
        let now = chrono::Utc::now();
        let a = detect_delays(&[phase(0, 2, &[1, 2], now)], now);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.phases_behind_schedule.is_empty());
        assert_eq!(a.recommendations[0].action, "Continue daily practice");
    }

    #[test]
    fn test_delays_sum_across_phases() {
        let now = chrono::Utc::now();
        let phases = [phase(0, 3, &[], now), phase(1, 6, &[], now)];
        let a = detect_delays(&phases, now);
        assert_eq!(a.total_days_behind, 9);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.longest_streak_missed, 6);
        assert!(a.recommendations[0].description.contains("9 days"));
    }

    #[test]
    fn test_medium_template() {
        let r = Recommendation::for_risk(RiskLevel::Medium, 2);
        assert_eq!(r.kind, RecommendationKind::GentleReminder);
        assert_eq!(r.action, "Dedicate 2-3 hours this weekend to catch up");
    }

    #[tokio::test]
    async fn test_detector_reads_all_phases() {
        let now = chrono::Utc::now();
        let store = Arc::new(MemoryStorage::new());
        store.save_phase(&phase(0, 2, &[], now)).await.unwrap();
        store.save_phase(&phase(1, 1, &[], now)).await.unwrap();

        let detector = DelayDetector::new(store, Arc::new(FixedClock::new(now)));
        let a = detector.detect(&learner()).await.unwrap();
        assert_eq!(a.total_days_behind, 3);
        assert_eq!(a.risk_level, RiskLevel::Medium);
    }
}
