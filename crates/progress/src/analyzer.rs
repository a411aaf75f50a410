//! Progress analysis.
//!
//! Pacing is measured against a one-task-per-day schedule that starts at the
//! phase's `start_time`: the task at position `i` (1-based, document order)
//! is due at `start_time + (i - 1)` days.

use std::sync::Arc;

use chrono::Duration;
use learnpath_core::{Clock, DayKey, LearnerId, LearningVelocity, Phase, PhaseId, Time};
use learnpath_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::{AnalysisError, Result};

/// Schedule status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingStatus {
    /// Nothing completed yet
    #[default]
    Pending,
    /// Some progress, within three days of schedule
    OnTrack,
    /// More than three days behind
    Behind,
    /// More completed than expected by now
    Ahead,
    /// Every task completed
    Completed,
}

impl PacingStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PacingStatus::Pending => "pending",
            PacingStatus::OnTrack => "on_track",
            PacingStatus::Behind => "behind",
            PacingStatus::Ahead => "ahead",
            PacingStatus::Completed => "completed",
        }
    }
}

/// A task whose due date passed while it is still incomplete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedDay {
    /// 1-based position in the phase
    pub day: u32,
    /// Address in the document
    pub key: DayKey,
    /// Task title
    pub title: String,
    /// When it was due
    pub expected_date: Time,
    /// Whole days since it was due
    pub days_overdue: i64,
}

/// Pacing of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAnalysis {
    /// Phase
    pub phase_id: PhaseId,
    /// Phase name
    pub phase_name: String,
    /// Schedule origin
    pub start_date: Time,
    /// Number of weeks
    pub total_weeks: usize,
    /// Number of tasks
    pub total_tasks: usize,
    /// Completed tasks
    pub completed_tasks: usize,
    /// Tasks that should be done by now
    pub expected_days_by_now: usize,
    /// Tasks actually done
    pub actual_completed_days: usize,
    /// Completed share, one decimal
    pub completion_percentage: f64,
    /// Expected minus actual, floored at zero
    pub days_behind_schedule: usize,
    /// Pace within this phase
    pub learning_velocity: LearningVelocity,
    /// Overdue incomplete tasks
    pub missed_days: Vec<MissedDay>,
    /// Schedule status
    pub status: PacingStatus,
}

/// Phase counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallStats {
    /// All phases, including ones without tasks
    pub total_phases: usize,
    /// Fully completed
    pub completed_phases: usize,
    /// Partly completed
    pub in_progress_phases: usize,
    /// Not started
    pub pending_phases: usize,
}

/// Expected versus completed days across phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedVsActual {
    /// Days expected by now
    pub expected_days: usize,
    /// Days completed
    pub actual_days: usize,
    /// Positive when ahead
    pub ahead_behind: i64,
}

/// Pacing of all of a learner's phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAnalysis {
    /// Learner
    pub learner_id: LearnerId,
    /// When the analysis ran
    pub analyzed_at: Time,
    /// Phase counts
    pub overall_stats: OverallStats,
    /// Per-phase detail, for phases with at least one task
    pub phases: Vec<PhaseAnalysis>,
    /// Completed share of all tasks, percent
    pub daily_completion_rate: f64,
    /// Aggregate schedule comparison
    pub expected_vs_actual: ExpectedVsActual,
    /// Aggregate pace
    pub learning_velocity: LearningVelocity,
}

/// Whole days between `start` and `now`, never negative.
pub(crate) fn elapsed_days(start: Time, now: Time) -> usize {
    (now - start).num_days().max(0) as usize
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Analyze one phase at `now`.
pub fn analyze_phase(phase: &Phase, now: Time) -> PhaseAnalysis {
    let total_tasks = phase.total_days();
    let completed_tasks = phase.completed_days();
    let expected = elapsed_days(phase.start_time, now).min(total_tasks);

    let missed_days = phase
        .days()
        .take(expected)
        .filter_map(|d| {
            let expected_date = phase.start_time + Duration::days(i64::from(d.position) - 1);
            (!d.day.completed && expected_date < now).then(|| MissedDay {
                day: d.position,
                key: d.key,
                title: d.day.title.clone(),
                expected_date,
                days_overdue: (now - expected_date).num_days(),
            })
        })
        .collect();

    let completion_percentage = if total_tasks > 0 {
        round1(completed_tasks as f64 / total_tasks as f64 * 100.0)
    } else {
        0.0
    };
    let days_behind_schedule = expected.saturating_sub(completed_tasks);

    let status = if total_tasks > 0 && completed_tasks == total_tasks {
        PacingStatus::Completed
    } else if days_behind_schedule > 3 {
        PacingStatus::Behind
    } else if completed_tasks > expected {
        PacingStatus::Ahead
    } else if completed_tasks > 0 {
        PacingStatus::OnTrack
    } else {
        PacingStatus::Pending
    };

    PhaseAnalysis {
        phase_id: phase.id,
        phase_name: phase.name.clone(),
        start_date: phase.start_time,
        total_weeks: phase.weeks.len(),
        total_tasks,
        completed_tasks,
        expected_days_by_now: expected,
        actual_completed_days: completed_tasks,
        completion_percentage,
        days_behind_schedule,
        learning_velocity: LearningVelocity::classify(completed_tasks, expected),
        missed_days,
        status,
    }
}

/// Aggregate analysis over a learner's phases.
pub fn analyze_phases(learner_id: &LearnerId, phases: &[Phase], now: Time) -> ProgressAnalysis {
    let mut stats = OverallStats {
        total_phases: phases.len(),
        ..Default::default()
    };
    let mut details = Vec::new();
    let (mut total_tasks, mut completed_tasks) = (0usize, 0usize);
    let (mut expected_days, mut actual_days) = (0usize, 0usize);

    for phase in phases.iter().filter(|p| p.total_days() > 0) {
        let analysis = analyze_phase(phase, now);

        total_tasks += analysis.total_tasks;
        completed_tasks += analysis.completed_tasks;
        expected_days += analysis.expected_days_by_now;
        actual_days += analysis.actual_completed_days;

        if analysis.completed_tasks == analysis.total_tasks {
            stats.completed_phases += 1;
        } else if analysis.completed_tasks > 0 {
            stats.in_progress_phases += 1;
        } else {
            stats.pending_phases += 1;
        }
        details.push(analysis);
    }

    let daily_completion_rate = if total_tasks > 0 {
        round1(completed_tasks as f64 / total_tasks as f64 * 100.0)
    } else {
        0.0
    };

    ProgressAnalysis {
        learner_id: learner_id.clone(),
        analyzed_at: now,
        overall_stats: stats,
        phases: details,
        daily_completion_rate,
        expected_vs_actual: ExpectedVsActual {
            expected_days,
            actual_days,
            ahead_behind: actual_days as i64 - expected_days as i64,
        },
        learning_velocity: LearningVelocity::classify(actual_days, expected_days),
    }
}

/// Storage-backed progress analyzer.
pub struct ProgressAnalyzer {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl ProgressAnalyzer {
    /// Create a new analyzer.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Analyze one phase.
    pub async fn analyze(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<PhaseAnalysis> {
        let phase = self
            .storage
            .load_phase(learner_id, phase_id)
            .await?
            .ok_or_else(|| AnalysisError::NotFound(format!("phase {}/{}", learner_id, phase_id)))?;
        Ok(analyze_phase(&phase, self.clock.now()))
    }

    /// Analyze every phase of a learner.
    pub async fn analyze_learner(&self, learner_id: &LearnerId) -> Result<ProgressAnalysis> {
        let phases = self.storage.list_phases(learner_id).await?;
        let analysis = analyze_phases(learner_id, &phases, self.clock.now());
        tracing::debug!(
            learner_id = %learner_id,
            phases = analysis.phases.len(),
            velocity = analysis.learning_velocity.as_str(),
            "progress analyzed"
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_core::{CompletionSource, FixedClock};
    use learnpath_storage::{CurriculumStore, MemoryStorage};

    fn learner() -> LearnerId {
        LearnerId::parse("pace").unwrap()
    }

    /// Two weeks of seven days, started `days_ago`, first `done` completed.
    fn phase(id: u32, days_ago: i64, done: u32, now: Time) -> Phase {
        let mut phase = Phase::new(PhaseId(id), learner(), format!("Phase {}", id + 1), now - Duration::days(days_ago));
        phase.push_week("Week 1", &["a", "b", "c", "d", "e", "f", "g"]);
        phase.push_week("Week 2", &["h", "i", "j", "k", "l", "m", "n"]);
        for day in 1..=done {
            let key = phase.find_day(day).unwrap();
            phase.day_mut(key).unwrap().set_completed(true, CompletionSource::Manual, now);
        }
        phase
    }

    #[test]
    fn test_ten_days_four_done_is_six_behind() {
        let now = chrono::Utc::now();
        let a = analyze_phase(&phase(0, 10, 4, now), now);

        assert_eq!(a.expected_days_by_now, 10);
        assert_eq!(a.actual_completed_days, 4);
        assert_eq!(a.days_behind_schedule, 6);
        assert_eq!(a.status, PacingStatus::Behind);
        assert_eq!(a.learning_velocity, LearningVelocity::Slow);
        assert_eq!(a.completion_percentage, 28.6);
    }

    #[test]
    fn test_missed_days_are_overdue_incomplete_ones() {
        let now = chrono::Utc::now();
        let a = analyze_phase(&phase(0, 10, 4, now), now);

        let days: Vec<u32> = a.missed_days.iter().map(|m| m.day).collect();
        assert_eq!(days, vec![5, 6, 7, 8, 9, 10]);
        // day 5 was due six days after the start
        assert_eq!(a.missed_days[0].days_overdue, 6);
        assert_eq!(a.missed_days[3].key.week_index, 1);
    }

    #[test]
    fn test_expected_is_capped_by_task_count() {
        let now = chrono::Utc::now();
        let a = analyze_phase(&phase(0, 40, 14, now), now);
        assert_eq!(a.expected_days_by_now, 14);
        assert_eq!(a.status, PacingStatus::Completed);
        assert_eq!(a.completion_percentage, 100.0);
    }

    #[test]
    fn test_fresh_phase_is_pending_and_normal() {
        let now = chrono::Utc::now();
        let a = analyze_phase(&phase(0, 0, 0, now), now);
        assert_eq!(a.expected_days_by_now, 0);
        assert_eq!(a.status, PacingStatus::Pending);
        assert_eq!(a.learning_velocity, LearningVelocity::Normal);
        assert!(a.missed_days.is_empty());
    }

    #[test]
    fn test_ahead_and_on_track() {
        let now = chrono::Utc::now();
        assert_eq!(analyze_phase(&phase(0, 2, 5, now), now).status, PacingStatus::Ahead);
        assert_eq!(analyze_phase(&phase(0, 5, 3, now), now).status, PacingStatus::OnTrack);
    }

    #[test]
    fn test_future_start_counts_nothing_expected() {
        let now = chrono::Utc::now();
        let a = analyze_phase(&phase(0, -3, 0, now), now);
        assert_eq!(a.expected_days_by_now, 0);
        assert_eq!(a.days_behind_schedule, 0);
    }

    #[test]
    fn test_aggregate_counts_and_velocity() {
        let now = chrono::Utc::now();
        let mut empty = Phase::new(PhaseId(2), learner(), "Empty", now);
        empty.weeks.clear();
        let phases = vec![phase(0, 40, 14, now), phase(1, 10, 0, now), empty];

        let a = analyze_phases(&learner(), &phases, now);
        assert_eq!(a.overall_stats.total_phases, 3);
        assert_eq!(a.overall_stats.completed_phases, 1);
        assert_eq!(a.overall_stats.pending_phases, 1);
        assert_eq!(a.phases.len(), 2);
        assert_eq!(a.expected_vs_actual.expected_days, 24);
        assert_eq!(a.expected_vs_actual.actual_days, 14);
        assert_eq!(a.expected_vs_actual.ahead_behind, -10);
        assert_eq!(a.daily_completion_rate, 50.0);
        assert_eq!(a.learning_velocity, LearningVelocity::Slow);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&PacingStatus::OnTrack).unwrap(), "\"on_track\"");
    }

    #[tokio::test]
    async fn test_analyzer_reads_from_store() {
        let now = chrono::Utc::now();
        let store = Arc::new(MemoryStorage::new());
        store.save_phase(&phase(0, 10, 4, now)).await.unwrap();

        let analyzer = ProgressAnalyzer::new(store, Arc::new(FixedClock::new(now)));
        let a = analyzer.analyze(&learner(), PhaseId(0)).await.unwrap();
        assert_eq!(a.days_behind_schedule, 6);

        assert!(matches!(
            analyzer.analyze(&learner(), PhaseId(9)).await,
            Err(AnalysisError::NotFound(_))
        ));
    }
}
