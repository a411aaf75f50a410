//! Phase model - the curriculum aggregate root.
//!
//! A phase owns its weeks and days. Days are addressed by [`DayKey`]
//! (`phase_id`, `week_index`, `task_index`) and carry an immutable,
//! phase-continuous day number assigned when the document is created or
//! migrated.

use serde::{Deserialize, Serialize};
use crate::adaptation::AdaptationFlags;
use crate::assessment::Assessment;
use crate::id::{LearnerId, PhaseId};
use crate::schema::CURRENT_SCHEMA_VERSION;
use crate::Time;

/// An ordered curriculum segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Ordinal within the learner's curriculum
    pub id: PhaseId,

    /// Owner
    pub learner_id: LearnerId,

    /// Phase name
    pub name: String,

    /// When the learning plan was generated; pacing is measured from here
    pub start_time: Time,

    /// Document schema version
    #[serde(default)]
    pub schema_version: u32,

    /// Ordered weeks
    #[serde(default)]
    pub weeks: Vec<Week>,

    /// Declarative hints for the curriculum generator
    #[serde(default)]
    pub adaptation_flags: AdaptationFlags,

    /// Optimistic concurrency token, bumped by the store on every write
    #[serde(default)]
    pub revision: u64,

    /// Last write
    pub updated_at: Time,
}

/// A week of daily tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Week {
    /// Week title
    pub title: String,

    /// Days in order
    #[serde(default)]
    pub days: Vec<Day>,
}

/// The atomic daily unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Day {
    /// Phase-continuous day number (1-based, immutable)
    pub day: u32,

    /// Task title
    pub title: String,

    /// Whether the day's task is done
    #[serde(default)]
    pub completed: bool,

    /// When the task was completed
    #[serde(default)]
    pub completed_at: Option<Time>,

    /// What completed the task
    #[serde(default)]
    pub completion_source: Option<CompletionSource>,

    /// Embedded assessment, if the day has one
    #[serde(default)]
    pub assessment: Option<Assessment>,

    /// Number the day carried before renumbering
    #[serde(default)]
    pub legacy_day: Option<u32>,

    /// Generator-owned content, opaque here
    #[serde(default)]
    pub content: serde_json::Value,
}

/// How a day got completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// Learner toggled it
    Manual,
    /// A passing assessment completed it
    Assessment,
}

/// Stable address of a day inside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    /// Owning phase
    pub phase_id: PhaseId,
    /// Index into `Phase::weeks`
    pub week_index: usize,
    /// Index into `Week::days`
    pub task_index: usize,
}

/// Borrowed view of a day with its address and continuous position.
#[derive(Debug, Clone, Copy)]
pub struct DayRef<'a> {
    /// Address
    pub key: DayKey,
    /// 1-based position in document order
    pub position: u32,
    /// The day
    pub day: &'a Day,
}

impl Phase {
    /// Create an empty phase at the current schema version.
    pub fn new(id: PhaseId, learner_id: LearnerId, name: impl Into<String>, start_time: Time) -> Self {
        Self {
            id,
            learner_id,
            name: name.into(),
            start_time,
            schema_version: CURRENT_SCHEMA_VERSION,
            weeks: Vec::new(),
            adaptation_flags: AdaptationFlags::default(),
            revision: 0,
            updated_at: start_time,
        }
    }

    /// Append a week, numbering its days after the existing ones.
    pub fn push_week(&mut self, title: impl Into<String>, day_titles: &[&str]) {
        let mut next = self.total_days() as u32 + 1;
        let days = day_titles
            .iter()
            .map(|title| {
                let day = Day::new(next, *title);
                next += 1;
                day
            })
            .collect();
        self.weeks.push(Week {
            title: title.into(),
            days,
        });
    }

    /// Iterate days in document order.
    pub fn days(&self) -> impl Iterator<Item = DayRef<'_>> {
        let phase_id = self.id;
        self.weeks
            .iter()
            .enumerate()
            .flat_map(move |(week_index, week)| {
                week.days.iter().enumerate().map(move |(task_index, day)| {
                    (
                        DayKey {
                            phase_id,
                            week_index,
                            task_index,
                        },
                        day,
                    )
                })
            })
            .zip(1u32..)
            .map(|((key, day), position)| DayRef { key, position, day })
    }

    /// Total number of days.
    pub fn total_days(&self) -> usize {
        self.weeks.iter().map(|w| w.days.len()).sum()
    }

    /// Number of completed days.
    pub fn completed_days(&self) -> usize {
        self.days().filter(|d| d.day.completed).count()
    }

    /// Find the address of a day by its day number.
    pub fn find_day(&self, day: u32) -> Option<DayKey> {
        self.days().find(|d| d.day.day == day).map(|d| d.key)
    }

    /// Borrow a day by address.
    pub fn day(&self, key: DayKey) -> Option<&Day> {
        if key.phase_id != self.id {
            return None;
        }
        self.weeks.get(key.week_index)?.days.get(key.task_index)
    }

    /// Mutably borrow a day by address.
    pub fn day_mut(&mut self, key: DayKey) -> Option<&mut Day> {
        if key.phase_id != self.id {
            return None;
        }
        self.weeks.get_mut(key.week_index)?.days.get_mut(key.task_index)
    }

    /// Day numbers whose embedded assessment is passed, ascending.
    pub fn passed_days(&self) -> Vec<u32> {
        let mut days: Vec<u32> = self
            .days()
            .filter(|d| d.day.assessment.as_ref().is_some_and(Assessment::is_passed))
            .map(|d| d.day.day)
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    /// Whether day numbers equal document positions.
    pub fn is_continuously_numbered(&self) -> bool {
        self.days().all(|d| d.day.day == d.position)
    }
}

impl Day {
    /// Create an incomplete day without an assessment.
    pub fn new(day: u32, title: impl Into<String>) -> Self {
        Self {
            day,
            title: title.into(),
            completed: false,
            completed_at: None,
            completion_source: None,
            assessment: None,
            legacy_day: None,
            content: serde_json::Value::Null,
        }
    }

    /// Mark the task completed or not.
    pub fn set_completed(&mut self, completed: bool, source: CompletionSource, at: Time) {
        self.completed = completed;
        if completed {
            self.completed_at = Some(at);
            self.completion_source = Some(source);
        } else {
            self.completed_at = None;
            self.completion_source = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Phase {
        let mut phase = Phase::new(
            PhaseId(0),
            LearnerId::parse("learner").unwrap(),
            "Foundations",
            chrono::Utc::now(),
        );
        phase.push_week("Week 1", &["Variables", "Loops", "Functions"]);
        phase.push_week("Week 2", &["Structs", "Enums"]);
        phase
    }

    #[test]
    fn test_push_week_numbers_continuously() {
        let phase = sample();
        let numbers: Vec<u32> = phase.days().map(|d| d.day.day).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(phase.is_continuously_numbered());
        assert_eq!(phase.total_days(), 5);
    }

    #[test]
    fn test_find_day_addresses_second_week() {
        let phase = sample();
        let key = phase.find_day(4).unwrap();
        assert_eq!(key.week_index, 1);
        assert_eq!(key.task_index, 0);
        assert_eq!(phase.day(key).unwrap().title, "Structs");
    }

    #[test]
    fn test_day_rejects_foreign_key() {
        let phase = sample();
        let key = DayKey {
            phase_id: PhaseId(9),
            week_index: 0,
            task_index: 0,
        };
        assert!(phase.day(key).is_none());
    }

    #[test]
    fn test_passed_days_only_counts_passes() {
        let mut phase = sample();
        let now = chrono::Utc::now();
        for (day, score) in [(1, 80), (2, 60), (3, 70)] {
            let key = phase.find_day(day).unwrap();
            let mut assessment = Assessment::default();
            assessment.record_attempt(score, None, now);
            phase.day_mut(key).unwrap().assessment = Some(assessment);
        }
        assert_eq!(phase.passed_days(), vec![1, 3]);
    }

    #[test]
    fn test_set_completed_clears_metadata() {
        let mut day = Day::new(1, "x");
        let now = chrono::Utc::now();
        day.set_completed(true, CompletionSource::Assessment, now);
        assert_eq!(day.completion_source, Some(CompletionSource::Assessment));
        day.set_completed(false, CompletionSource::Manual, now);
        assert!(day.completed_at.is_none());
        assert!(day.completion_source.is_none());
    }
}
