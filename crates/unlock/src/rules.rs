//! Pure unlock rules.
//!
//! Everything here is a function of day sets and the day cap; the reconciler
//! wraps these with storage and retries.

use std::collections::BTreeSet;

use learnpath_core::ProgressRecord;
use serde::{Deserialize, Serialize};

/// Unlocked days implied by a set of passed days.
///
/// Day 1 is always unlocked, and each passed day unlocks its successor unless
/// that would pass `day_cap`.
pub fn derive_unlocked(completed: &BTreeSet<u32>, day_cap: u32) -> BTreeSet<u32> {
    let mut unlocked = BTreeSet::from([1]);
    unlocked.extend(
        completed
            .iter()
            .filter_map(|d| d.checked_add(1))
            .filter(|next| *next <= day_cap),
    );
    unlocked
}

/// The day the learner should work on next.
///
/// Smallest unlocked day not yet passed, or the highest unlocked day when
/// every unlocked day is passed.
pub fn current_day(unlocked: &BTreeSet<u32>, completed: &BTreeSet<u32>) -> u32 {
    unlocked
        .iter()
        .find(|d| !completed.contains(d))
        .or_else(|| unlocked.last())
        .copied()
        .unwrap_or(1)
}

/// Whether `day` could have been opened given the passes before it.
fn gate_admits(day: u32, day_cap: u32, completed: &BTreeSet<u32>) -> bool {
    match day {
        0 => false,
        1 => true,
        d => d <= day_cap && completed.contains(&(d - 1)),
    }
}

/// Outcome of rebuilding unlock state from passed assessments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rebuild {
    /// Passed days reachable through the sequential gate
    pub completed: BTreeSet<u32>,
    /// Days unlocked by `completed`
    pub unlocked: BTreeSet<u32>,
    /// Passed days that were not reachable and got dropped
    pub skipped: Vec<u32>,
}

/// Rebuild unlock state from the day numbers of passed assessments.
///
/// A passed day counts only when the gate could have let the learner in:
/// it is day 1, or the day before it counted too.
pub fn rebuild(passed_days: impl IntoIterator<Item = u32>, day_cap: u32) -> Rebuild {
    let passed: BTreeSet<u32> = passed_days.into_iter().collect();
    let mut out = Rebuild::default();

    for day in passed {
        if gate_admits(day, day_cap, &out.completed) {
            out.completed.insert(day);
        } else {
            out.skipped.push(day);
        }
    }

    out.unlocked = derive_unlocked(&out.completed, day_cap);
    out
}

/// A broken invariant found on a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    /// Day 1 is locked
    FirstDayLocked,
    /// A passed day is not unlocked
    CompletedNotUnlocked {
        /// The day
        day: u32,
    },
    /// A passed day was never reachable through the gate
    UnreachableCompletion {
        /// The day
        day: u32,
    },
    /// More days unlocked than passes can explain
    ExcessUnlocks {
        /// Unlocked count
        unlocked: usize,
        /// Passed count
        completed: usize,
    },
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Inconsistency::FirstDayLocked => write!(f, "day 1 is locked"),
            Inconsistency::CompletedNotUnlocked { day } => {
                write!(f, "day {} is passed but locked", day)
            }
            Inconsistency::UnreachableCompletion { day } => {
                write!(f, "day {} is passed but its predecessor is not", day)
            }
            Inconsistency::ExcessUnlocks { unlocked, completed } => write!(
                f,
                "{} days unlocked for {} passes",
                unlocked, completed
            ),
        }
    }
}

/// Invariant violations on a stored record.
///
/// An empty result means the record only needs, at most, its unlocked set
/// re-derived.
pub fn inconsistencies(record: &ProgressRecord, day_cap: u32) -> Vec<Inconsistency> {
    let mut found = Vec::new();

    if !record.unlocked_days.contains(&1) {
        found.push(Inconsistency::FirstDayLocked);
    }
    for &day in &record.completed_assessments {
        if !record.unlocked_days.contains(&day) {
            found.push(Inconsistency::CompletedNotUnlocked { day });
        }
        if !gate_admits(day, day_cap, &record.completed_assessments) {
            found.push(Inconsistency::UnreachableCompletion { day });
        }
    }
    if record.unlocked_days.len() > record.completed_assessments.len() + 1 {
        found.push(Inconsistency::ExcessUnlocks {
            unlocked: record.unlocked_days.len(),
            completed: record.completed_assessments.len(),
        });
    }

    found
}
