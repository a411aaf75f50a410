//! Curriculum document schema and its migrations.
//!
//! Documents produced by the old content generator nest days under
//! `learning_plan.weekly_schedule[].daily_tasks[]`, name the task under one of
//! `task`, `title` or `name`, and mix per-week and phase-continuous day
//! numbers. [`migrate_legacy_phase`] converts such a document into the current
//! schema exactly once; nothing else in the workspace reads the legacy layout.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adaptation::AdaptationFlags;
use crate::assessment::{passes, Assessment, AssessmentStatus, MAX_SCORE, PASS_THRESHOLD};
use crate::id::{LearnerId, PhaseId};
use crate::phase::{CompletionSource, Day, DayKey, Phase, Week};
use crate::Time;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Errors raised while migrating a document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Document is not shaped like a phase
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Document was written by a newer build
    #[error("unsupported schema version {found} (current is {CURRENT_SCHEMA_VERSION})")]
    UnsupportedVersion {
        /// Version found in the document
        found: u32,
    },

    /// JSON decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One day whose number changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renumbered {
    /// Address of the day
    pub key: DayKey,
    /// Number before
    pub old_day: u32,
    /// Number after
    pub new_day: u32,
}

/// Result of a renumbering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenumberReport {
    /// Changed days
    pub changes: Vec<Renumbered>,
}

impl RenumberReport {
    /// Whether anything changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Assign phase-continuous day numbers in document order.
///
/// The previous number is kept in `legacy_day` the first time a day is moved.
/// Running it on an already continuous phase changes nothing.
pub fn renumber_days(phase: &mut Phase) -> RenumberReport {
    let mut report = RenumberReport::default();
    let phase_id = phase.id;
    let mut position = 0u32;

    for (week_index, week) in phase.weeks.iter_mut().enumerate() {
        for (task_index, day) in week.days.iter_mut().enumerate() {
            position += 1;
            if day.day != position {
                report.changes.push(Renumbered {
                    key: DayKey {
                        phase_id,
                        week_index,
                        task_index,
                    },
                    old_day: day.day,
                    new_day: position,
                });
                if day.legacy_day.is_none() {
                    day.legacy_day = Some(day.day);
                }
                day.day = position;
            }
        }
    }

    if !report.is_empty() {
        tracing::info!(
            phase_id = %phase_id,
            changed = report.changes.len(),
            "renumbered days to continuous scheme"
        );
    }
    report
}

/// Decode a stored document, rejecting ones from a newer schema.
pub fn decode_phase(value: Value) -> Result<Phase, SchemaError> {
    let phase: Phase = serde_json::from_value(value)?;
    if phase.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            found: phase.schema_version,
        });
    }
    Ok(phase)
}

/// Convert a legacy phase document into the current schema.
///
/// `fallback_start` is used when the document has no parseable
/// `learning_plan.metadata.generated_at`.
pub fn migrate_legacy_phase(
    learner_id: &LearnerId,
    phase_id: PhaseId,
    doc: &Value,
    fallback_start: Time,
) -> Result<(Phase, RenumberReport), SchemaError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| SchemaError::Malformed(format!("phase {} is not an object", phase_id)))?;

    let plan = obj.get("learning_plan").unwrap_or(&Value::Null);
    let start_time = plan
        .pointer("/metadata/generated_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(fallback_start);

    let name = first_str(doc, &["name", "title", "phase_name"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("Phase {}", phase_id.0 + 1));

    let mut phase = Phase::new(phase_id, learner_id.clone(), name, start_time);

    if let Some(flags) = plan.get("adaptation_flags") {
        phase.adaptation_flags = serde_json::from_value::<AdaptationFlags>(flags.clone())
            .unwrap_or_default();
    }

    let schedule = plan
        .get("weekly_schedule")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut position = 0u32;
    for (week_index, week) in schedule.iter().enumerate() {
        let title = first_str(week, &["title", "theme", "focus"])
            .map(str::to_string)
            .unwrap_or_else(|| format!("Week {}", week_index + 1));

        let tasks = week
            .get("daily_tasks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut days = Vec::with_capacity(tasks.len());
        for task in tasks {
            position += 1;
            days.push(migrate_legacy_day(task, position));
        }
        phase.weeks.push(Week { title, days });
    }

    let report = renumber_days(&mut phase);
    Ok((phase, report))
}

/// Convert a whole legacy roadmap (`{"phases": [...]}` or `{"phases": {"0": ...}}`).
pub fn migrate_legacy_roadmap(
    learner_id: &LearnerId,
    roadmap: &Value,
    fallback_start: Time,
) -> Result<Vec<(Phase, RenumberReport)>, SchemaError> {
    let phases = roadmap
        .get("phases")
        .ok_or_else(|| SchemaError::Malformed("roadmap has no phases".to_string()))?;

    let entries: Vec<(PhaseId, &Value)> = match phases {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (PhaseId(i as u32), v))
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                k.parse::<PhaseId>()
                    .map(|id| (id, v))
                    .map_err(|e| SchemaError::Malformed(e.to_string()))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(SchemaError::Malformed("phases must be a list or map".to_string())),
    };

    let mut out = Vec::with_capacity(entries.len());
    for (phase_id, doc) in entries {
        out.push(migrate_legacy_phase(learner_id, phase_id, doc, fallback_start)?);
    }
    out.sort_by_key(|(phase, _)| phase.id);
    Ok(out)
}

fn migrate_legacy_day(task: &Value, position: u32) -> Day {
    let number = task
        .get("day")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(position);

    let title = first_str(task, &["task", "title", "name"])
        .unwrap_or("Untitled")
        .to_string();

    let mut day = Day::new(number, title);

    if task.get("completed").and_then(Value::as_bool).unwrap_or(false) {
        let at = task
            .get("completed_date")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        let auto = task
            .get("auto_completed_by_assessment")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        day.completed = true;
        day.completed_at = at;
        day.completion_source = Some(if auto {
            CompletionSource::Assessment
        } else {
            CompletionSource::Manual
        });
    }

    day.assessment = task.get("assessment").and_then(migrate_legacy_assessment);

    let mut content = task.clone();
    if let Some(map) = content.as_object_mut() {
        for field in [
            "day",
            "task",
            "title",
            "name",
            "completed",
            "completed_date",
            "auto_completed_by_assessment",
            "assessment",
        ] {
            map.remove(field);
        }
    }
    day.content = content;
    day
}

fn migrate_legacy_assessment(value: &Value) -> Option<Assessment> {
    let obj = value.as_object()?;
    if obj.is_empty() {
        return None;
    }

    let raw_score = obj
        .get("score")
        .and_then(Value::as_f64)
        .map(|s| s.round().clamp(0.0, MAX_SCORE as f64) as u8)
        .unwrap_or(0);
    let flagged = obj.get("completed").and_then(Value::as_bool).unwrap_or(false);
    let completed = flagged && passes(raw_score);
    let attempts = obj
        .get("attempts")
        .and_then(Value::as_u64)
        .map(|a| a.min(u32::MAX as u64) as u32)
        .unwrap_or(0);

    let status = if completed {
        AssessmentStatus::Passed
    } else if attempts > 0 || obj.contains_key("submitted_at") {
        AssessmentStatus::Failed
    } else {
        AssessmentStatus::Pending
    };

    Some(Assessment {
        attempts,
        // a record flagged incomplete stays below the threshold
        score: if completed { raw_score } else { raw_score.min(PASS_THRESHOLD - 1) },
        last_score: (status != AssessmentStatus::Pending).then_some(raw_score),
        completed,
        status,
        submitted_at: obj
            .get("submitted_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        feedback: value
            .pointer("/evaluation/feedback")
            .and_then(Value::as_str)
            .map(str::to_string),
        assessment_data: obj.get("assessment_data").cloned().unwrap_or(Value::Null),
    })
}

fn first_str<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|f| value.get(*f).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// Parse RFC 3339, or a naive ISO timestamp/date taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<Time> {
    let raw = raw.trim();
    if let Ok(t) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&t));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| Utc.from_utc_datetime(&t))
}
