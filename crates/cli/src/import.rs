//! Curriculum document import and day-number migration.

use anyhow::{bail, Context, Result};
use learnpath_core::schema::{decode_phase, migrate_legacy_phase, migrate_legacy_roadmap, renumber_days};
use learnpath_core::{LearnerId, Phase, PhaseId, RenumberReport, Time, CURRENT_SCHEMA_VERSION};
use learnpath_storage::Storage;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// One phase written by `import` or `migrate`.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase_id: PhaseId,
    pub name: String,
    pub total_days: usize,
    pub renumbered_days: usize,
    pub revision: u64,
}

impl PhaseSummary {
    fn new(phase: &Phase, report: &RenumberReport, revision: u64) -> Self {
        Self {
            phase_id: phase.id,
            name: phase.name.clone(),
            total_days: phase.total_days(),
            renumbered_days: report.changes.len(),
            revision,
        }
    }
}

/// Decode `doc` into phases for `learner_id`.
///
/// Accepts a legacy roadmap (`{"phases": ...}`), a current-schema phase
/// (has `weeks`), or a single legacy phase, which needs `phase_id`.
pub fn decode_document(
    learner_id: &LearnerId,
    doc: &Value,
    phase_id: Option<PhaseId>,
    fallback_start: Time,
) -> Result<Vec<(Phase, RenumberReport)>> {
    if doc.get("phases").is_some() {
        return Ok(migrate_legacy_roadmap(learner_id, doc, fallback_start)?);
    }

    if doc.get("weeks").is_some() {
        let mut phase = decode_phase(doc.clone())?;
        if let Some(id) = phase_id {
            phase.id = id;
        }
        if &phase.learner_id != learner_id {
            warn!(from = %phase.learner_id, to = %learner_id, "reassigning imported phase to learner");
            phase.learner_id = learner_id.clone();
        }
        let report = renumber_days(&mut phase);
        return Ok(vec![(phase, report)]);
    }

    let Some(id) = phase_id else {
        bail!("a single legacy phase needs --phase");
    };
    Ok(vec![migrate_legacy_phase(learner_id, id, doc, fallback_start)?])
}

/// Write decoded phases, refusing to overwrite unless `replace` is set.
pub async fn store_phases(
    storage: &dyn Storage,
    phases: Vec<(Phase, RenumberReport)>,
    replace: bool,
    now: Time,
) -> Result<Vec<PhaseSummary>> {
    let mut out = Vec::with_capacity(phases.len());
    for (mut phase, report) in phases {
        let existing = storage.load_phase(&phase.learner_id, phase.id).await?;
        phase.revision = match existing {
            Some(_) if !replace => bail!("phase {} already exists; pass --replace to overwrite", phase.id),
            Some(current) => current.revision,
            None => 0,
        };
        phase.schema_version = CURRENT_SCHEMA_VERSION;
        phase.updated_at = now;

        let revision = storage
            .save_phase(&phase)
            .await
            .with_context(|| format!("saving phase {}", phase.id))?;
        info!(learner_id = %phase.learner_id, phase_id = %phase.id, revision, "phase imported");
        out.push(PhaseSummary::new(&phase, &report, revision));
    }
    Ok(out)
}

/// Renumber every phase of a learner to the continuous scheme.
///
/// Returns only the phases that changed; their unlock state must be rebuilt.
pub async fn renumber_learner(storage: &dyn Storage, learner_id: &LearnerId, now: Time) -> Result<Vec<PhaseSummary>> {
    let mut changed = Vec::new();
    for mut phase in storage.list_phases(learner_id).await? {
        let report = renumber_days(&mut phase);
        if report.is_empty() {
            continue;
        }
        phase.schema_version = CURRENT_SCHEMA_VERSION;
        phase.updated_at = now;
        let revision = storage.save_phase(&phase).await?;
        changed.push(PhaseSummary::new(&phase, &report, revision));
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use learnpath_storage::{CurriculumStore, MemoryStorage};
    use serde_json::json;

    fn learner() -> LearnerId {
        LearnerId::parse("importer").unwrap()
    }

    fn roadmap() -> Value {
        json!({
            "phases": [{
                "name": "Foundations",
                "learning_plan": {
                    "metadata": { "generated_at": "2026-03-01T08:00:00" },
                    "weekly_schedule": [
                        { "title": "Week 1", "daily_tasks": [
                            { "day": 1, "task": "Install toolchain" },
                            { "day": 2, "task": "Hello world",
                              "assessment": { "score": 80, "completed": true, "attempts": 1 } }
                        ]},
                        { "daily_tasks": [
                            { "day": 1, "title": "Ownership" }
                        ]}
                    ]
                }
            }]
        })
    }

    #[tokio::test]
    async fn test_import_legacy_roadmap() {
        let store = MemoryStorage::new();
        let now = chrono::Utc::now();

        let phases = decode_document(&learner(), &roadmap(), None, now).unwrap();
        let summary = store_phases(&store, phases, false, now).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].total_days, 3);
        assert_eq!(summary[0].renumbered_days, 1);

        let phase = store.load_phase(&learner(), PhaseId(0)).await.unwrap().unwrap();
        assert_eq!(phase.passed_days(), vec![2]);
        assert!(phase.is_continuously_numbered());
    }

    #[tokio::test]
    async fn test_second_import_needs_replace() {
        let store = MemoryStorage::new();
        let now = chrono::Utc::now();

        let phases = decode_document(&learner(), &roadmap(), None, now).unwrap();
        store_phases(&store, phases.clone(), false, now).await.unwrap();
        assert!(store_phases(&store, phases.clone(), false, now).await.is_err());

        let summary = store_phases(&store, phases, true, now).await.unwrap();
        assert_eq!(summary[0].revision, 2);
    }

    #[test]
    fn test_single_legacy_phase_needs_id() {
        let doc = roadmap()["phases"][0].clone();
        let now = chrono::Utc::now();
        assert!(decode_document(&learner(), &doc, None, now).is_err());

        let phases = decode_document(&learner(), &doc, Some(PhaseId(3)), now).unwrap();
        assert_eq!(phases[0].0.id, PhaseId(3));
    }

    #[test]
    fn test_current_schema_is_reassigned() {
        let now = chrono::Utc::now();
        let mut phase = Phase::new(PhaseId(1), LearnerId::parse("someone-else").unwrap(), "Traits", now);
        phase.push_week("Week 1", &["Traits", "Generics"]);
        let doc = serde_json::to_value(&phase).unwrap();

        let phases = decode_document(&learner(), &doc, None, now).unwrap();
        assert_eq!(phases[0].0.learner_id, learner());
        assert!(phases[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_renumber_learner_touches_only_drifted_phases() {
        let store = MemoryStorage::new();
        let now = chrono::Utc::now();

        let mut clean = Phase::new(PhaseId(0), learner(), "Clean", now);
        clean.push_week("Week 1", &["a", "b"]);
        store.save_phase(&clean).await.unwrap();

        let mut drifted = Phase::new(PhaseId(1), learner(), "Drifted", now);
        drifted.push_week("Week 1", &["a", "b"]);
        drifted.push_week("Week 2", &["c"]);
        drifted.weeks[1].days[0].day = 1;
        store.save_phase(&drifted).await.unwrap();

        let changed = renumber_learner(&store, &learner(), now).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].phase_id, PhaseId(1));

        let phase = store.load_phase(&learner(), PhaseId(1)).await.unwrap().unwrap();
        assert_eq!(phase.weeks[1].days[0].day, 3);
        assert_eq!(phase.weeks[1].days[0].legacy_day, Some(1));
        assert!(renumber_learner(&store, &learner(), now).await.unwrap().is_empty());
    }
}
