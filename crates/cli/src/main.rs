//! learnpath CLI - curriculum progression gating.

mod config;
mod import;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use learnpath_assessment::{Evaluation, HttpEvaluator, Orchestrator, Submission};
use learnpath_core::schema::parse_timestamp;
use learnpath_core::{Clock, LearnerId, PhaseId, SystemClock};
use learnpath_storage::CurriculumStore;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, CliConfig, Overrides};

#[derive(Parser)]
#[command(name = "learnpath")]
#[command(about = "Sequential unlock gating and pacing analysis for learning curricula", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long, global = true, env = "LEARNPATH_CONFIG")]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, value_enum, env = "LEARNPATH_BACKEND")]
    backend: Option<Backend>,

    /// Data directory
    #[arg(short, long, global = true, env = "LEARNPATH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// SQLite URL (sqlite backend)
    #[arg(long, global = true, env = "LEARNPATH_DATABASE_URL")]
    database_url: Option<String>,

    /// Highest day number that may be unlocked
    #[arg(long, global = true, env = "LEARNPATH_DAY_CAP")]
    day_cap: Option<u32>,

    /// Bypass the read-through cache
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a curriculum document (legacy roadmap or current schema)
    Import {
        learner: LearnerId,
        /// JSON document
        file: PathBuf,
        /// Phase id for a single-phase document
        #[arg(long)]
        phase: Option<PhaseId>,
        /// Start date when the document has none (defaults to now)
        #[arg(long)]
        start: Option<String>,
        /// Overwrite existing phases
        #[arg(long)]
        replace: bool,
    },
    /// Show unlock status, repairing it if needed
    Status { learner: LearnerId, phase: PhaseId },
    /// Record an already scored assessment
    Submit {
        learner: LearnerId,
        phase: PhaseId,
        day: u32,
        score: u32,
        /// Feedback to store with the attempt
        #[arg(long, default_value = "")]
        feedback: String,
    },
    /// Score answers with the external evaluator, then record the result
    Evaluate {
        learner: LearnerId,
        phase: PhaseId,
        day: u32,
        /// Answers as a JSON file
        answers: PathBuf,
        /// Evaluator endpoint
        #[arg(long, env = "LEARNPATH_EVALUATOR_URL")]
        evaluator_url: Option<String>,
    },
    /// Mark a task done (or not) by hand
    Complete {
        learner: LearnerId,
        phase: PhaseId,
        week: usize,
        task: usize,
        /// Mark it not done
        #[arg(long)]
        undo: bool,
    },
    /// Rebuild one phase's unlock state from its document
    Reset { learner: LearnerId, phase: PhaseId },
    /// Rebuild every phase's unlock state
    ResetAll { learner: LearnerId },
    /// Analyze pacing, detect delays and record adaptations
    Analyze { learner: LearnerId },
    /// Pacing analysis only
    Progress {
        learner: LearnerId,
        /// Restrict to one phase
        #[arg(long)]
        phase: Option<PhaseId>,
        /// Show the delay summary instead
        #[arg(long)]
        delays: bool,
    },
    /// Print a phase document
    Show { learner: LearnerId, phase: PhaseId },
    /// Renumber days to the continuous scheme and rebuild unlock state
    Migrate { learner: LearnerId },
}

fn init_logging() {
    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref())?.apply(Overrides {
        backend: cli.backend,
        data_dir: cli.data_dir,
        database_url: cli.database_url,
        day_cap: cli.day_cap,
        no_cache: cli.no_cache,
    });

    let storage = config.open_storage().await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orchestrator = Orchestrator::new(storage.clone(), clock.clone(), config.gate.clone());

    match cli.command {
        Commands::Import { learner, file, phase, start, replace } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let doc: serde_json::Value = serde_json::from_str(&raw)?;
            let fallback_start = match start {
                Some(s) => parse_timestamp(&s).with_context(|| format!("unparseable start date '{}'", s))?,
                None => clock.now(),
            };

            let phases = import::decode_document(&learner, &doc, phase, fallback_start)?;
            let imported = import::store_phases(storage.as_ref(), phases, replace, clock.now()).await?;
            for summary in &imported {
                orchestrator.reset_unlock_status(&learner, summary.phase_id).await?;
            }
            info!(learner_id = %learner, phases = imported.len(), "import finished");
            print_json(&imported)?;
        }
        Commands::Status { learner, phase } => {
            print_json(&orchestrator.check_unlock_status(&learner, phase).await?)?;
        }
        Commands::Submit { learner, phase, day, score, feedback } => {
            let evaluation = Evaluation {
                score,
                feedback,
                passed: score >= u32::from(learnpath_core::PASS_THRESHOLD),
            };
            print_json(&orchestrator.submit_assessment(&learner, phase, day, evaluation).await?)?;
        }
        Commands::Evaluate { learner, phase, day, answers, evaluator_url } => {
            let url = evaluator_url
                .or_else(|| config.evaluator_url.clone())
                .context("no evaluator configured; pass --evaluator-url")?;
            let raw = std::fs::read_to_string(&answers)
                .with_context(|| format!("reading {}", answers.display()))?;
            let submission = Submission {
                learner_id: learner,
                phase_id: phase,
                day,
                answers: serde_json::from_str(&raw)?,
            };
            let evaluator = HttpEvaluator::new(url, config.evaluator_timeout())?;
            print_json(&orchestrator.submit_answers(&submission, &evaluator).await?)?;
        }
        Commands::Complete { learner, phase, week, task, undo } => {
            print_json(&orchestrator.complete_task(&learner, phase, week, task, !undo).await?)?;
        }
        Commands::Reset { learner, phase } => {
            print_json(&orchestrator.reset_unlock_status(&learner, phase).await?)?;
        }
        Commands::ResetAll { learner } => {
            print_json(&orchestrator.reset_all_phases(&learner).await?)?;
        }
        Commands::Analyze { learner } => {
            print_json(&orchestrator.analyze_and_adapt(&learner).await?)?;
        }
        Commands::Progress { learner, phase, delays } => match (phase, delays) {
            (_, true) => print_json(&orchestrator.detect_delays(&learner).await?)?,
            (Some(phase), false) => print_json(&orchestrator.phase_progress(&learner, phase).await?)?,
            (None, false) => print_json(&orchestrator.refresh_progress(&learner).await?)?,
        },
        Commands::Show { learner, phase } => {
            let doc = storage
                .load_phase(&learner, phase)
                .await?
                .with_context(|| format!("phase {}/{} not found", learner, phase))?;
            print_json(&doc)?;
        }
        Commands::Migrate { learner } => {
            let changed = import::renumber_learner(storage.as_ref(), &learner, clock.now()).await?;
            for summary in &changed {
                orchestrator.reset_unlock_status(&learner, summary.phase_id).await?;
            }
            info!(learner_id = %learner, phases = changed.len(), "migration finished");
            print_json(&changed)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from(["learnpath", "--no-cache", "submit", "alice", "0", "3", "85"]).unwrap();
        assert!(cli.no_cache);
        match cli.command {
            Commands::Submit { learner, phase, day, score, .. } => {
                assert_eq!(learner.as_str(), "alice");
                assert_eq!(phase, PhaseId(0));
                assert_eq!((day, score), (3, 85));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_invalid_learner_is_rejected() {
        assert!(Cli::try_parse_from(["learnpath", "status", "../etc", "0"]).is_err());
    }
}
