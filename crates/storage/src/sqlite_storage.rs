//! SQLite storage backend.
//!
//! Documents are stored as JSON text next to their version column. The
//! compare-and-swap is a single conditional `UPDATE` (or an `INSERT` that
//! must not hit an existing row), so it holds across processes sharing the
//! database file.

use async_trait::async_trait;
use learnpath_core::{AdaptationRecord, LearnerId, Phase, PhaseId, ProgressKey, ProgressRecord};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::path::Path;

use super::trait_::{check_version, phase_key, CurriculumStore, ProgressStore, Result, StorageError};

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Other(e.to_string())
}

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database at `db_url`.
    pub async fn new(db_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect(db_url)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Open (or create) a database file.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        Self::new(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        // every connection to ":memory:" is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        for ddl in [
            "CREATE TABLE IF NOT EXISTS phases (
                learner_id TEXT NOT NULL,
                phase_id INTEGER NOT NULL,
                revision INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (learner_id, phase_id)
            )",
            "CREATE TABLE IF NOT EXISTS progress (
                learner_id TEXT NOT NULL,
                phase_id INTEGER NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (learner_id, phase_id)
            )",
            "CREATE TABLE IF NOT EXISTS adaptations (
                id TEXT PRIMARY KEY,
                learner_id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_adaptations_learner ON adaptations(learner_id, created_at)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Conditional write shared by both versioned tables.
    #[allow(clippy::too_many_arguments)]
    async fn cas_write(
        &self,
        table: &'static str,
        version_col: &'static str,
        key: String,
        learner_id: &LearnerId,
        phase_id: PhaseId,
        expected: u64,
        data: String,
    ) -> Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();
        let next = expected + 1;

        let affected = if expected == 0 {
            sqlx::query(&format!(
                "INSERT INTO {table} (learner_id, phase_id, {version_col}, data, updated_at)
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING"
            ))
            .bind(learner_id.as_str())
            .bind(phase_id.0 as i64)
            .bind(next as i64)
            .bind(&data)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected()
        } else {
            sqlx::query(&format!(
                "UPDATE {table} SET {version_col} = ?, data = ?, updated_at = ?
                 WHERE learner_id = ? AND phase_id = ? AND {version_col} = ?"
            ))
            .bind(next as i64)
            .bind(&data)
            .bind(&now)
            .bind(learner_id.as_str())
            .bind(phase_id.0 as i64)
            .bind(expected as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected()
        };

        if affected == 1 {
            return Ok(next);
        }

        let found: Option<i64> = sqlx::query(&format!(
            "SELECT {version_col} FROM {table} WHERE learner_id = ? AND phase_id = ?"
        ))
        .bind(learner_id.as_str())
        .bind(phase_id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| row.try_get(0))
        .transpose()
        .map_err(db_err)?;

        let found = found.unwrap_or(0) as u64;
        check_version(&key, expected, found)?;
        // the row changed twice between the two statements
        Err(StorageError::Conflict { key, expected, found })
    }

    async fn load_versioned<T: serde::de::DeserializeOwned>(
        &self,
        table: &'static str,
        version_col: &'static str,
        learner_id: &LearnerId,
        phase_id: PhaseId,
    ) -> Result<Option<(T, u64)>> {
        let row = sqlx::query(&format!(
            "SELECT data, {version_col} FROM {table} WHERE learner_id = ? AND phase_id = ?"
        ))
        .bind(learner_id.as_str())
        .bind(phase_id.0 as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.try_get(0).map_err(db_err)?;
        let version: i64 = row.try_get(1).map_err(db_err)?;
        Ok(Some((serde_json::from_str(&data)?, version as u64)))
    }
}

#[async_trait]
impl CurriculumStore for SqliteStorage {
    async fn load_phase(&self, learner_id: &LearnerId, phase_id: PhaseId) -> Result<Option<Phase>> {
        Ok(self
            .load_versioned::<Phase>("phases", "revision", learner_id, phase_id)
            .await?
            .map(|(mut phase, revision)| {
                phase.revision = revision;
                phase
            }))
    }

    async fn list_phases(&self, learner_id: &LearnerId) -> Result<Vec<Phase>> {
        let rows = sqlx::query(
            "SELECT data, revision FROM phases WHERE learner_id = ? ORDER BY phase_id",
        )
        .bind(learner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut phases = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get(0).map_err(db_err)?;
            let revision: i64 = row.try_get(1).map_err(db_err)?;
            let mut phase: Phase = serde_json::from_str(&data)?;
            phase.revision = revision as u64;
            phases.push(phase);
        }
        Ok(phases)
    }

    async fn save_phase(&self, phase: &Phase) -> Result<u64> {
        let data = serde_json::to_string(phase)?;
        self.cas_write(
            "phases",
            "revision",
            phase_key(&phase.learner_id, phase.id),
            &phase.learner_id,
            phase.id,
            phase.revision,
            data,
        )
        .await
    }
}

#[async_trait]
impl ProgressStore for SqliteStorage {
    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>> {
        Ok(self
            .load_versioned::<ProgressRecord>("progress", "version", &key.learner_id, key.phase_id)
            .await?
            .map(|(mut record, version)| {
                record.version = version;
                record
            }))
    }

    async fn save_progress(&self, record: &ProgressRecord) -> Result<u64> {
        let data = serde_json::to_string(record)?;
        self.cas_write(
            "progress",
            "version",
            record.key().to_string(),
            &record.learner_id,
            record.phase_id,
            record.version,
            data,
        )
        .await
    }

    async fn append_adaptation(&self, record: &AdaptationRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO adaptations (id, learner_id, data, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.learner_id.as_str())
        .bind(data)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_adaptations(&self, learner_id: &LearnerId) -> Result<Vec<AdaptationRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM adaptations WHERE learner_id = ? ORDER BY created_at, id",
        )
        .bind(learner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let data: String = row.try_get(0).map_err(db_err)?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }
}
