//! CLI configuration: JSON file first, then flags and environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use learnpath_core::GateConfig;
use learnpath_storage::{CachedStorage, JsonStorage, MemoryStorage, Storage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// One JSON file per document under the data directory
    #[default]
    Json,
    /// Process memory; gone on exit
    Memory,
    /// SQLite database (needs the `sqlite` feature)
    Sqlite,
}

/// Everything the CLI needs to open storage and run commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Storage backend
    pub backend: Backend,
    /// Data directory for the JSON backend and the default SQLite file
    pub data_dir: PathBuf,
    /// Explicit SQLite URL
    pub database_url: Option<String>,
    /// External evaluator endpoint
    pub evaluator_url: Option<String>,
    /// Evaluator request timeout
    pub evaluator_timeout_secs: u64,
    /// Gate and cache settings
    pub gate: GateConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Json,
            data_dir: PathBuf::from(".learnpath"),
            database_url: None,
            evaluator_url: None,
            evaluator_timeout_secs: 30,
            gate: GateConfig::default(),
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<Backend>,
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub day_cap: Option<u32>,
    pub no_cache: bool,
}

impl CliConfig {
    /// Read the config file if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply flag and environment values on top.
    pub fn apply(mut self, o: Overrides) -> Self {
        if let Some(backend) = o.backend {
            self.backend = backend;
        }
        if let Some(dir) = o.data_dir {
            self.data_dir = dir;
        }
        if o.database_url.is_some() {
            self.database_url = o.database_url;
        }
        if let Some(cap) = o.day_cap {
            self.gate.day_cap = cap;
        }
        if o.no_cache {
            self.gate.cache_enabled = false;
        }
        self.gate = self.gate.normalized();
        self
    }

    /// Evaluator request timeout.
    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluator_timeout_secs.max(1))
    }

    /// Open the configured backend, behind the cache when enabled.
    pub async fn open_storage(&self) -> Result<Arc<dyn Storage>> {
        let store: Arc<dyn Storage> = match self.backend {
            Backend::Json => Arc::new(
                JsonStorage::new(&self.data_dir)
                    .await
                    .with_context(|| format!("opening {}", self.data_dir.display()))?,
            ),
            Backend::Memory => Arc::new(MemoryStorage::new()),
            Backend::Sqlite => self.open_sqlite().await?,
        };
        info!(backend = ?self.backend, cache = self.gate.cache_enabled, "storage opened");

        if self.gate.cache_enabled {
            return Ok(Arc::new(CachedStorage::new(store, self.gate.cache_ttl())));
        }
        Ok(store)
    }

    #[cfg(feature = "sqlite")]
    async fn open_sqlite(&self) -> Result<Arc<dyn Storage>> {
        use learnpath_storage::SqliteStorage;

        let store = match &self.database_url {
            Some(url) => SqliteStorage::new(url).await?,
            None => {
                std::fs::create_dir_all(&self.data_dir)?;
                SqliteStorage::new_from_path(&self.data_dir.join("learnpath.db")).await?
            }
        };
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn open_sqlite(&self) -> Result<Arc<dyn Storage>> {
        anyhow::bail!("this build has no sqlite support; rebuild with --features sqlite")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learnpath.json");
        std::fs::write(
            &path,
            r#"{"backend": "memory", "evaluator_url": "http://eval.local", "gate": {"day_cap": 30}}"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.gate.day_cap, 30);
        assert_eq!(config.gate.max_write_retries, 8);

        let config = config.apply(Overrides {
            day_cap: Some(0),
            no_cache: true,
            ..Default::default()
        });
        assert_eq!(config.gate.day_cap, 1);
        assert!(!config.gate.cache_enabled);
        assert_eq!(config.evaluator_url.as_deref(), Some("http://eval.local"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(CliConfig::load(Some(Path::new("/nonexistent/learnpath.json"))).is_err());
        assert_eq!(CliConfig::load(None).unwrap(), CliConfig::default());
    }

    #[tokio::test]
    async fn test_json_backend_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig {
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        config.open_storage().await.unwrap();
        assert!(dir.path().join("data").is_dir());
    }
}
