use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use harvest_core::RunTables;
use harvest_postgres::PgConfig;
use harvest_reddit::RedditSettings;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

/// Which backend runs are tracked in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteSection {
    pub path: PathBuf,
}

impl Default for SqliteSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("harvest.db"),
        }
    }
}

/// Everything the binary needs, read from `harvest.toml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub store: StoreKind,
    pub postgres: PgConfig,
    pub sqlite: SqliteSection,
    pub tables: RunTables,
    pub reddit: RedditSettings,
}

impl HarvestConfig {
    /// Load `explicit` if given (it must exist), else `./harvest.toml` when
    /// present, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Command-line flags win over the file
    pub fn apply_cli(mut self, store: Option<StoreKind>, sqlite_path: Option<PathBuf>) -> Self {
        if let Some(store) = store {
            self.store = store;
        }
        if let Some(path) = sqlite_path {
            self.sqlite.path = path;
        }
        self
    }

    /// `PG*` variables win over the `[postgres]` table.
    pub fn apply_env<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.postgres = self.postgres.apply_env(lookup)?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.tables.validate()?;
        match self.store {
            StoreKind::Postgres => self.postgres.validate()?,
            StoreKind::Sqlite => {
                if self.sqlite.path.as_os_str().is_empty() {
                    bail!("sqlite path is empty");
                }
            }
        }
        Ok(())
    }
}
