use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_LEDGER_TABLE: &str = "_strata_migrations";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Top-level configuration, read from `config.yml` / `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. `:memory:` opens a throwaway in-memory database.
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("strata.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directories scanned for `.sql` migration files, in configured order.
    pub sources: Vec<PathBuf>,
    /// Name of the ledger table recording applied migrations.
    pub table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            sources: vec![PathBuf::from("migrations")],
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Rebase relative database and source paths onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if is_relative_file(&self.database.path) {
            self.database.path = base.join(&self.database.path);
        }
        for source in &mut self.migrations.sources {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
    }
}

fn is_relative_file(path: &Path) -> bool {
    path.is_relative() && path != Path::new(":memory:")
}
