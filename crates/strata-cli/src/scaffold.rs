use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use strata_config::AppConfig;
use tracing::info;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Lowercase `description` and collapse everything that is not a letter or
/// digit into single underscores.
pub fn slugify(description: &str) -> String {
    NON_ALNUM
        .replace_all(&description.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// `<YYYYMMDDHHMMSS>_<slug>.sql`, so files sort in creation order.
pub fn migration_filename(description: &str, now: DateTime<Utc>) -> Result<String> {
    let slug = slugify(description);
    if slug.is_empty() {
        bail!("migration description `{description}` has no letters or digits");
    }
    Ok(format!("{}_{slug}.sql", now.format("%Y%m%d%H%M%S")))
}

/// Write an empty up/down migration into `dir`. The file stays invisible to
/// discovery until SQL is added to one of its sections.
pub fn create_migration(dir: &Path, description: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    let filename = migration_filename(description, now)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(filename);
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let template = format!(
        "-- Migration: {description}\n\
         -- Created: {}\n\
         \n\
         -- up\n\
         \n\
         \n\
         -- down\n\
         \n",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    std::fs::write(&path, template)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("created migration {}", path.display());
    Ok(path)
}

/// Write a default `config.yml` and an empty `migrations/` directory into
/// `dir`. Refuses to overwrite an existing config.
pub fn init_project(dir: &Path) -> Result<PathBuf> {
    let config_path = dir.join("config.yml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let config = AppConfig::default();
    for source in &config.migrations.sources {
        let source = dir.join(source);
        std::fs::create_dir_all(&source)
            .with_context(|| format!("failed to create {}", source.display()))?;
    }

    let yaml = serde_yaml::to_string(&config).context("failed to serialize config")?;
    std::fs::write(&config_path, &yaml)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    info!("config written to {}", config_path.display());
    Ok(config_path)
}
