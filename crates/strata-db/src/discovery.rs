use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_common::{Error, Result};
use tracing::{debug, warn};

use crate::definition::Migration;
use crate::sql_file::SqlMigration;

/// Where migration definitions come from.
#[derive(Clone)]
pub enum SourceLocation {
    /// Every `.sql` file directly inside the directory.
    Directory(PathBuf),
    /// Definitions supplied in memory, e.g. compiled into the binary.
    Static(Vec<Arc<dyn Migration>>),
}

impl From<PathBuf> for SourceLocation {
    fn from(dir: PathBuf) -> Self {
        SourceLocation::Directory(dir)
    }
}

impl From<&Path> for SourceLocation {
    fn from(dir: &Path) -> Self {
        SourceLocation::Directory(dir.to_path_buf())
    }
}

/// Loads definitions from an ordered list of source locations.
///
/// The result is always sorted by name (byte order), whatever order the
/// locations are listed in or the filesystem returns entries in. A name
/// declared twice aborts discovery.
#[derive(Clone, Default)]
pub struct Discovery {
    locations: Vec<SourceLocation>,
}

impl Discovery {
    pub fn new(locations: Vec<SourceLocation>) -> Self {
        Self { locations }
    }

    pub fn from_directories<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(
            dirs.into_iter()
                .map(|dir| SourceLocation::Directory(dir.into()))
                .collect(),
        )
    }

    pub fn with_location(mut self, location: impl Into<SourceLocation>) -> Self {
        self.locations.push(location.into());
        self
    }

    pub fn with_static<M>(mut self, migrations: impl IntoIterator<Item = M>) -> Self
    where
        M: Migration + 'static,
    {
        let migrations = migrations
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Migration>)
            .collect();
        self.locations.push(SourceLocation::Static(migrations));
        self
    }

    /// First configured directory, where new migration files are created.
    pub fn primary_directory(&self) -> Option<&Path> {
        self.locations.iter().find_map(|location| match location {
            SourceLocation::Directory(dir) => Some(dir.as_path()),
            SourceLocation::Static(_) => None,
        })
    }

    pub fn discover(&self) -> Result<Vec<Arc<dyn Migration>>> {
        let mut found: BTreeMap<String, Arc<dyn Migration>> = BTreeMap::new();

        for location in &self.locations {
            let definitions = match location {
                SourceLocation::Directory(dir) => load_directory(dir)?,
                SourceLocation::Static(migrations) => migrations.clone(),
            };
            for definition in definitions {
                insert_unique(&mut found, definition)?;
            }
        }

        debug!("discovered {} migrations", found.len());
        Ok(found.into_values().collect())
    }
}

fn insert_unique(
    found: &mut BTreeMap<String, Arc<dyn Migration>>,
    definition: Arc<dyn Migration>,
) -> Result<()> {
    let name = definition.name().to_string();
    if name.is_empty() {
        return Err(Error::Discovery(format!(
            "{} has an empty migration name",
            definition.origin()
        )));
    }
    if let Some(existing) = found.get(&name) {
        return Err(Error::DuplicateMigration {
            name,
            first: existing.origin(),
            second: definition.origin(),
        });
    }
    found.insert(name, definition);
    Ok(())
}

fn load_directory(dir: &Path) -> Result<Vec<Arc<dyn Migration>>> {
    // Only a directory that is definitely absent is skipped; an unreadable
    // one must not make its migrations look deleted.
    let exists = dir.try_exists().map_err(|e| {
        Error::Discovery(format!(
            "failed to access migration directory {}: {e}",
            dir.display()
        ))
    })?;
    if !exists {
        warn!("migration directory {} does not exist, skipping", dir.display());
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Discovery(format!(
            "failed to read migration directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::Discovery(format!(
                "failed to read entry in {}: {e}",
                dir.display()
            ))
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    // Stable order so duplicate reports name the same files every run.
    paths.sort();

    let mut definitions: Vec<Arc<dyn Migration>> = Vec::new();
    for path in paths {
        match SqlMigration::load(&path)? {
            Some(migration) => definitions.push(Arc::new(migration)),
            None => debug!("skipping {}: no SQL", path.display()),
        }
    }
    Ok(definitions)
}
