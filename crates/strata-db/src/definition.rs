use std::fmt;

use rusqlite::Connection;
use strata_common::{Error, Result};

/// A named unit of schema change.
///
/// Definitions are applied in ascending `name` order and tracked in the
/// ledger by name, so the name must be stable and unique across every
/// configured source location. `revert` is optional and defaults to a no-op.
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, conn: &Connection) -> Result<()>;

    fn revert(&self, conn: &Connection) -> Result<()> {
        let _ = conn;
        Ok(())
    }

    /// Human-readable location of the definition, used in error messages.
    fn origin(&self) -> String {
        format!("definition `{}`", self.name())
    }
}

impl fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name())
            .field("origin", &self.origin())
            .finish()
    }
}

/// A migration compiled into the binary.
///
/// ```
/// use strata_db::StaticMigration;
///
/// pub const CREATE_USERS: StaticMigration = StaticMigration {
///     name: "0001_create_users",
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);",
///     down: Some("DROP TABLE users;"),
/// };
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticMigration {
    pub name: &'static str,
    pub up: &'static str,
    pub down: Option<&'static str>,
}

impl Migration for StaticMigration {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(self.up).map_err(|e| Error::Apply {
            name: self.name.to_string(),
            message: e.to_string(),
        })
    }

    fn revert(&self, conn: &Connection) -> Result<()> {
        match self.down {
            Some(sql) => conn.execute_batch(sql).map_err(|e| Error::Revert {
                name: self.name.to_string(),
                message: e.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn origin(&self) -> String {
        format!("static migration `{}`", self.name)
    }
}
