use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::{Connection, params};
use serde::Serialize;
use strata_common::{Error, Result};
use strata_config::model::DEFAULT_LEDGER_TABLE;
use tracing::debug;

static TABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid table name regex"));

/// One applied migration as recorded in the ledger table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub id: i64,
    pub name: String,
    pub batch: i64,
    pub applied_at: DateTime<Utc>,
}

/// Durable record of applied migrations, stored in a table on the same
/// connection the migrations run against.
///
/// Every method takes the connection explicitly so ledger writes land in
/// whatever transaction the caller has open.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl Ledger {
    /// The table name is interpolated into SQL, so only plain identifiers
    /// are accepted.
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !TABLE_NAME.is_match(&table) {
            return Err(Error::Config(format!(
                "invalid ledger table name `{table}`: expected letters, digits and underscores"
            )));
        }
        Ok(Self { table })
    }

    /// Create the ledger table if it is missing. Safe to call before every
    /// operation.
    pub fn ensure_backing_store_exists(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                batch INTEGER NOT NULL CHECK (batch > 0),
                applied_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"idx_{table}_batch\" ON \"{table}\"(batch);",
            table = self.table
        ))
        .map_err(|e| Error::Store(format!("failed to create ledger table: {e}")))
    }

    pub fn applied_names(&self, conn: &Connection) -> Result<BTreeSet<String>> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM \"{}\"", self.table))
            .map_err(|e| Error::Store(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Store(format!("failed to query applied migrations: {e}")))?;

        let mut names = BTreeSet::new();
        for row in rows {
            names.insert(row.map_err(|e| Error::Store(format!("failed to read ledger row: {e}")))?);
        }
        Ok(names)
    }

    /// Highest batch number recorded, if any.
    pub fn latest_batch(&self, conn: &Connection) -> Result<Option<i64>> {
        conn.query_row(
            &format!("SELECT MAX(batch) FROM \"{}\"", self.table),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(|e| Error::Store(format!("failed to read latest batch: {e}")))
    }

    pub fn next_batch_number(&self, conn: &Connection) -> Result<i64> {
        Ok(self.latest_batch(conn)?.map_or(1, |batch| batch + 1))
    }

    /// Append a row. Fails if `name` is already recorded: the UNIQUE
    /// constraint is what stops two runners applying the same migration.
    pub fn record_applied(
        &self,
        conn: &Connection,
        name: &str,
        batch: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (name, batch, applied_at) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![
                name,
                batch,
                applied_at.to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )
        .map_err(|e| Error::Store(format!("failed to record migration `{name}`: {e}")))?;

        debug!("recorded {name} in batch {batch}");
        Ok(())
    }

    /// Names in `batch`, newest first (reverse application order).
    pub fn rows_for_batch(&self, conn: &Connection, batch: i64) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT name FROM \"{}\" WHERE batch = ?1 ORDER BY id DESC",
                self.table
            ))
            .map_err(|e| Error::Store(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![batch], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Store(format!("failed to query batch {batch}: {e}")))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row.map_err(|e| Error::Store(format!("failed to read ledger row: {e}")))?);
        }
        Ok(names)
    }

    pub fn forget(&self, conn: &Connection, name: &str) -> Result<()> {
        let removed = conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE name = ?1", self.table),
                params![name],
            )
            .map_err(|e| Error::Store(format!("failed to forget migration `{name}`: {e}")))?;

        if removed == 0 {
            debug!("forget({name}): no ledger row");
        }
        Ok(())
    }

    /// All rows in application order.
    pub fn rows(&self, conn: &Connection) -> Result<Vec<LedgerRow>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name, batch, applied_at FROM \"{}\" ORDER BY id ASC",
                self.table
            ))
            .map_err(|e| Error::Store(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], read_row)
            .map_err(|e| Error::Store(format!("failed to query ledger: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| Error::Store(format!("failed to read ledger row: {e}")))?;
            records.push(parse_row(raw)?);
        }
        Ok(records)
    }
}

type RawRow = (i64, String, i64, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn parse_row((id, name, batch, applied_at): RawRow) -> Result<LedgerRow> {
    let applied_at = DateTime::parse_from_rfc3339(&applied_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::Store(format!(
                "invalid applied_at `{applied_at}` for migration `{name}`: {e}"
            ))
        })?;
    Ok(LedgerRow {
        id,
        name,
        batch,
        applied_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Connection, Ledger) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        ledger.ensure_backing_store_exists(&conn).unwrap();
        (conn, ledger)
    }

    #[test]
    fn ensure_backing_store_is_idempotent() {
        let (conn, ledger) = setup();
        ledger.ensure_backing_store_exists(&conn).unwrap();
        ledger.ensure_backing_store_exists(&conn).unwrap();
        assert!(ledger.rows(&conn).unwrap().is_empty());
    }

    #[test]
    fn empty_ledger_starts_at_batch_one() {
        let (conn, ledger) = setup();
        assert_eq!(ledger.latest_batch(&conn).unwrap(), None);
        assert_eq!(ledger.next_batch_number(&conn).unwrap(), 1);
        assert!(ledger.applied_names(&conn).unwrap().is_empty());
    }

    #[test]
    fn next_batch_is_one_past_the_max() {
        let (conn, ledger) = setup();
        let now = Utc::now();
        ledger.record_applied(&conn, "a", 1, now).unwrap();
        ledger.record_applied(&conn, "b", 3, now).unwrap();
        assert_eq!(ledger.latest_batch(&conn).unwrap(), Some(3));
        assert_eq!(ledger.next_batch_number(&conn).unwrap(), 4);
    }

    #[test]
    fn duplicate_name_is_rejected_by_the_store() {
        let (conn, ledger) = setup();
        ledger.record_applied(&conn, "a", 1, Utc::now()).unwrap();

        let err = ledger.record_applied(&conn, "a", 2, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(ledger.rows(&conn).unwrap().len(), 1);
    }

    #[test]
    fn non_positive_batch_is_rejected_by_the_store() {
        let (conn, ledger) = setup();
        assert!(ledger.record_applied(&conn, "a", 0, Utc::now()).is_err());
    }

    #[test]
    fn rows_for_batch_are_newest_first() {
        let (conn, ledger) = setup();
        let now = Utc::now();
        ledger.record_applied(&conn, "a", 1, now).unwrap();
        ledger.record_applied(&conn, "c", 2, now).unwrap();
        ledger.record_applied(&conn, "b", 2, now).unwrap();
        ledger.record_applied(&conn, "d", 2, now).unwrap();

        assert_eq!(ledger.rows_for_batch(&conn, 2).unwrap(), vec!["d", "b", "c"]);
        assert_eq!(ledger.rows_for_batch(&conn, 1).unwrap(), vec!["a"]);
        assert!(ledger.rows_for_batch(&conn, 9).unwrap().is_empty());
    }

    #[test]
    fn forget_removes_only_the_named_row() {
        let (conn, ledger) = setup();
        let now = Utc::now();
        ledger.record_applied(&conn, "a", 1, now).unwrap();
        ledger.record_applied(&conn, "b", 1, now).unwrap();

        ledger.forget(&conn, "a").unwrap();
        ledger.forget(&conn, "never-recorded").unwrap();

        let names: Vec<_> = ledger.applied_names(&conn).unwrap().into_iter().collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn rows_round_trip_timestamps() {
        let (conn, ledger) = setup();
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        ledger.record_applied(&conn, "a", 1, at).unwrap();

        let rows = ledger.rows(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "a");
        assert_eq!(rows[0].batch, 1);
        assert_eq!(rows[0].applied_at, at);
    }

    #[test]
    fn table_name_must_be_an_identifier() {
        assert!(Ledger::new("schema_migrations").is_ok());
        assert!(Ledger::new("_ledger2").is_ok());
        assert!(matches!(
            Ledger::new("ledger; DROP TABLE users").unwrap_err(),
            Error::Config(_)
        ));
        assert!(Ledger::new("").is_err());
        assert!(Ledger::new("9lives").is_err());
    }

    #[test]
    fn custom_table_name_is_used() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("schema_log").unwrap();
        ledger.ensure_backing_store_exists(&conn).unwrap();
        ledger.record_applied(&conn, "a", 1, Utc::now()).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
