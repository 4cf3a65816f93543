use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use strata_common::{Error, Result};

use crate::definition::Migration;

static MIGRATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid migration name regex"));

/// A migration loaded from a `.sql` file.
///
/// The file is split by `-- up` and `-- down` marker lines. Without markers
/// the whole file is forward SQL. A `-- name: <name>` line in the comment
/// block at the top of the file overrides the name derived from the file
/// stem; the same comment further down is ordinary SQL.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    path: PathBuf,
    up: String,
    down: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Header,
    Up,
    Down,
}

impl SqlMigration {
    /// Read and parse a migration file. Returns `Ok(None)` when neither
    /// section holds any SQL, e.g. a freshly scaffolded file.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Discovery(format!(
                "failed to read migration file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Option<Self>> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                Error::Discovery(format!("invalid migration filename: {}", path.display()))
            })?;

        let mut name_override: Option<String> = None;
        let mut section = Section::Header;
        let mut saw_marker = false;
        // `-- name:` is only honoured in the comment block that opens the file.
        let mut leading = true;
        let mut header = Vec::new();
        let mut up = Vec::new();
        let mut down = Vec::new();

        for line in contents.lines() {
            if let Some(marker) = section_marker(path, line)? {
                section = marker;
                saw_marker = true;
                leading = false;
                continue;
            }

            match section {
                Section::Header => {
                    if leading {
                        if let Some(value) = name_directive(line) {
                            name_override =
                                Some(validate_name(path, value, name_override.is_some())?);
                            continue;
                        }
                    }
                    if !is_blank_sql(line) {
                        leading = false;
                    }
                    header.push(line);
                }
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            }
        }

        let header = header.join("\n");
        let up = if saw_marker {
            if !is_blank_sql(&header) {
                return Err(Error::Discovery(format!(
                    "SQL before the first `-- up` marker in {}",
                    path.display()
                )));
            }
            up.join("\n")
        } else {
            header
        };
        let down = down.join("\n");

        if is_blank_sql(&up) && is_blank_sql(&down) {
            return Ok(None);
        }

        let name = name_override.unwrap_or_else(|| stem.to_string());
        if name.trim().is_empty() {
            return Err(Error::Discovery(format!(
                "migration in {} has an empty name",
                path.display()
            )));
        }

        Ok(Some(Self {
            name,
            path: path.to_path_buf(),
            up: up.trim().to_string(),
            down: (!is_blank_sql(&down)).then(|| down.trim().to_string()),
        }))
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        if is_blank_sql(&self.up) {
            return Ok(());
        }
        conn.execute_batch(&self.up).map_err(|e| Error::Apply {
            name: self.name.clone(),
            message: e.to_string(),
        })
    }

    fn revert(&self, conn: &Connection) -> Result<()> {
        match &self.down {
            Some(sql) => conn.execute_batch(sql).map_err(|e| Error::Revert {
                name: self.name.clone(),
                message: e.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

/// Section a `-- up` / `-- down` marker line opens. Spacing and case are
/// ignored (`--UP` is a marker); a comment that starts with the keyword and
/// then carries only punctuation (`-- up:`) is rejected rather than read as
/// SQL, while prose such as `-- up next: widen the column` stays a comment.
fn section_marker(path: &Path, line: &str) -> Result<Option<Section>> {
    let Some(comment) = line.trim().strip_prefix("--") else {
        return Ok(None);
    };
    let comment = comment.trim();
    let word_end = comment
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(comment.len());
    let (word, rest) = comment.split_at(word_end);

    let section = if word.eq_ignore_ascii_case("up") {
        Section::Up
    } else if word.eq_ignore_ascii_case("down") {
        Section::Down
    } else {
        return Ok(None);
    };

    if rest.trim().is_empty() {
        Ok(Some(section))
    } else if rest.chars().any(char::is_alphanumeric) {
        Ok(None)
    } else {
        Err(Error::Discovery(format!(
            "malformed section marker `{}` in {}",
            line.trim(),
            path.display()
        )))
    }
}

fn validate_name(path: &Path, value: &str, already_named: bool) -> Result<String> {
    if already_named {
        return Err(Error::Discovery(format!(
            "more than one `-- name:` directive in {}",
            path.display()
        )));
    }
    if value.is_empty() {
        return Err(Error::Discovery(format!(
            "empty `-- name:` directive in {}",
            path.display()
        )));
    }
    if !MIGRATION_NAME.is_match(value) {
        return Err(Error::Discovery(format!(
            "invalid migration name `{value}` in {}: expected letters, digits, `_`, `.` or `-`",
            path.display()
        )));
    }
    Ok(value.to_string())
}

/// Value of a `-- name: <value>` comment line, if this is one.
fn name_directive(line: &str) -> Option<&str> {
    let comment = line.trim().strip_prefix("--")?.trim_start();
    let key = comment.get(..5)?;
    if key.eq_ignore_ascii_case("name:") {
        Some(comment[5..].trim())
    } else {
        None
    }
}

/// True when the text has nothing but whitespace and `--` comments.
fn is_blank_sql(sql: &str) -> bool {
    sql.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with("--")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(file: &str, contents: &str) -> Result<Option<SqlMigration>> {
        SqlMigration::parse(Path::new(file), contents)
    }

    #[test]
    fn splits_up_and_down_sections() {
        let migration = parse(
            "db/20240101_create_users.sql",
            "-- Up\nCREATE TABLE users (id INTEGER);\n\n-- DOWN\nDROP TABLE users;\n",
        )
        .unwrap()
        .unwrap();

        assert_eq!(migration.name(), "20240101_create_users");
        assert_eq!(migration.up_sql(), "CREATE TABLE users (id INTEGER);");
        assert_eq!(migration.down_sql(), Some("DROP TABLE users;"));
        assert_eq!(migration.origin(), "db/20240101_create_users.sql");
    }

    #[test]
    fn file_without_markers_is_forward_only() {
        let migration = parse("0002_index.sql", "CREATE INDEX idx ON t(a);")
            .unwrap()
            .unwrap();
        assert_eq!(migration.up_sql(), "CREATE INDEX idx ON t(a);");
        assert!(migration.down_sql().is_none());
    }

    #[test]
    fn name_directive_overrides_stem() {
        let migration = parse(
            "0003_whatever.sql",
            "-- name: 0003_accounts\n-- up\nCREATE TABLE accounts (id INTEGER);\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(migration.name(), "0003_accounts");
    }

    #[test]
    fn empty_name_directive_is_rejected() {
        let err = parse("0004.sql", "-- name:   \nSELECT 1;").unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }

    #[test]
    fn comment_only_file_yields_nothing() {
        assert!(parse("0005_todo.sql", "-- nothing yet\n\n").unwrap().is_none());
        assert!(parse("0006_empty.sql", "").unwrap().is_none());
    }

    #[test]
    fn unedited_template_yields_nothing() {
        let template = "-- Migration: add users\n\n-- up\n\n\n-- down\n\n";
        assert!(parse("20240101000000_add_users.sql", template).unwrap().is_none());
    }

    #[test]
    fn down_only_file_is_kept() {
        let migration = parse("0011_cleanup.sql", "-- up\n-- down\nDROP TABLE legacy;\n")
            .unwrap()
            .unwrap();
        assert_eq!(migration.up_sql(), "");
        assert_eq!(migration.down_sql(), Some("DROP TABLE legacy;"));
    }

    #[test]
    fn sql_before_up_marker_is_rejected() {
        let err = parse("0007.sql", "SELECT 1;\n-- up\nSELECT 2;\n").unwrap_err();
        assert!(err.to_string().contains("before the first `-- up`"));
    }

    #[test]
    fn header_comments_before_markers_are_allowed() {
        let migration = parse(
            "0008_notes.sql",
            "-- Migration: notes\n-- Created: 2024-01-01\n\n-- up\nCREATE TABLE notes (id INTEGER);\n-- down\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(migration.up_sql(), "CREATE TABLE notes (id INTEGER);");
        assert!(migration.down_sql().is_none());
    }

    #[test]
    fn apply_and_revert_execute_sections() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse(
            "0009_tags.sql",
            "-- up\nCREATE TABLE tags (id INTEGER);\nINSERT INTO tags VALUES (1);\n-- down\nDROP TABLE tags;\n",
        )
        .unwrap()
        .unwrap();

        migration.apply(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        migration.revert(&conn).unwrap();
        assert!(conn.prepare("SELECT * FROM tags").is_err());
    }

    #[test]
    fn revert_failure_is_a_revert_error() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse("0010_bad_down.sql", "-- up\nSELECT 1;\n-- down\nDROP TABLE nope;\n")
            .unwrap()
            .unwrap();

        match migration.revert(&conn).unwrap_err() {
            Error::Revert { name, .. } => assert_eq!(name, "0010_bad_down"),
            other => panic!("expected Revert error, got {other}"),
        }
    }

    #[test]
    fn unspaced_markers_split_sections() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse(
            "0006_t.sql",
            "--up\nCREATE TABLE t (id INTEGER);\n--DOWN\nDROP TABLE t;\n",
        )
        .unwrap()
        .unwrap();

        assert_eq!(migration.up_sql(), "CREATE TABLE t (id INTEGER);");
        assert_eq!(migration.down_sql(), Some("DROP TABLE t;"));

        migration.apply(&conn).unwrap();
        assert!(conn.prepare("SELECT * FROM t").is_ok());
    }

    #[test]
    fn punctuated_marker_is_rejected() {
        for contents in ["-- up:\nSELECT 1;\n", "-- up\nSELECT 1;\n--down;\nSELECT 2;\n"] {
            let err = parse("0012_typo.sql", contents).unwrap_err();
            assert!(err.to_string().contains("malformed section marker"), "{err}");
        }
    }

    #[test]
    fn prose_starting_with_a_keyword_is_a_comment() {
        let migration = parse(
            "0013_prose.sql",
            "-- Up next: widen the column\n-- up\nSELECT 1;\n-- down\n-- down the road this goes away\nSELECT 2;\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(migration.up_sql(), "SELECT 1;");
        assert_eq!(
            migration.down_sql(),
            Some("-- down the road this goes away\nSELECT 2;")
        );
    }

    #[test]
    fn name_comment_in_the_body_does_not_rename() {
        let migration = parse(
            "0005_add_name.sql",
            "ALTER TABLE users ADD COLUMN name TEXT;\n-- Name: shown in the admin list\nCREATE INDEX idx_users_name ON users(name);\n",
        )
        .unwrap()
        .unwrap();

        assert_eq!(migration.name(), "0005_add_name");
        assert!(migration.up_sql().contains("-- Name: shown in the admin list"));
    }

    #[test]
    fn name_comment_after_a_marker_does_not_rename() {
        let migration = parse(
            "0014_users.sql",
            "-- up\n-- name: something_else\nCREATE TABLE users (id INTEGER);\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(migration.name(), "0014_users");
    }

    #[test]
    fn name_directive_must_be_an_identifier() {
        let err = parse("0015.sql", "-- name: shown in the admin list\n-- up\nSELECT 1;\n")
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert!(err.to_string().contains("invalid migration name"));

        let migration = parse("0015.sql", "-- name: v1.2-users_table\n-- up\nSELECT 1;\n")
            .unwrap()
            .unwrap();
        assert_eq!(migration.name(), "v1.2-users_table");
    }

    #[test]
    fn repeated_name_directive_is_rejected() {
        let err = parse("0016.sql", "-- name: a\n-- name: b\n-- up\nSELECT 1;\n").unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }
}
