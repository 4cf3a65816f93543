use rusqlite::{Connection, Transaction, TransactionBehavior};
use strata_common::{Error, Result};
use tracing::warn;

const SAVEPOINT: &str = "strata_batch";

/// Who owns the transaction a batch runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxOwnership {
    /// The runner begins, commits and rolls back its own transaction.
    #[default]
    Owned,
    /// The caller already has a transaction open and will commit it. The
    /// batch is bracketed by a savepoint instead.
    Joined,
}

/// Scoped batch transaction.
///
/// Dropping the scope without calling [`BatchScope::commit`] undoes every
/// write made through the connection since [`BatchScope::begin`]: the owned
/// transaction is rolled back, or a joined scope rolls back to its savepoint.
pub struct BatchScope<'c> {
    kind: ScopeKind<'c>,
}

enum ScopeKind<'c> {
    Owned(Transaction<'c>),
    Joined(Savepoint<'c>),
}

impl<'c> BatchScope<'c> {
    pub fn begin(conn: &'c Connection, ownership: TxOwnership) -> Result<Self> {
        let kind = match ownership {
            TxOwnership::Owned => {
                if !conn.is_autocommit() {
                    return Err(Error::Store(
                        "connection is already inside a transaction; run with joined ownership"
                            .into(),
                    ));
                }
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                    .map_err(|e| Error::Store(format!("failed to begin transaction: {e}")))?;
                ScopeKind::Owned(tx)
            }
            TxOwnership::Joined => ScopeKind::Joined(Savepoint::open(conn)?),
        };
        Ok(Self { kind })
    }

    pub fn commit(self) -> Result<()> {
        let committed = match self.kind {
            ScopeKind::Owned(tx) => tx.commit(),
            ScopeKind::Joined(savepoint) => savepoint.release(),
        };
        committed.map_err(|e| Error::Store(format!("failed to commit batch: {e}")))
    }
}

/// Named savepoint on a connection whose transaction belongs to the caller.
struct Savepoint<'c> {
    conn: &'c Connection,
    released: bool,
}

impl<'c> Savepoint<'c> {
    fn open(conn: &'c Connection) -> Result<Self> {
        conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))
            .map_err(|e| Error::Store(format!("failed to open savepoint: {e}")))?;
        Ok(Self {
            conn,
            released: false,
        })
    }

    fn release(mut self) -> rusqlite::Result<()> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {SAVEPOINT}"))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {SAVEPOINT}; RELEASE SAVEPOINT {SAVEPOINT};"
        )) {
            warn!("failed to roll back migration batch: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn owned_scope_commits() {
        let conn = setup();
        let scope = BatchScope::begin(&conn, TxOwnership::Owned).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        scope.commit().unwrap();

        assert_eq!(count(&conn), 1);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn owned_scope_rolls_back_on_drop() {
        let conn = setup();
        {
            let _scope = BatchScope::begin(&conn, TxOwnership::Owned).unwrap();
            conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        }
        assert_eq!(count(&conn), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn owned_scope_refuses_an_open_transaction() {
        let conn = setup();
        conn.execute_batch("BEGIN").unwrap();
        let err = BatchScope::begin(&conn, TxOwnership::Owned).err().unwrap();
        assert!(matches!(err, Error::Store(_)));
        // The caller's transaction is untouched.
        assert!(!conn.is_autocommit());
    }

    #[test]
    fn joined_scope_leaves_commit_to_the_caller() {
        let conn = setup();
        conn.execute_batch("BEGIN").unwrap();

        let scope = BatchScope::begin(&conn, TxOwnership::Joined).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        scope.commit().unwrap();

        assert!(!conn.is_autocommit());
        conn.execute_batch("ROLLBACK").unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn joined_scope_rolls_back_to_savepoint_only() {
        let conn = setup();
        conn.execute_batch("BEGIN").unwrap();
        conn.execute("INSERT INTO t VALUES (1)", []).unwrap();
        {
            let _scope = BatchScope::begin(&conn, TxOwnership::Joined).unwrap();
            conn.execute("INSERT INTO t VALUES (2)", []).unwrap();
        }

        assert!(!conn.is_autocommit());
        conn.execute_batch("COMMIT").unwrap();
        assert_eq!(count(&conn), 1);
    }
}
