//! Ordered, batch-atomic schema migrations over SQLite.
//!
//! [`Discovery`] finds migration definitions, the [`Ledger`] records which
//! ones are applied, and the [`Runner`] applies pending definitions or
//! rolls back the latest batch inside a single [`BatchScope`].

pub mod connection;
pub mod definition;
pub mod discovery;
pub mod ledger;
pub mod runner;
pub mod scope;
pub mod sql_file;

pub use definition::{Migration, StaticMigration};
pub use discovery::{Discovery, SourceLocation};
pub use ledger::{Ledger, LedgerRow};
pub use runner::{MigrationState, MigrationStatus, RollbackSummary, Runner};
pub use scope::{BatchScope, TxOwnership};
pub use sql_file::SqlMigration;
