use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use strata_common::Result;
use strata_config::MigrationsConfig;
use tracing::{debug, info, warn};

use crate::definition::Migration;
use crate::discovery::Discovery;
use crate::ledger::Ledger;
use crate::scope::{BatchScope, TxOwnership};

/// Applies pending migrations and rolls back applied batches.
///
/// A batch is all-or-nothing: every migration in it and its ledger row are
/// written inside one [`BatchScope`], so a failure at any step leaves the
/// ledger and schema exactly as they were before the call.
///
/// The runner takes no locks of its own. Two runners racing on the same
/// database are kept apart only by the ledger's UNIQUE constraint on
/// `name`, which fails the loser's batch; deployments that start several
/// migrating processes at once should serialize them with an external lock.
#[derive(Clone)]
pub struct Runner {
    discovery: Discovery,
    ledger: Ledger,
    ownership: TxOwnership,
}

/// Result of a rollback: which batches and names were removed, and which of
/// those had no definition left to revert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackSummary {
    pub batches: Vec<i64>,
    /// Every ledger row removed, in the order it was rolled back.
    pub removed: Vec<String>,
    /// Rows removed without running `revert` because the definition is gone.
    pub missing: Vec<String>,
}

impl RollbackSummary {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied {
        batch: i64,
        applied_at: DateTime<Utc>,
    },
    /// Recorded in the ledger but no longer discoverable.
    Orphaned {
        batch: i64,
        applied_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

impl Runner {
    pub fn new(discovery: Discovery, ledger: Ledger) -> Self {
        Self {
            discovery,
            ledger,
            ownership: TxOwnership::Owned,
        }
    }

    pub fn from_config(config: &MigrationsConfig) -> Result<Self> {
        let discovery = Discovery::from_directories(config.sources.iter().cloned());
        let ledger = Ledger::new(config.table.clone())?;
        Ok(Self::new(discovery, ledger))
    }

    pub fn with_ownership(mut self, ownership: TxOwnership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn discover(&self) -> Result<Vec<Arc<dyn Migration>>> {
        self.discovery.discover()
    }

    /// Discovered migrations not yet in the ledger, in application order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<Arc<dyn Migration>>> {
        self.ledger.ensure_backing_store_exists(conn)?;
        let applied = self.ledger.applied_names(conn)?;
        Ok(self
            .discover()?
            .into_iter()
            .filter(|m| !applied.contains(m.name()))
            .collect())
    }

    /// Apply every pending migration as one new batch. Returns how many were
    /// applied; 0 means nothing was pending and nothing was written.
    pub fn run_pending(&self, conn: &Connection) -> Result<usize> {
        let pending = self.pending(conn)?;
        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(0);
        }

        let batch = self.ledger.next_batch_number(conn)?;
        let scope = BatchScope::begin(conn, self.ownership)?;

        for migration in &pending {
            info!("applying {} (batch {batch})", migration.name());
            migration.apply(conn)?;
            self.ledger
                .record_applied(conn, migration.name(), batch, Utc::now())?;
        }

        scope.commit()?;
        info!("applied {} migrations in batch {batch}", pending.len());
        Ok(pending.len())
    }

    /// Revert the most recent batch. Returns how many ledger rows were
    /// removed; 0 means the ledger was empty.
    pub fn rollback_last_batch(&self, conn: &Connection) -> Result<usize> {
        Ok(self.rollback_last_batch_detailed(conn)?.count())
    }

    pub fn rollback_last_batch_detailed(&self, conn: &Connection) -> Result<RollbackSummary> {
        self.rollback_batches(conn, 1)
    }

    /// Revert up to `steps` batches, newest first, as one all-or-nothing
    /// unit.
    pub fn rollback_batches(&self, conn: &Connection, steps: usize) -> Result<RollbackSummary> {
        self.ledger.ensure_backing_store_exists(conn)?;
        if steps == 0 || self.ledger.latest_batch(conn)?.is_none() {
            debug!("nothing to roll back");
            return Ok(RollbackSummary::default());
        }

        let discovered = self.discover()?;
        let definitions: HashMap<&str, &Arc<dyn Migration>> =
            discovered.iter().map(|m| (m.name(), m)).collect();

        let scope = BatchScope::begin(conn, self.ownership)?;
        let mut summary = RollbackSummary::default();

        while summary.batches.len() < steps {
            let Some(batch) = self.ledger.latest_batch(conn)? else {
                break;
            };

            for name in self.ledger.rows_for_batch(conn, batch)? {
                match definitions.get(name.as_str()) {
                    Some(migration) => {
                        info!("reverting {name} (batch {batch})");
                        migration.revert(conn)?;
                    }
                    None => {
                        warn!(
                            "no definition found for {name} (batch {batch}); removing ledger row without reverting"
                        );
                        summary.missing.push(name.clone());
                    }
                }
                self.ledger.forget(conn, &name)?;
                summary.removed.push(name);
            }
            summary.batches.push(batch);
        }

        scope.commit()?;
        info!(
            "rolled back {} migrations from batches {:?}",
            summary.removed.len(),
            summary.batches
        );
        Ok(summary)
    }

    /// Revert every applied batch.
    pub fn reset(&self, conn: &Connection) -> Result<RollbackSummary> {
        self.rollback_batches(conn, usize::MAX)
    }

    /// State of every discovered migration plus any orphaned ledger rows,
    /// ordered by name.
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        self.ledger.ensure_backing_store_exists(conn)?;
        let mut rows: BTreeMap<String, _> = self
            .ledger
            .rows(conn)?
            .into_iter()
            .map(|row| (row.name.clone(), row))
            .collect();

        let mut statuses = Vec::new();
        for migration in self.discover()? {
            let state = match rows.remove(migration.name()) {
                Some(row) => MigrationState::Applied {
                    batch: row.batch,
                    applied_at: row.applied_at,
                },
                None => MigrationState::Pending,
            };
            statuses.push(MigrationStatus {
                name: migration.name().to_string(),
                state,
            });
        }

        statuses.extend(rows.into_values().map(|row| MigrationStatus {
            name: row.name,
            state: MigrationState::Orphaned {
                batch: row.batch,
                applied_at: row.applied_at,
            },
        }));
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }
}
