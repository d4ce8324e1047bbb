//! # In-Memory Backend
//!
//! A transactional store that implements the session and adapter contracts
//! without a database. It is the reference delegate used by the tests and the
//! sample application.
//!
//! ## Transactions
//!
//! Each [`MemorySession`] transaction keeps a copy-on-write view per table:
//!
//! - **Snapshot**: the committed table as it was when the transaction first
//!   touched it
//! - **Writes**: rows put by the transaction (`Some`) and tombstones for rows it
//!   deleted (`None`)
//!
//! Reads see the snapshot overlaid with the writes. Savepoints copy the write
//! set, so rolling back to one restores the writes exactly.
//!
//! Commit replays the writes onto the *current* committed tables under one lock.
//! The commit fails with [`RepositoryError::Conflict`] and nothing is applied
//! when the merged result would be inconsistent:
//!
//! - a row inserted here whose key someone else committed in the meantime
//! - a row updated here that someone else deleted in the meantime
//! - a broken unique constraint
//!
//! Other concurrent updates are last-writer-wins.
//!
//! Sequences are not transactional: a rolled-back insert still consumes its id.

mod adapter;
mod eval;

pub use adapter::MemoryAdapter;

use crate::entity::Fields;
use crate::error::{RepositoryError, RepositoryResult};
use crate::session::{Session, SessionFactory};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Rows of one table keyed by their serialized primary key.
type Table = BTreeMap<String, Fields>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DatabaseInner {
    tables: Mutex<HashMap<&'static str, Table>>,
    sequences: Mutex<HashMap<&'static str, u64>>,
    uniques: Mutex<HashMap<&'static str, Vec<Vec<&'static str>>>>,
}

/// Shared in-memory database. Clones refer to the same data.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a unique constraint over `columns` of `table`.
    ///
    /// Rows with a null in any of the columns never conflict.
    pub fn register_unique(&self, table: &'static str, columns: &[&'static str]) {
        let mut uniques = lock(&self.inner.uniques);
        let constraints = uniques.entry(table).or_default();
        if !constraints.iter().any(|c| c.as_slice() == columns) {
            constraints.push(columns.to_vec());
        }
    }

    /// Next value of the table's sequence, starting at 1.
    pub fn next_sequence(&self, table: &'static str) -> u64 {
        let mut sequences = lock(&self.inner.sequences);
        let value = sequences.entry(table).or_insert(0);
        *value += 1;
        *value
    }

    /// Committed rows of `table`, in key order.
    pub fn rows(&self, table: &str) -> Vec<Fields> {
        lock(&self.inner.tables)
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.inner.tables).get(table).map_or(0, Table::len)
    }

    fn snapshot(&self, table: &'static str) -> Table {
        lock(&self.inner.tables).get(table).cloned().unwrap_or_default()
    }

    fn constraints(&self, table: &'static str) -> Vec<Vec<&'static str>> {
        lock(&self.inner.uniques).get(table).cloned().unwrap_or_default()
    }

    fn apply(&self, writes: WriteSet) -> RepositoryResult<()> {
        let mut tables = lock(&self.inner.tables);
        let mut candidates = Vec::with_capacity(writes.tables.len());

        for (table, changes) in writes.tables {
            let mut candidate = tables.get(table).cloned().unwrap_or_default();
            for (key, row) in changes.rows {
                match row {
                    Some(row) => {
                        let inserted = changes.inserted.contains(&key);
                        if inserted && candidate.contains_key(&key) {
                            return Err(RepositoryError::Conflict {
                                entity: table,
                                detail: format!("duplicate primary key {key} at commit"),
                            });
                        }
                        if !inserted && !candidate.contains_key(&key) {
                            return Err(RepositoryError::Conflict {
                                entity: table,
                                detail: format!("row {key} was deleted concurrently"),
                            });
                        }
                        candidate.insert(key, row);
                    }
                    None => {
                        candidate.remove(&key);
                    }
                }
            }
            for columns in self.constraints(table) {
                if let Some(detail) = duplicate_in(&candidate, &columns) {
                    return Err(RepositoryError::Conflict { entity: table, detail });
                }
            }
            candidates.push((table, candidate));
        }

        for (table, candidate) in candidates {
            tables.insert(table, candidate);
        }
        Ok(())
    }
}

/// Projection of `row` onto `columns`, or `None` if any column is null.
fn unique_key(row: &Fields, columns: &[&'static str]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|c| match row.get(*c) {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(value.to_string()),
        })
        .collect()
}

fn duplicate_in(table: &Table, columns: &[&'static str]) -> Option<String> {
    let mut seen = BTreeSet::new();
    for row in table.values() {
        if let Some(key) = unique_key(row, columns) {
            if !seen.insert(key.clone()) {
                return Some(format!(
                    "duplicate value {} for unique ({})",
                    key.join(", "),
                    columns.join(", ")
                ));
            }
        }
    }
    None
}

#[async_trait]
impl SessionFactory for MemoryDatabase {
    type Session = MemorySession;

    async fn open(&self) -> RepositoryResult<MemorySession> {
        Ok(MemorySession {
            db: self.clone(),
            tx: None,
        })
    }
}

#[derive(Clone, Default)]
struct TableWrites {
    rows: BTreeMap<String, Option<Fields>>,
    /// Keys this transaction created (as opposed to replaced).
    inserted: BTreeSet<String>,
}

#[derive(Clone, Default)]
struct WriteSet {
    tables: HashMap<&'static str, TableWrites>,
}

#[derive(Default)]
struct Transaction {
    snapshots: HashMap<&'static str, Table>,
    writes: WriteSet,
    savepoints: Vec<(String, WriteSet)>,
}

/// One connection to a [`MemoryDatabase`].
pub struct MemorySession {
    db: MemoryDatabase,
    tx: Option<Transaction>,
}

impl MemorySession {
    fn tx(&mut self) -> RepositoryResult<&mut Transaction> {
        self.tx
            .as_mut()
            .ok_or_else(|| RepositoryError::Scope("no active transaction".into()))
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn ensure_snapshot(&mut self, table: &'static str) -> RepositoryResult<()> {
        let db = self.db.clone();
        let tx = self.tx()?;
        if !tx.snapshots.contains_key(table) {
            tx.snapshots.insert(table, db.snapshot(table));
        }
        Ok(())
    }

    /// Rows of `table` as this transaction sees them, in key order.
    pub fn scan(&mut self, table: &'static str) -> RepositoryResult<Vec<Fields>> {
        Ok(self.visible(table)?.into_values().collect())
    }

    fn visible(&mut self, table: &'static str) -> RepositoryResult<Table> {
        self.ensure_snapshot(table)?;
        let tx = self.tx()?;
        let mut rows = tx.snapshots.get(table).cloned().unwrap_or_default();
        if let Some(writes) = tx.writes.tables.get(table) {
            for (key, row) in &writes.rows {
                match row {
                    Some(row) => rows.insert(key.clone(), row.clone()),
                    None => rows.remove(key),
                };
            }
        }
        Ok(rows)
    }

    pub fn fetch(&mut self, table: &'static str, key: &str) -> RepositoryResult<Option<Fields>> {
        self.ensure_snapshot(table)?;
        let tx = self.tx()?;
        if let Some(row) = tx.writes.tables.get(table).and_then(|w| w.rows.get(key)) {
            return Ok(row.clone());
        }
        Ok(tx.snapshots.get(table).and_then(|t| t.get(key)).cloned())
    }

    /// Adds a new row. A visible row with the same key is a conflict.
    pub fn insert(&mut self, table: &'static str, key: String, row: Fields) -> RepositoryResult<()> {
        if self.fetch(table, &key)?.is_some() {
            return Err(RepositoryError::Conflict {
                entity: table,
                detail: format!("duplicate primary key {key}"),
            });
        }
        self.check_unique(table, &key, &row)?;
        let tx = self.tx()?;
        let deleted_here = tx
            .writes
            .tables
            .get(table)
            .is_some_and(|w| matches!(w.rows.get(&key), Some(None)));
        let writes = tx.writes.tables.entry(table).or_default();
        if !deleted_here {
            writes.inserted.insert(key.clone());
        }
        writes.rows.insert(key, Some(row));
        Ok(())
    }

    /// Replaces an existing row.
    pub fn update(&mut self, table: &'static str, key: String, row: Fields) -> RepositoryResult<()> {
        if self.fetch(table, &key)?.is_none() {
            return Err(RepositoryError::NotFound { entity: table, id: key });
        }
        self.check_unique(table, &key, &row)?;
        let tx = self.tx()?;
        tx.writes.tables.entry(table).or_default().rows.insert(key, Some(row));
        Ok(())
    }

    /// Deletes a row, returning whether it existed.
    pub fn delete(&mut self, table: &'static str, key: &str) -> RepositoryResult<bool> {
        if self.fetch(table, key)?.is_none() {
            return Ok(false);
        }
        let tx = self.tx()?;
        tx.writes.tables.entry(table).or_default().rows.insert(key.to_string(), None);
        Ok(true)
    }

    fn check_unique(&mut self, table: &'static str, key: &str, row: &Fields) -> RepositoryResult<()> {
        let constraints = self.db.constraints(table);
        if constraints.is_empty() {
            return Ok(());
        }
        let rows = self.visible(table)?;
        for columns in constraints {
            let Some(wanted) = unique_key(row, &columns) else {
                continue;
            };
            let clash = rows
                .iter()
                .any(|(other_key, other)| other_key != key && unique_key(other, &columns).as_ref() == Some(&wanted));
            if clash {
                return Err(RepositoryError::Conflict {
                    entity: table,
                    detail: format!(
                        "duplicate value {} for unique ({})",
                        wanted.join(", "),
                        columns.join(", ")
                    ),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn begin(&mut self) -> RepositoryResult<()> {
        if self.tx.is_some() {
            return Err(RepositoryError::Scope("transaction already active".into()));
        }
        self.tx = Some(Transaction::default());
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| RepositoryError::Scope("no active transaction".into()))?;
        let tables = tx.writes.tables.len();
        self.db.apply(tx.writes)?;
        debug!(tables, "Memory transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        // Rolling back after a failed commit finds no transaction; that is fine.
        self.tx = None;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let tx = self.tx()?;
        let writes = tx.writes.clone();
        tx.savepoints.push((name.to_string(), writes));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let tx = self.tx()?;
        let index = savepoint_index(tx, name)?;
        tx.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> RepositoryResult<()> {
        let tx = self.tx()?;
        let index = savepoint_index(tx, name)?;
        tx.writes = tx.savepoints[index].1.clone();
        tx.savepoints.truncate(index);
        Ok(())
    }

    fn abort(&mut self) {
        self.tx = None;
    }
}

fn savepoint_index(tx: &Transaction, name: &str) -> RepositoryResult<usize> {
    tx.savepoints
        .iter()
        .rposition(|(n, _)| n == name)
        .ok_or_else(|| RepositoryError::Scope(format!("unknown savepoint {name}")))
}
