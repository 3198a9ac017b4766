//! In-memory storage backend for graphflush.
//!
//! `MemoryStorage` keeps one table per entity, generates integer primary
//! keys and enforces every unique-key group of the entity the way a
//! relational store would (NULL components never collide). It counts the
//! statements it executes so callers can assert round-trips, and can be told
//! to yield once before every statement so concurrently issued flushes
//! interleave like they would against a remote database.

mod table;

use asupersync::{Cx, Outcome};
use graphflush_core::{EntityModel, Error, Filter, Row, Storage, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use table::MemoryTable;

/// Statement counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub selects: u64,
    pub inserts: u64,
    pub bulk_inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl StorageStats {
    /// Total number of statements executed.
    pub fn total(&self) -> u64 {
        self.selects + self.inserts + self.bulk_inserts + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    stats: StorageStats,
}

impl MemoryState {
    fn table(&mut self, model: &EntityModel) -> &mut MemoryTable {
        self.tables
            .entry(model.table_name().to_string())
            .or_insert_with(|| MemoryTable::new(model))
    }
}

/// In-memory [`Storage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    yield_on_io: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend once before every statement.
    pub fn yielding() -> Self {
        Self {
            state: Mutex::default(),
            yield_on_io: true,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, Error> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| Error::Custom("memory storage lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    /// Create the table for `model` if it does not exist yet.
    ///
    /// Tables are also created on first use.
    pub fn create_table(&self, model: &EntityModel) -> Result<(), Error> {
        self.with_state(|state| {
            state.table(model);
        })
    }

    /// All rows currently stored for `model`.
    pub fn rows(&self, model: &EntityModel) -> Result<Vec<Row>, Error> {
        self.with_state(|state| state.table(model).scan())
    }

    /// Number of rows currently stored for `model`.
    pub fn row_count(&self, model: &EntityModel) -> Result<usize, Error> {
        self.with_state(|state| state.table(model).len())
    }

    /// Statement counters since creation or the last reset.
    pub fn stats(&self) -> StorageStats {
        self.with_state(|state| state.stats).unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        let _ = self.with_state(|state| state.stats = StorageStats::default());
    }

    async fn pause(&self) {
        if self.yield_on_io {
            asupersync::runtime::yield_now().await;
        }
    }
}

fn settle<T>(result: Result<Result<T, Error>, Error>) -> Outcome<T, Error> {
    match result.and_then(|inner| inner) {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

impl Storage for MemoryStorage {
    fn select(
        &self,
        _cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            self.pause().await;
            let rows = self.with_state(|state| {
                state.stats.selects += 1;
                Ok(state.table(model).select(filter))
            });
            tracing::trace!(table = model.table_name(), filter = %filter, "memory select");
            settle(rows)
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        async move {
            self.pause().await;
            let key = self.with_state(|state| {
                state.stats.inserts += 1;
                state.table(model).insert(values)
            });
            tracing::trace!(table = model.table_name(), columns = values.len(), "memory insert");
            settle(key)
        }
    }

    fn insert_many(
        &self,
        _cx: &Cx,
        model: &EntityModel,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            if rows.is_empty() {
                return Outcome::Ok(0);
            }
            self.pause().await;
            let inserted = self.with_state(|state| {
                state.stats.bulk_inserts += 1;
                state.table(model).insert_many(columns, rows)
            });
            tracing::trace!(table = model.table_name(), rows = rows.len(), "memory insert_many");
            settle(inserted)
        }
    }

    fn update(
        &self,
        _cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            self.pause().await;
            let updated = self.with_state(|state| {
                state.stats.updates += 1;
                state.table(model).update(values, filter)
            });
            tracing::trace!(table = model.table_name(), filter = %filter, "memory update");
            settle(updated)
        }
    }

    fn delete(
        &self,
        _cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            self.pause().await;
            let deleted = self.with_state(|state| {
                state.stats.deletes += 1;
                Ok(state.table(model).delete(filter))
            });
            tracing::trace!(table = model.table_name(), filter = %filter, "memory delete");
            settle(deleted)
        }
    }
}
