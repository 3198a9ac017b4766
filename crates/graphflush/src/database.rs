//! Schema-wide entry point tying tables, records and storage together.
//!
//! # Example
//!
//! ```rust,ignore
//! use graphflush::prelude::*;
//!
//! let db = Database::new(Schema::from_json(SCHEMA)?, MemoryStorage::new());
//! let user = db.append("user", [("email", "a@example.com")])?;
//! let order = db.append("order", [("code", "A-1")])?;
//! order.set("user", &user)?;
//!
//! // Users are bulk-written before orders.
//! db.flush(&cx).await;
//! ```

use crate::{FlushOptions, FlushOrderer, Record, Table, flush_record, flush_table};
use asupersync::{Cx, Outcome};
use graphflush_core::{Error, Result, Schema, SchemaErrorKind, Storage};
use graphflush_session::{FieldValue, FlushMethod};
use std::collections::HashMap;
use std::sync::Arc;

/// Pending records of every entity in a schema, and the storage they are
/// flushed to.
pub struct Database<S: Storage> {
    schema: Schema,
    storage: S,
    tables: HashMap<String, Table>,
    orderer: FlushOrderer,
    options: FlushOptions,
}

impl<S: Storage> Database<S> {
    /// Create a database with one empty table per entity.
    pub fn new(schema: Schema, storage: S) -> Self {
        let mut tables = HashMap::new();
        let mut orderer = FlushOrderer::new();
        for model in schema.models() {
            orderer.register_model(model);
            tables.insert(model.name.clone(), Table::new(Arc::clone(model)));
        }
        Self {
            schema,
            storage,
            tables,
            orderer,
            options: FlushOptions::default(),
        }
    }

    /// Set the options used by table flushes.
    pub fn with_options(mut self, options: FlushOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn options(&self) -> &FlushOptions {
        &self.options
    }

    /// The pending-record table of `entity`.
    pub fn table(&self, entity: &str) -> Result<&Table> {
        self.tables.get(entity).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::EntityNotFound,
                format!("unknown entity {}", entity),
            )
        })
    }

    /// Append a pending record to the table of `entity`.
    ///
    /// Returns the already pending record when one holds the same unique key.
    pub fn append<I, K, V>(&self, entity: &str, fields: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        self.table(entity)?.append(fields)
    }

    /// Create a record that belongs to no table.
    ///
    /// It is only written by [`save`](Self::save) or when a flushed record
    /// references it.
    pub fn record<I, K, V>(&self, entity: &str, fields: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        Record::with_fields(self.schema.model(entity)?, fields)
    }

    /// Flush `record` and everything it depends on.
    pub async fn save(&self, cx: &Cx, record: &Record) -> Outcome<Record, Error> {
        flush_record(cx, &self.storage, record).await
    }

    /// Assign `fields` to an existing row's record and write them.
    pub async fn update<I, K, V>(&self, cx: &Cx, record: &Record, fields: I) -> Outcome<Record, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        record.mark_for_update();
        if let Err(e) = record.set_fields(fields) {
            return Outcome::Err(e);
        }
        flush_record(cx, &self.storage, record).await
    }

    /// Delete the row of `record`.
    pub async fn delete(&self, cx: &Cx, record: &Record) -> Outcome<Record, Error> {
        record.mark_for_delete();
        flush_record(cx, &self.storage, record).await
    }

    /// Write every pending record.
    ///
    /// Deletes run child-first, then each table is bulk-flushed parent-first.
    /// Records a table flush cannot settle (pending updates, cycles, records
    /// without a unique key) are flushed one by one afterwards.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn flush(&self, cx: &Cx) -> Outcome<(), Error> {
        let mut deleted = 0_usize;
        for entity in self.orderer.delete_order() {
            let Some(table) = self.tables.get(&entity) else {
                continue;
            };
            for record in table.records() {
                if record.merged().is_some()
                    || record.is_deleted()
                    || record.method() != FlushMethod::Delete
                {
                    continue;
                }
                try_outcome!(flush_record(cx, &self.storage, &record).await);
                deleted += 1;
            }
        }

        let order = self.orderer.write_order();
        for entity in &order {
            if let Some(table) = self.tables.get(entity) {
                try_outcome!(flush_table(cx, &self.storage, table, &self.options).await);
            }
        }

        let mut remaining = 0_usize;
        for entity in &order {
            let Some(table) = self.tables.get(entity) else {
                continue;
            };
            for record in table.dirty_records() {
                // Settled as a parent of an earlier record.
                if !record.is_dirty() {
                    continue;
                }
                try_outcome!(flush_record(cx, &self.storage, &record).await);
                remaining += 1;
            }
        }

        tracing::info!(deleted, remaining, "Database flushed");
        Outcome::Ok(())
    }
}

impl<S: Storage + std::fmt::Debug> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("entities", &self.orderer.write_order())
            .field("storage", &self.storage)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
