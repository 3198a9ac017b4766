//! Pending records of one entity and the bulk table flush.
//!
//! A table flush writes all pending records of an entity in three
//! round-trips: one select matching every record's unique keys, one
//! multi-row insert of the records that had no row, and one select to pick
//! up the generated keys. Records it cannot finish (unresolved references,
//! no complete unique key, rows that need an UPDATE) stay dirty for the
//! per-record flush.

use crate::keys::{composite_value, unique_clauses, writable_fields};
use crate::merge::merge_records;
use crate::persist::stored_equals;
use crate::record::{FieldValue, FlushMethod, Record, Strictness};
use crate::FlushOptions;
use asupersync::{Cx, Outcome};
use graphflush_core::{Clause, EntityModel, Error, Filter, Result, Row, Storage, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Joins key components when looking for a pending duplicate on append.
const KEY_SEPARATOR: &str = "\u{1f}";

/// The ordered pending records of one entity type.
#[derive(Debug)]
pub struct Table {
    model: Arc<EntityModel>,
    records: Mutex<Vec<Record>>,
}

impl Table {
    pub fn new(model: Arc<EntityModel>) -> Self {
        Self {
            model,
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &Arc<EntityModel> {
        &self.model
    }

    /// Create a pending record from `fields`.
    ///
    /// When the fields carry a complete unique key already held by a pending
    /// record, that record is returned instead and nothing is appended.
    pub fn append<I, K, V>(&self, fields: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let record = Record::with_fields(Arc::clone(&self.model), fields)?;
        if let Some(existing) = self.find_duplicate(&record) {
            return Ok(existing);
        }
        Ok(self.push(record))
    }

    fn find_duplicate(&self, record: &Record) -> Option<Record> {
        let keys = self.model.unique_key_groups();
        let data = record.own_data();
        let values: Vec<(usize, String)> = keys
            .iter()
            .enumerate()
            .filter_map(|(i, key)| composite_value(&data, key, KEY_SEPARATOR).map(|v| (i, v)))
            .collect();
        if values.is_empty() {
            return None;
        }

        self.records().into_iter().find(|pending| {
            if pending.is_deleted() || pending.merged().is_some() {
                return false;
            }
            let theirs = pending.own_data();
            values.iter().any(|(i, value)| {
                composite_value(&theirs, &keys[*i], KEY_SEPARATOR).as_ref() == Some(value)
            })
        })
    }

    /// Append an existing record.
    pub fn push(&self, record: Record) -> Record {
        self.lock().push(record.clone());
        record
    }

    /// Snapshot of the pending records, in append order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every pending record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Records still waiting to be written.
    pub fn dirty_records(&self) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|r| r.merged().is_none() && !r.is_deleted() && r.is_dirty())
            .collect()
    }
}

/// A record taking part in a table flush, with the clauses locating its row.
struct Candidate {
    record: Record,
    clauses: Vec<Clause>,
}

impl Candidate {
    fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().any(|clause| {
            clause.iter().all(|(column, value)| {
                row.get_by_name(column)
                    .is_some_and(|stored| stored.same_as(value))
            })
        })
    }
}

fn candidates(table: &Table) -> Vec<Candidate> {
    table
        .records()
        .into_iter()
        .filter(|r| {
            r.merged().is_none()
                && !r.is_deleted()
                && r.is_dirty()
                && r.method() != FlushMethod::Delete
                && r.is_flushable(Strictness::Strict)
        })
        .filter_map(|record| {
            let clauses: Vec<Clause> = unique_clauses(&record.snapshot())
                .into_iter()
                .map(|(_, clause)| clause)
                .collect();
            (!clauses.is_empty()).then_some(Candidate { record, clauses })
        })
        .collect()
}

/// Apply selected rows to the candidates they match.
fn reconcile(model: &EntityModel, candidates: &[Candidate], rows: &[Row]) -> usize {
    let pk_column = model.primary_key().map(|f| f.column_name().to_string());
    let mut matched = 0;
    for candidate in candidates {
        let record = &candidate.record;
        if !record.is_dirty() {
            continue;
        }
        let Some(row) = rows.iter().find(|row| candidate.matches(row)) else {
            continue;
        };
        matched += 1;

        if !record.has_primary_key() {
            if let Some(pk) = pk_column.as_deref().and_then(|c| row.get_by_name(c)) {
                if !pk.is_null() {
                    record.set_primary_key(pk.clone());
                }
            }
        }

        let snapshot = record.snapshot();
        let clean: Vec<String> = writable_fields(&snapshot, true)
            .into_iter()
            .filter(|w| {
                row.get_by_name(&w.column)
                    .is_some_and(|stored| stored_equals(stored, &w.value))
            })
            .map(|w| w.field)
            .collect();
        record.remove_dirty(&clean);

        if record.is_dirty() && record.method() == FlushMethod::Insert {
            record.set_method(FlushMethod::Update);
        }
    }
    matched
}

/// Columns and rows of one multi-row insert. The primary key column is
/// included only for records that supply their key, so generated keys are
/// never bound as NULL.
fn insert_rows(
    model: &EntityModel,
    records: &[&Record],
    with_key: bool,
) -> (Vec<String>, Vec<Vec<Value>>) {
    let snapshots: Vec<_> = records.iter().map(|r| r.snapshot()).collect();
    let fields: Vec<_> = model
        .fields
        .iter()
        .filter(|f| with_key || !f.primary_key)
        .collect();

    let columns = fields.iter().map(|f| f.column_name().to_string()).collect();
    let rows = snapshots
        .iter()
        .map(|snapshot| {
            fields
                .iter()
                .map(|f| {
                    snapshot
                        .data
                        .get(&f.name)
                        .and_then(FieldValue::resolve)
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();
    (columns, rows)
}

/// Flush every pending record of `table` in bulk.
#[tracing::instrument(level = "info", skip_all, fields(entity = %table.model().name))]
pub async fn flush_table<S: Storage>(
    cx: &Cx,
    storage: &S,
    table: &Table,
    options: &FlushOptions,
) -> Outcome<(), Error> {
    if let Err(e) = merge_records(table, &options.separator) {
        return Outcome::Err(e);
    }

    let candidates = candidates(table);
    if candidates.is_empty() {
        tracing::debug!("Nothing to flush");
        return Outcome::Ok(());
    }
    let model = Arc::clone(table.model());
    let filter: Filter = candidates
        .iter()
        .flat_map(|c| c.clauses.iter().cloned())
        .collect();

    let rows = try_outcome!(storage.select(cx, &model, &filter).await);
    let existing = reconcile(&model, &candidates, &rows);

    let (keyed, keyless): (Vec<&Record>, Vec<&Record>) = candidates
        .iter()
        .map(|c| &c.record)
        .filter(|r| r.is_dirty() && r.method() == FlushMethod::Insert)
        .partition(|r| r.has_primary_key());
    let mut inserted = 0;
    for (group, with_key) in [(keyed, true), (keyless, false)] {
        if group.is_empty() {
            continue;
        }
        let (columns, values) = insert_rows(&model, &group, with_key);
        inserted += try_outcome!(storage.insert_many(cx, &model, &columns, &values).await);
    }

    let rows = try_outcome!(storage.select(cx, &model, &filter).await);
    let reconciled = reconcile(&model, &candidates, &rows);

    tracing::info!(
        candidates = candidates.len(),
        existing,
        inserted,
        reconciled,
        "Table flushed"
    );
    Outcome::Ok(())
}
