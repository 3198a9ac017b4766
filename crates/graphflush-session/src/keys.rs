//! Unique-key values of records: lookup filters, writable columns and the
//! composite values used for deduplication.

use crate::record::{FieldValue, Record, Snapshot};
use graphflush_core::{Clause, EntityModel, Filter, UniqueKey, Value};
use std::collections::BTreeMap;

/// Resolved, non-NULL value of `field`.
fn resolved(data: &BTreeMap<String, FieldValue>, field: &str) -> Option<Value> {
    data.get(field)
        .and_then(FieldValue::resolve)
        .filter(|v| !v.is_null())
}

/// One clause per unique key whose fields are all set to resolvable
/// non-NULL values, primary key first.
pub(crate) fn unique_clauses(snapshot: &Snapshot) -> Vec<(UniqueKey, Clause)> {
    snapshot
        .model
        .unique_key_groups()
        .into_iter()
        .filter_map(|key| {
            let clause = key
                .fields()
                .iter()
                .map(|name| {
                    let def = snapshot.model.get_field(name)?;
                    let value = resolved(&snapshot.data, name)?;
                    Some((def.column_name().to_string(), value))
                })
                .collect::<Option<Clause>>()?;
            Some((key, clause))
        })
        .collect()
}

/// The clause that locates the record's row: its primary key when known,
/// otherwise the first complete unique key.
pub(crate) fn identifying_clause(snapshot: &Snapshot) -> Option<Clause> {
    unique_clauses(snapshot)
        .into_iter()
        .next()
        .map(|(_, clause)| clause)
}

/// Every complete unique key, OR-ed.
pub(crate) fn lookup_filter(snapshot: &Snapshot) -> Filter {
    unique_clauses(snapshot)
        .into_iter()
        .map(|(_, clause)| clause)
        .collect()
}

/// A field whose value can be sent to storage now.
#[derive(Debug, Clone)]
pub(crate) struct Writable {
    pub field: String,
    pub column: String,
    pub value: Value,
}

/// Set fields in declaration order, references written as their parent's
/// primary key. References to parents without a key are skipped.
pub(crate) fn writable_fields(snapshot: &Snapshot, only_dirty: bool) -> Vec<Writable> {
    snapshot
        .model
        .fields
        .iter()
        .filter(|def| !only_dirty || snapshot.dirty.contains(&def.name))
        .filter_map(|def| {
            let value = snapshot.data.get(&def.name)?.resolve()?;
            Some(Writable {
                field: def.name.clone(),
                column: def.column_name().to_string(),
                value,
            })
        })
        .collect()
}

pub(crate) fn column_values(fields: &[Writable]) -> Vec<(String, Value)> {
    fields
        .iter()
        .map(|w| (w.column.clone(), w.value.clone()))
        .collect()
}

/// Fields named by `clause` (which is expressed on columns).
pub(crate) fn clause_fields(model: &EntityModel, clause: &Clause) -> Vec<String> {
    clause
        .iter()
        .filter_map(|(column, _)| model.field_by_column(column).map(|f| f.name.clone()))
        .collect()
}

/// Composite value of `key` over a record's own fields, components joined by
/// `separator`. References contribute the parent's primary key, or the
/// parent's identity while it is unsaved. `None` unless every component is
/// set and non-NULL.
pub(crate) fn composite_value(
    data: &BTreeMap<String, FieldValue>,
    key: &UniqueKey,
    separator: &str,
) -> Option<String> {
    let parts = key
        .fields()
        .iter()
        .map(|name| match data.get(name)? {
            FieldValue::Value(v) if v.is_null() => None,
            FieldValue::Value(v) => Some(v.to_string()),
            FieldValue::Record(parent) => Some(component_of(parent)),
        })
        .collect::<Option<Vec<String>>>()?;
    Some(parts.join(separator))
}

fn component_of(parent: &Record) -> String {
    match parent.primary_key() {
        Some(pk) => pk.to_string(),
        None => parent.canonical().key().to_string(),
    }
}
