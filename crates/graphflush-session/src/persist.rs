//! Persisting one record: delete, update, or idempotent upsert.
//!
//! Callers guarantee the record is flushable; references whose parent has
//! no key yet are skipped (they stay dirty) rather than written.

use crate::keys::{
    clause_fields, column_values, identifying_clause, lookup_filter, writable_fields,
};
use crate::record::{FlushMethod, Record, Snapshot};
use asupersync::{Cx, Outcome};
use graphflush_core::{
    ConcurrentModificationError, Error, Filter, Row, SchemaErrorKind, Storage, Value,
};

fn no_identifying_key(snapshot: &Snapshot) -> Error {
    Error::schema(
        SchemaErrorKind::NoIdentifyingKey,
        format!(
            "{} record has neither a primary key nor a complete unique key",
            snapshot.model.name
        ),
    )
}

fn identifying_filter(snapshot: &Snapshot) -> Result<Filter, Error> {
    identifying_clause(snapshot)
        .map(Filter::from_clause)
        .ok_or_else(|| no_identifying_key(snapshot))
}

/// Adopt the primary key stored in `row` unless the record already has one.
fn adopt_primary_key(record: &Record, snapshot: &Snapshot, row: &Row) {
    if record.has_primary_key() {
        return;
    }
    let Some(pk) = snapshot.model.primary_key() else {
        return;
    };
    if let Some(value) = row.get_by_name(pk.column_name()) {
        if !value.is_null() {
            record.set_primary_key(value.clone());
        }
    }
}

/// Persist `record` according to its flush method.
#[tracing::instrument(level = "debug", skip_all, fields(entity = %record.entity()))]
pub(crate) async fn persist<S: Storage>(cx: &Cx, storage: &S, record: &Record) -> Outcome<(), Error> {
    let record = record.canonical();
    if record.is_deleted() {
        return Outcome::Ok(());
    }
    let snapshot = record.snapshot();
    match snapshot.method {
        FlushMethod::Delete => persist_delete(cx, storage, &record, &snapshot).await,
        FlushMethod::Update => persist_update(cx, storage, &record, &snapshot).await,
        FlushMethod::Insert => persist_insert(cx, storage, &record).await,
    }
}

async fn persist_delete<S: Storage>(
    cx: &Cx,
    storage: &S,
    record: &Record,
    snapshot: &Snapshot,
) -> Outcome<(), Error> {
    let filter = match identifying_filter(snapshot) {
        Ok(filter) => filter,
        Err(e) => return Outcome::Err(e),
    };
    let deleted = try_outcome!(storage.delete(cx, &snapshot.model, &filter).await);
    tracing::debug!(filter = %filter, deleted, "Deleted record");
    record.set_deleted();
    Outcome::Ok(())
}

async fn persist_update<S: Storage>(
    cx: &Cx,
    storage: &S,
    record: &Record,
    snapshot: &Snapshot,
) -> Outcome<(), Error> {
    let filter = match identifying_filter(snapshot) {
        Ok(filter) => filter,
        Err(e) => return Outcome::Err(e),
    };
    let vanished = || -> Outcome<(), Error> {
        Outcome::Err(Error::ConcurrentModification(ConcurrentModificationError {
            entity: snapshot.model.name.clone(),
            filter: filter.to_string(),
        }))
    };

    // Located by unique key only: children need the stored primary key.
    if !record.has_primary_key() {
        let rows = try_outcome!(storage.select(cx, &snapshot.model, &filter).await);
        let Some(row) = rows.first() else {
            return vanished();
        };
        adopt_primary_key(record, snapshot, row);
        tracing::trace!(filter = %filter, "Adopted primary key for update");
    }

    let fields = writable_fields(snapshot, true);
    if fields.is_empty() {
        return Outcome::Ok(());
    }

    let affected = try_outcome!(
        storage
            .update(cx, &snapshot.model, &column_values(&fields), &filter)
            .await
    );
    if affected == 0 {
        return vanished();
    }
    record.remove_dirty(fields.iter().map(|w| w.field.as_str()));
    tracing::debug!(filter = %filter, columns = fields.len(), "Updated record");
    Outcome::Ok(())
}

/// Upsert. A lost insert race (unique violation) restarts from the lookup,
/// which then finds the winner's row.
async fn persist_insert<S: Storage>(cx: &Cx, storage: &S, record: &Record) -> Outcome<(), Error> {
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        let snapshot = record.snapshot();
        let filter = lookup_filter(&snapshot);

        if !filter.is_empty() {
            let rows = try_outcome!(storage.select(cx, &snapshot.model, &filter).await);
            if let Some(row) = rows.first() {
                return update_found(cx, storage, record, &snapshot, &filter, row).await;
            }
        }

        let fields = writable_fields(&snapshot, false);
        let values = column_values(&fields);
        match storage.insert(cx, &snapshot.model, &values).await {
            Outcome::Ok(key) => {
                if !record.has_primary_key() {
                    if key.is_null() {
                        try_outcome!(reselect_key(cx, storage, record).await);
                    } else {
                        record.set_primary_key(key);
                    }
                }
                record.remove_dirty(fields.iter().map(|w| w.field.as_str()));
                record.set_method(FlushMethod::Update);
                tracing::debug!(
                    entity = %snapshot.model.name,
                    columns = values.len(),
                    attempt,
                    "Inserted record"
                );
                return Outcome::Ok(());
            }
            Outcome::Err(e) if e.is_unique_violation() && !filter.is_empty() => {
                tracing::warn!(
                    entity = %snapshot.model.name,
                    attempt,
                    error = %e,
                    "Insert lost a race, retrying lookup"
                );
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
}

/// The row already exists: take its key and write whatever else is dirty.
async fn update_found<S: Storage>(
    cx: &Cx,
    storage: &S,
    record: &Record,
    snapshot: &Snapshot,
    filter: &Filter,
    row: &Row,
) -> Outcome<(), Error> {
    for clause in filter.clauses() {
        let matched = clause.iter().all(|(column, value)| {
            row.get_by_name(column).is_some_and(|stored| stored.same_as(value))
        });
        if matched {
            record.remove_dirty(clause_fields(&snapshot.model, clause));
        }
    }
    adopt_primary_key(record, snapshot, row);
    record.set_method(FlushMethod::Update);
    tracing::debug!(entity = %snapshot.model.name, filter = %filter, "Found existing row");

    let snapshot = record.snapshot();
    persist_update(cx, storage, record, &snapshot).await
}

/// The insert did not report a key: look the row up again.
async fn reselect_key<S: Storage>(cx: &Cx, storage: &S, record: &Record) -> Outcome<(), Error> {
    let snapshot = record.snapshot();
    let filter = lookup_filter(&snapshot);
    if filter.is_empty() {
        return Outcome::Err(no_identifying_key(&snapshot));
    }
    let rows = try_outcome!(storage.select(cx, &snapshot.model, &filter).await);
    if let Some(row) = rows.first() {
        adopt_primary_key(record, &snapshot, row);
    }
    if record.has_primary_key() {
        Outcome::Ok(())
    } else {
        Outcome::Err(Error::Custom(format!(
            "could not determine the primary key of the inserted {} row",
            snapshot.model.name
        )))
    }
}

/// Whether a stored value equals what the record would write.
pub(crate) fn stored_equals(stored: &Value, value: &Value) -> bool {
    (stored.is_null() && value.is_null()) || stored.same_as(value)
}
