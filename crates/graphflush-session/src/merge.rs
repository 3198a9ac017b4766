//! Deduplication of pending records sharing a unique-key value.

use crate::keys::composite_value;
use crate::record::Record;
use crate::table::Table;
use graphflush_core::{Error, MergeConflictError, Result};
use std::collections::HashMap;

/// Merge every pending record of `table` into the first record observed
/// with the same value for any unique key.
///
/// A record whose keys point at two different canonical records is a
/// conflict; it is reported before anything reaches storage.
pub fn merge_records(table: &Table, separator: &str) -> Result<()> {
    let keys = table.model().unique_key_groups();
    let mut seen: Vec<HashMap<String, Record>> = vec![HashMap::new(); keys.len()];
    let mut merged = 0_usize;

    for record in table.records() {
        if record.merged().is_some() || record.is_deleted() {
            continue;
        }
        let data = record.own_data();
        let values: Vec<Option<String>> = keys
            .iter()
            .map(|key| composite_value(&data, key, separator))
            .collect();

        let mut canonical: Option<Record> = None;
        for ((key, value), map) in keys.iter().zip(&values).zip(&seen) {
            let Some(existing) = value.as_ref().and_then(|v| map.get(v)) else {
                continue;
            };
            let existing = existing.canonical();
            if existing.same(&record) {
                continue;
            }
            match &canonical {
                None => canonical = Some(existing),
                Some(current) if current.same(&existing) => {}
                Some(_) => {
                    return Err(Error::MergeConflict(MergeConflictError {
                        entity: table.model().name.clone(),
                        unique_key: key.name(),
                        value: value.clone().unwrap_or_default(),
                    }));
                }
            }
        }

        let owner = canonical.clone().unwrap_or_else(|| record.clone());
        for (value, map) in values.into_iter().zip(seen.iter_mut()) {
            if let Some(value) = value {
                map.entry(value).or_insert_with(|| owner.clone());
            }
        }

        if let Some(canonical) = canonical {
            record.merge_into(&canonical);
            merged += 1;
        }
    }

    if merged > 0 {
        tracing::debug!(entity = %table.model().name, merged, "Merged duplicate records");
    }
    Ok(())
}
