use graphflush_core::{ColumnInfo, EntityModel, Error, Filter, QueryError, QueryErrorKind, Row, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rows of one entity, keyed by insertion order.
#[derive(Debug, Clone)]
pub(crate) struct MemoryTable {
    name: String,
    columns: Arc<ColumnInfo>,
    primary_key: usize,
    unique: Vec<Vec<usize>>,
    rows: BTreeMap<usize, Vec<Value>>,
    next_row_id: usize,
    next_key: i64,
}

impl MemoryTable {
    pub(crate) fn new(model: &EntityModel) -> Self {
        let names: Vec<String> = model
            .fields
            .iter()
            .map(|f| f.column_name().to_string())
            .collect();
        let primary_key = model
            .fields
            .iter()
            .position(|f| f.primary_key)
            .unwrap_or(0);
        let unique = model
            .unique_key_groups()
            .iter()
            .map(|key| {
                key.fields()
                    .iter()
                    .filter_map(|field| model.fields.iter().position(|f| &f.name == field))
                    .collect()
            })
            .collect();
        Self {
            name: model.table_name().to_string(),
            columns: Arc::new(ColumnInfo::new(names)),
            primary_key,
            unique,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_key: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn scan(&self) -> Vec<Row> {
        self.rows
            .values()
            .map(|values| Row::with_columns(Arc::clone(&self.columns), values.clone()))
            .collect()
    }

    fn matching_ids(&self, filter: &Filter) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|(_, values)| {
                filter.matches(|column| {
                    self.columns
                        .index_of(column)
                        .and_then(|i| values.get(i))
                })
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn select(&self, filter: &Filter) -> Vec<Row> {
        self.matching_ids(filter)
            .into_iter()
            .filter_map(|id| self.rows.get(&id))
            .map(|values| Row::with_columns(Arc::clone(&self.columns), values.clone()))
            .collect()
    }

    fn column_index(&self, column: &str) -> Result<usize, Error> {
        self.columns.index_of(column).ok_or_else(|| {
            Error::Query(QueryError {
                kind: QueryErrorKind::NotFound,
                sql: None,
                sqlstate: Some("42703".to_string()),
                message: format!("column {} does not exist on {}", column, self.name),
                source: None,
            })
        })
    }

    /// Build a full row from column/value pairs, generating the key if absent.
    fn build_row(&mut self, values: &[(String, Value)]) -> Result<Vec<Value>, Error> {
        let mut row = vec![Value::Null; self.columns.len()];
        for (column, value) in values {
            let index = self.column_index(column)?;
            row[index] = value.clone();
        }
        match row[self.primary_key].as_i64() {
            Some(key) => self.next_key = self.next_key.max(key.saturating_add(1)),
            None if row[self.primary_key].is_null() => {
                row[self.primary_key] = Value::BigInt(self.next_key);
                self.next_key = self.next_key.saturating_add(1);
            }
            None => {}
        }
        Ok(row)
    }

    fn check_uniqueness(
        &self,
        row: &[Value],
        ignore_id: Option<usize>,
        pending: &[Vec<Value>],
    ) -> Result<(), Error> {
        for group in &self.unique {
            if group.iter().any(|&i| row[i].is_null()) {
                continue;
            }
            let clash = |other: &Vec<Value>| group.iter().all(|&i| row[i].same_as(&other[i]));
            let existing = self
                .rows
                .iter()
                .filter(|(id, _)| Some(**id) != ignore_id)
                .any(|(_, other)| clash(other));
            if existing || pending.iter().any(clash) {
                let names: Vec<&str> = group
                    .iter()
                    .map(|&i| self.columns.names()[i].as_str())
                    .collect();
                return Err(Error::Query(QueryError::unique_violation(format!(
                    "Unique constraint violation: {} ({}) already exists",
                    self.name,
                    names.join(", ")
                ))));
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, values: &[(String, Value)]) -> Result<Value, Error> {
        let row = self.build_row(values)?;
        self.check_uniqueness(&row, None, &[])?;
        let key = row[self.primary_key].clone();
        self.rows.insert(self.next_row_id, row);
        self.next_row_id += 1;
        Ok(key)
    }

    /// Insert all rows or none.
    pub(crate) fn insert_many(
        &mut self,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64, Error> {
        let saved_key = self.next_key;
        let mut built: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for values in rows {
            let pairs: Vec<(String, Value)> = columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            let result = self
                .build_row(&pairs)
                .and_then(|row| self.check_uniqueness(&row, None, &built).map(|()| row));
            match result {
                Ok(row) => built.push(row),
                Err(e) => {
                    self.next_key = saved_key;
                    return Err(e);
                }
            }
        }
        let inserted = built.len() as u64;
        for row in built {
            self.rows.insert(self.next_row_id, row);
            self.next_row_id += 1;
        }
        Ok(inserted)
    }

    pub(crate) fn update(
        &mut self,
        values: &[(String, Value)],
        filter: &Filter,
    ) -> Result<u64, Error> {
        let assignments = values
            .iter()
            .map(|(column, value)| self.column_index(column).map(|i| (i, value.clone())))
            .collect::<Result<Vec<_>, Error>>()?;

        let ids = self.matching_ids(filter);
        let mut updated = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(current) = self.rows.get(id) else {
                continue;
            };
            let mut row = current.clone();
            for (index, value) in &assignments {
                row[*index] = value.clone();
            }
            self.check_uniqueness(&row, Some(*id), &[])?;
            updated.push((*id, row));
        }
        let count = updated.len() as u64;
        for (id, row) in updated {
            self.rows.insert(id, row);
        }
        Ok(count)
    }

    pub(crate) fn delete(&mut self, filter: &Filter) -> u64 {
        let ids = self.matching_ids(filter);
        for id in &ids {
            self.rows.remove(id);
        }
        ids.len() as u64
    }
}
