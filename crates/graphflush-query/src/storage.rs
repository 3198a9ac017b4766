//! [`Storage`] over any SQL [`Connection`].

use crate::dialect::Dialect;
use crate::sql;
use asupersync::{Cx, Outcome};
use graphflush_core::{Connection, EntityModel, Error, Filter, Row, Storage, Value};
use std::future::Future;

/// Adapts a SQL connection into flush-engine storage by rendering every
/// storage call for the connection's dialect.
#[derive(Debug)]
pub struct SqlStorage<C: Connection> {
    conn: C,
    dialect: Dialect,
}

impl<C: Connection> SqlStorage<C> {
    /// Wrap a connection speaking `dialect`.
    pub fn new(conn: C, dialect: Dialect) -> Self {
        Self { conn, dialect }
    }

    /// The rendering dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Unwrap the underlying connection.
    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: Connection> Storage for SqlStorage<C> {
    fn select(
        &self,
        cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let (stmt, params) = sql::select(model, filter, self.dialect);
        async move {
            tracing::trace!(sql = %stmt, params = params.len(), "select");
            self.conn.query(cx, &stmt, &params).await
        }
    }

    fn insert(
        &self,
        cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send {
        let (stmt, params) = sql::insert(model, values, self.dialect);
        let supplied = model.primary_key().and_then(|pk| {
            values
                .iter()
                .find(|(column, _)| column == pk.column_name())
                .map(|(_, value)| value.clone())
        });
        async move {
            tracing::trace!(sql = %stmt, params = params.len(), "insert");
            match self.conn.insert(cx, &stmt, &params).await {
                Outcome::Ok(id) => Outcome::Ok(match supplied {
                    Some(value) if !value.is_null() => value,
                    // Drivers report 0 when the table has no generated key.
                    _ if id > 0 => Value::BigInt(id),
                    _ => Value::Null,
                }),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    fn insert_many(
        &self,
        cx: &Cx,
        model: &EntityModel,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let statement = sql::insert_many(model, columns, rows, self.dialect);
        let fallback: Vec<(String, Vec<Value>)> = if statement.is_none() && columns.is_empty() {
            rows.iter()
                .map(|_| sql::insert(model, &[], self.dialect))
                .collect()
        } else {
            Vec::new()
        };
        async move {
            if let Some((stmt, params)) = statement {
                tracing::trace!(sql = %stmt, params = params.len(), "insert_many");
                return self.conn.execute(cx, &stmt, &params).await;
            }
            // Rows without any writable column: one DEFAULT VALUES insert each.
            let mut inserted = 0;
            for (stmt, params) in fallback {
                match self.conn.execute(cx, &stmt, &params).await {
                    Outcome::Ok(n) => inserted += n,
                    other => return other,
                }
            }
            Outcome::Ok(inserted)
        }
    }

    fn update(
        &self,
        cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let statement = if values.is_empty() {
            None
        } else {
            Some(sql::update(model, values, filter, self.dialect))
        };
        let entity = model.name.clone();
        async move {
            let Some((stmt, params)) = statement else {
                return Outcome::Err(Error::Custom(format!(
                    "UPDATE of {} without columns",
                    entity
                )));
            };
            tracing::trace!(sql = %stmt, params = params.len(), "update");
            self.conn.execute(cx, &stmt, &params).await
        }
    }

    fn delete(
        &self,
        cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let (stmt, params) = sql::delete(model, filter, self.dialect);
        async move {
            tracing::trace!(sql = %stmt, params = params.len(), "delete");
            self.conn.execute(cx, &stmt, &params).await
        }
    }
}
