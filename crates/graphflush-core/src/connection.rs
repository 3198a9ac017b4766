//! Driver seam for SQL databases.
//!
//! `graphflush-query` wraps any [`Connection`] into a [`Storage`](crate::Storage),
//! rendering lookups and writes in the connection's dialect.

use crate::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Runs rendered statements with positional parameters.
pub trait Connection: Send + Sync {
    /// Rows selected by `sql`.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Number of rows touched by an UPDATE or DELETE.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Generated key of the row written by a single-row INSERT.
    ///
    /// A unique violation must surface as a constraint [`QueryError`](crate::QueryError)
    /// so the flush can retry its lookup.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;
}
