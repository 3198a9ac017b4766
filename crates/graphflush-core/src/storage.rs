//! The storage collaborator consumed by the flush engine.
//!
//! The engine never builds statements itself; it talks to storage through
//! five entity-level operations. [`Connection`](crate::Connection) backed SQL
//! storage lives in `graphflush-query`, an in-memory implementation in
//! `graphflush-memory`.
//!
//! All values are keyed by storage column, not by field name.

use crate::error::Error;
use crate::filter::Filter;
use crate::row::Row;
use crate::schema::EntityModel;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Entity-level storage operations.
///
/// Implementations must report a lost INSERT race as a unique constraint
/// violation (`Error::is_unique_violation`) so the engine can retry it.
pub trait Storage: Send + Sync {
    /// Fetch all rows of `model` matching `filter`.
    fn select(
        &self,
        cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Insert one row and return its primary key (generated or supplied).
    ///
    /// Returns `Value::Null` when the backend cannot report the key.
    fn insert(
        &self,
        cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Value, Error>> + Send;

    /// Insert many rows sharing one column list in a single statement.
    fn insert_many(
        &self,
        cx: &Cx,
        model: &EntityModel,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Update rows matching `filter`, returning the number of rows affected.
    fn update(
        &self,
        cx: &Cx,
        model: &EntityModel,
        values: &[(String, Value)],
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Delete rows matching `filter`, returning the number of rows affected.
    fn delete(
        &self,
        cx: &Cx,
        model: &EntityModel,
        filter: &Filter,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}
