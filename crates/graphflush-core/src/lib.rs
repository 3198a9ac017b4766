//! Core types and traits for graphflush.
//!
//! This crate provides the foundations shared by the flush engine and its
//! storage backends:
//!
//! - `Value` and `Row` for data exchanged with storage
//! - `EntityModel` / `Schema` describing fields, references and unique keys
//! - `Filter` for unique-key lookups
//! - `Storage` trait consumed by the engine, `Connection` trait for SQL drivers
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod filter;
pub mod row;
pub mod schema;
pub mod storage;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConcurrentModificationError, CycleError, Error, FieldValidationError, MergeConflictError,
    QueryError, QueryErrorKind, Result, SchemaError, SchemaErrorKind, ValidationError,
    ValidationErrorKind,
};
pub use filter::{Clause, Filter};
pub use row::{ColumnInfo, Row};
pub use schema::{EntityModel, FieldDef, Schema, UniqueKey, is_valid_identifier};
pub use storage::Storage;
pub use value::Value;
