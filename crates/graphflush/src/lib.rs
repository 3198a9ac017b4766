//! graphflush - write in-memory entity graphs to a database.
//!
//! Application code builds [`Record`]s that reference each other. graphflush
//! works out the order they must be written in, deduplicates records that
//! share a unique key, and turns each write into an idempotent upsert:
//!
//! - Parents are written before the children holding their foreign keys
//! - Cycles are broken through nullable references
//! - Duplicate pending records are merged into one row
//! - Concurrent inserts of the same row settle on a single row
//!
//! # Quick Start
//!
//! ```ignore
//! use graphflush::prelude::*;
//!
//! async fn example(cx: &Cx, schema: Schema) {
//!     let db = Database::new(schema, MemoryStorage::new());
//!
//!     let user = db.append("user", [("email", "a@example.com")]).unwrap();
//!     let order = db.append("order", [("code", "A-1")]).unwrap();
//!     order.set("user", &user).unwrap();
//!
//!     // One bulk round per table, users first.
//!     db.flush(cx).await;
//!
//!     // Or flush a single record and its parents.
//!     let other = db.record("order", [("code", "A-2")]).unwrap();
//!     other.set("user", &user).unwrap();
//!     db.save(cx, &other).await;
//! }
//! ```

/// Unwrap an `Outcome`, returning early on anything but `Ok`.
macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            ::asupersync::Outcome::Ok(v) => v,
            ::asupersync::Outcome::Err(e) => return ::asupersync::Outcome::Err(e),
            ::asupersync::Outcome::Cancelled(r) => return ::asupersync::Outcome::Cancelled(r),
            ::asupersync::Outcome::Panicked(p) => return ::asupersync::Outcome::Panicked(p),
        }
    };
}

// Re-export all public types from sub-crates
pub use graphflush_core::{
    Clause, ColumnInfo, ConcurrentModificationError, Connection, CycleError, Cx, EntityModel,
    Error, FieldDef, FieldValidationError, Filter, MergeConflictError, Outcome, QueryError,
    QueryErrorKind, Result, Row, Schema, SchemaError, SchemaErrorKind, Storage,
    UniqueKey, ValidationError, ValidationErrorKind, Value,
};

pub use graphflush_query::{Dialect, SqlStorage, encode_filter};

pub use graphflush_session::{
    FieldValue, FlushMethod, FlushOptions, FlushOrderer, FlushSession, FlushState, Record,
    RecordKey, Strictness, Table, flush_record, flush_table, merge_records,
};

pub use graphflush_memory::{MemoryStorage, StorageStats};

pub mod database;
pub use database::Database;

/// Everything needed to declare a schema, build records and flush them.
///
/// ```ignore
/// use graphflush::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Connection, Cx, Database, Dialect, EntityModel, Error, FieldDef, FieldValue, Filter,
        FlushMethod, FlushOptions, MemoryStorage, Outcome, Record, Result, Schema, SqlStorage,
        Storage, Table, Value, flush_record, flush_table,
    };
}
