//! SQL rendering and Connection-backed storage for graphflush.
//!
//! The flush engine speaks to storage through the entity-level
//! [`Storage`](graphflush_core::Storage) trait. This crate renders those
//! calls as parameterized SQL for a [`Dialect`] and runs them on any
//! [`Connection`](graphflush_core::Connection):
//!
//! ```ignore
//! let storage = SqlStorage::new(conn, Dialect::Postgres);
//! let record = flush_record(&cx, &storage, &record).await;
//! ```

pub mod dialect;
pub mod sql;
pub mod storage;

pub use dialect::Dialect;
pub use sql::encode_filter;
pub use storage::SqlStorage;
