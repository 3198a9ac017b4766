//! Dirty-tracking records and the flush engine for graphflush.
//!
//! `graphflush-session` writes an in-memory graph of [`Record`]s to storage:
//!
//! - **Record** - schema-validated field bag with a dirty set
//! - **Resolver** - persists parents before children, breaks cycles through
//!   nullable references
//! - **Persist** - delete, update, or idempotent upsert with race retry
//! - **Coalescer** - one persist per record per resolution pass, run concurrently
//! - **Merge** - deduplicates pending records sharing a unique-key value
//! - **Table flush** - bulk select, insert, select for one entity
//!
//! # Example
//!
//! ```ignore
//! let user = Record::with_fields(schema.model("user")?, [("email", "a@example.com")])?;
//! let order = Record::with_fields(schema.model("order")?, [("code", "A-1")])?;
//! order.set("user", &user)?;
//!
//! // Inserts the user, then the order with its foreign key.
//! flush_record(&cx, &storage, &order).await;
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

mod coalescer;
mod keys;
pub mod merge;
pub mod order;
mod persist;
pub mod record;
pub mod session;
pub mod table;

pub use merge::merge_records;
pub use order::FlushOrderer;
pub use record::{FieldValue, FlushMethod, FlushState, Record, RecordKey, Strictness};
pub use session::FlushSession;
pub use table::{Table, flush_table};

use asupersync::{Cx, Outcome};
use graphflush_core::{Error, Storage};
use serde::{Deserialize, Serialize};

/// Options for table flushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushOptions {
    /// Joins the components of a composite unique-key value during merge.
    pub separator: String,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            separator: "-".to_string(),
        }
    }
}

impl FlushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the composite-key separator.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

/// Flush one record and everything it depends on, in a fresh session.
pub async fn flush_record<S: Storage>(cx: &Cx, storage: &S, record: &Record) -> Outcome<Record, Error> {
    FlushSession::new(cx, storage).flush_record(record).await
}
