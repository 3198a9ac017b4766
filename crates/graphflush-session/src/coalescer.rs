//! Deduplicated, concurrent persistence of parent records.

use crate::persist::persist;
use crate::record::{Record, RecordKey};
use asupersync::{Cx, Outcome};
use futures::future::join_all;
use graphflush_core::{Error, Storage};
use std::collections::HashSet;

/// Collects persist requests during one resolution pass and runs them all
/// at once, one persist per distinct record.
#[derive(Debug, Default)]
pub(crate) struct Coalescer {
    queue: Vec<Record>,
    queued: HashSet<RecordKey>,
}

impl Coalescer {
    /// Request a persist of `record`. Returns `false` if it is already queued.
    pub(crate) fn load(&mut self, record: &Record) -> bool {
        let record = record.canonical();
        if !self.queued.insert(record.key()) {
            return false;
        }
        self.queue.push(record);
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn queued(&self) -> &[Record] {
        &self.queue
    }

    /// Persist every queued record concurrently and wait for all of them.
    ///
    /// Every request settles before this returns; the first failure, in
    /// queue order, is reported.
    pub(crate) async fn dispatch<S: Storage>(&mut self, cx: &Cx, storage: &S) -> Outcome<(), Error> {
        let batch = std::mem::take(&mut self.queue);
        self.queued.clear();
        tracing::debug!(records = batch.len(), "Dispatching parent persists");

        let outcomes = join_all(batch.iter().map(|record| persist(cx, storage, record))).await;
        for outcome in outcomes {
            try_outcome!(outcome);
        }
        Outcome::Ok(())
    }
}
