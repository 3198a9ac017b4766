//! Dependency resolution for a single-record flush.
//!
//! Flushing a record first persists every parent it references that has no
//! primary key yet, so the record's foreign keys can be written. Parents are
//! collected in passes: a strict pass takes parents whose own references are
//! all resolved, and only when that finds nothing and the target cannot be
//! written does a relaxed pass admit parents with deferrable (nullable)
//! unresolved references, which is what breaks cycles. When even the relaxed
//! pass finds nothing the graph can never be written.

use crate::coalescer::Coalescer;
use crate::persist::persist;
use crate::record::{FlushMethod, Record, RecordKey, Strictness};
use asupersync::{Cx, Outcome};
use graphflush_core::{CycleError, Error, Storage};
use std::collections::HashSet;

/// Context of one top-level flush invocation.
pub struct FlushSession<'a, S: Storage> {
    cx: &'a Cx,
    storage: &'a S,
    coalescer: Coalescer,
}

impl<'a, S: Storage> FlushSession<'a, S> {
    pub fn new(cx: &'a Cx, storage: &'a S) -> Self {
        Self {
            cx,
            storage,
            coalescer: Coalescer::default(),
        }
    }

    /// Queue every parent of `record` that lacks a primary key and is
    /// flushable under `strictness`; descend into those that are not.
    fn collect_parents(
        &mut self,
        record: &Record,
        strictness: Strictness,
        visited: &mut HashSet<RecordKey>,
    ) {
        let record = record.canonical();
        if !record.is_dirty() || !visited.insert(record.key()) {
            return;
        }

        for (field, parent) in record.dirty_references() {
            let parent = parent.canonical();
            if parent.has_primary_key() || parent.is_deleted() {
                continue;
            }
            if parent.is_flushable(strictness) {
                if self.coalescer.load(&parent) {
                    tracing::trace!(field = %field, parent = %parent.entity(), "Queued parent");
                }
            } else {
                self.collect_parents(&parent, strictness, visited);
            }
        }
    }

    /// Whether any parent was queued.
    fn collect(&mut self, record: &Record, strictness: Strictness) -> bool {
        let mut visited = HashSet::new();
        self.collect_parents(record, strictness, &mut visited);
        !self.coalescer.is_empty()
    }

    /// Persist the queued parents. Reports whether any of them changed,
    /// so a parent that can never obtain a key cannot stall the flush.
    async fn dispatch_parents(&mut self) -> Outcome<bool, Error> {
        let parents = self.coalescer.queued().to_vec();
        let before: Vec<_> = parents.iter().map(progress_mark).collect();
        try_outcome!(self.coalescer.dispatch(self.cx, self.storage).await);

        let progressed = parents.iter().map(progress_mark).collect::<Vec<_>>() != before;
        if !progressed {
            tracing::warn!(parents = parents.len(), "Parent persists made no progress");
        }
        Outcome::Ok(progressed)
    }

    /// Persist `record` after everything it depends on.
    ///
    /// Returns the record once it is clean (or deleted).
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %record.entity()))]
    pub async fn flush_record(&mut self, record: &Record) -> Outcome<Record, Error> {
        let target = record.canonical();
        if target.is_deleted() {
            return Outcome::Ok(record.clone());
        }
        if target.method() == FlushMethod::Delete {
            try_outcome!(persist(self.cx, self.storage, &target).await);
            return Outcome::Ok(record.clone());
        }

        let mut rounds = 0_usize;
        while target.is_dirty() {
            rounds += 1;

            if self.collect(&target, Strictness::Strict)
                && try_outcome!(self.dispatch_parents().await)
            {
                continue;
            }

            if target.is_flushable(Strictness::Relaxed) {
                let before = (target.dirty_fields(), target.has_primary_key());
                try_outcome!(persist(self.cx, self.storage, &target).await);
                if !target.is_dirty() {
                    break;
                }
                if (target.dirty_fields(), target.has_primary_key()) != before {
                    continue;
                }
            }

            if !self.collect(&target, Strictness::Relaxed)
                || !try_outcome!(self.dispatch_parents().await)
            {
                let err = CycleError {
                    entity: target.entity(),
                    unresolved: target.unresolved_references(),
                };
                tracing::warn!(error = %err, rounds, "Flush cannot make progress");
                return Outcome::Err(Error::DependencyCycle(err));
            }
        }

        tracing::debug!(rounds, "Record flushed");
        Outcome::Ok(record.clone())
    }
}

/// Observable flush state of a parent.
fn progress_mark(record: &Record) -> (bool, bool, Vec<String>) {
    (record.has_primary_key(), record.is_deleted(), record.dirty_fields())
}
