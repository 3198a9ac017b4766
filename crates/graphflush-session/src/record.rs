//! Dirty-tracking entity records.
//!
//! A [`Record`] is a shared handle: clones point at the same record, and two
//! handles are the same record iff they share the allocation. Every field
//! assignment is validated against the entity model and marks the field
//! dirty; the flush engine shrinks the dirty set as fields reach storage.
//!
//! Once a record is merged into a canonical record (see
//! [`merge_records`](crate::merge_records)) all reads and writes are
//! redirected to the canonical one.

use graphflush_core::{EntityModel, Error, Result, ValidationError, ValidationErrorKind, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How the next persist of a record talks to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMethod {
    /// Upsert: look the row up by its unique keys, insert if absent.
    #[default]
    Insert,
    /// The row exists; write dirty fields.
    Update,
    /// The row exists; remove it.
    Delete,
}

/// Which unresolved references block a persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Every dirty reference must point at a record with a primary key.
    Strict,
    /// Unresolved references are allowed on nullable fields; they are
    /// written later, once the parent exists.
    Relaxed,
}

/// The value of a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A scalar, or the raw key of a referenced row.
    Value(Value),
    /// A reference to another pending record.
    Record(Record),
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            FieldValue::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(r) => Some(r),
            FieldValue::Value(_) => None,
        }
    }

    /// The value storage would see: the scalar itself, or the referenced
    /// record's primary key. `None` while that key is unknown.
    pub fn resolve(&self) -> Option<Value> {
        match self {
            FieldValue::Value(v) => Some(v.clone()),
            FieldValue::Record(r) => r.primary_key(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Value(v)
    }
}

impl From<Record> for FieldValue {
    fn from(r: Record) -> Self {
        FieldValue::Record(r)
    }
}

impl From<&Record> for FieldValue {
    fn from(r: &Record) -> Self {
        FieldValue::Record(r.clone())
    }
}

macro_rules! scalar_field_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::Value(Value::from(v))
                }
            }
        )*
    };
}

scalar_field_value!(bool, i32, i64, f64, String, &str);

/// Flush bookkeeping of a record.
#[derive(Debug, Clone, Default)]
pub struct FlushState {
    pub method: FlushMethod,
    /// Fields assigned since they were last persisted
    pub dirty: BTreeSet<String>,
    pub deleted: bool,
    /// Canonical record this one was merged into
    pub merged: Option<Record>,
}

/// Identity of a record handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(usize);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

struct RecordInner {
    model: Arc<EntityModel>,
    data: BTreeMap<String, FieldValue>,
    state: FlushState,
}

/// Point-in-time copy of a canonical record, taken before any storage call.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub model: Arc<EntityModel>,
    pub data: BTreeMap<String, FieldValue>,
    pub dirty: BTreeSet<String>,
    pub method: FlushMethod,
}

/// A mutable, schema-validated entity record.
#[derive(Clone)]
pub struct Record {
    inner: Arc<Mutex<RecordInner>>,
}

impl Record {
    /// Create an empty record of `model`.
    pub fn new(model: Arc<EntityModel>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordInner {
                model,
                data: BTreeMap::new(),
                state: FlushState::default(),
            })),
        }
    }

    /// Create a record and assign `fields`.
    pub fn with_fields<I, K, V>(model: Arc<EntityModel>, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let record = Self::new(model);
        record.set_fields(fields)?;
        Ok(record)
    }

    fn lock(&self) -> MutexGuard<'_, RecordInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity key of this handle.
    pub fn key(&self) -> RecordKey {
        RecordKey(Arc::as_ptr(&self.inner).addr())
    }

    /// Whether both handles point at the same record.
    pub fn same(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn model(&self) -> Arc<EntityModel> {
        Arc::clone(&self.lock().model)
    }

    /// Entity name.
    pub fn entity(&self) -> String {
        self.lock().model.name.clone()
    }

    /// The record this one was merged into, if any (not followed further).
    pub fn merged(&self) -> Option<Record> {
        self.lock().state.merged.clone()
    }

    /// The end of the merge chain: the record reads and writes go to.
    pub fn canonical(&self) -> Record {
        let mut current = self.clone();
        loop {
            let next = current.merged();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<FieldValue> {
        let target = self.canonical();
        let guard = target.lock();
        guard.data.get(field).cloned()
    }

    /// Read a scalar field.
    pub fn value(&self, field: &str) -> Option<Value> {
        self.get(field).and_then(|v| v.as_value().cloned())
    }

    /// Assign a field and mark it dirty.
    ///
    /// Never performs I/O.
    pub fn set(&self, field: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let target = self.canonical();
        let model = target.model();

        let Some(def) = model.get_field(field) else {
            return Err(Error::Validation(ValidationError::single(
                field,
                ValidationErrorKind::UnknownField,
                format!("Invalid field: {}.{}", model.name, field),
            )));
        };

        match &value {
            FieldValue::Value(Value::Default) => {
                return Err(Error::Validation(ValidationError::single(
                    field,
                    ValidationErrorKind::Undefined,
                    format!("Assigning undefined to {}", field),
                )));
            }
            FieldValue::Value(v) if def.is_reference() && !v.is_null() => {
                return Err(Error::Validation(ValidationError::single(
                    field,
                    ValidationErrorKind::WrongKind,
                    format!("{}.{} expects a record, got {}", model.name, field, v.type_name()),
                )));
            }
            FieldValue::Record(_) if !def.is_reference() => {
                return Err(Error::Validation(ValidationError::single(
                    field,
                    ValidationErrorKind::WrongKind,
                    format!("{}.{} is not a reference", model.name, field),
                )));
            }
            FieldValue::Record(parent) => {
                let entity = parent.entity();
                if def.references.as_deref() != Some(entity.as_str()) {
                    return Err(Error::Validation(ValidationError::single(
                        field,
                        ValidationErrorKind::WrongEntity,
                        format!(
                            "{}.{} references {}, got {}",
                            model.name,
                            field,
                            def.references.as_deref().unwrap_or_default(),
                            entity
                        ),
                    )));
                }
            }
            FieldValue::Value(_) => {}
        }

        let mut guard = target.lock();
        guard.data.insert(field.to_string(), value);
        guard.state.dirty.insert(field.to_string());
        Ok(())
    }

    /// Assign several fields, stopping at the first invalid one.
    pub fn set_fields<I, K, V>(&self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        for (field, value) in fields {
            self.set(field.as_ref(), value)?;
        }
        Ok(())
    }

    /// The primary key, once known.
    pub fn primary_key(&self) -> Option<Value> {
        let target = self.canonical();
        let guard = target.lock();
        match guard.data.get(guard.model.primary_key_name()) {
            Some(FieldValue::Value(v)) if !v.is_null() => Some(v.clone()),
            _ => None,
        }
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary_key().is_some()
    }

    /// Record the primary key of the stored row without dirtying the field.
    pub fn set_primary_key(&self, value: Value) {
        let target = self.canonical();
        let mut guard = target.lock();
        let pk = guard.model.primary_key_name().to_string();
        guard.data.insert(pk, FieldValue::Value(value));
    }

    pub fn method(&self) -> FlushMethod {
        self.canonical().lock().state.method
    }

    pub(crate) fn set_method(&self, method: FlushMethod) {
        self.canonical().lock().state.method = method;
    }

    /// The next flush writes dirty fields to an existing row.
    pub fn mark_for_update(&self) {
        self.set_method(FlushMethod::Update);
    }

    /// The next flush deletes the row.
    pub fn mark_for_delete(&self) {
        self.set_method(FlushMethod::Delete);
    }

    pub fn is_deleted(&self) -> bool {
        self.canonical().lock().state.deleted
    }

    pub(crate) fn set_deleted(&self) {
        let target = self.canonical();
        let mut guard = target.lock();
        guard.state.deleted = true;
        guard.state.dirty.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.canonical().lock().state.dirty.is_empty()
    }

    /// Dirty field names, sorted.
    pub fn dirty_fields(&self) -> Vec<String> {
        let target = self.canonical();
        let guard = target.lock();
        guard.state.dirty.iter().cloned().collect()
    }

    pub(crate) fn remove_dirty<I, S>(&self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let target = self.canonical();
        let mut guard = target.lock();
        for field in fields {
            guard.state.dirty.remove(field.as_ref());
        }
    }

    /// Dirty fields currently holding a record reference.
    pub(crate) fn dirty_references(&self) -> Vec<(String, Record)> {
        let target = self.canonical();
        let guard = target.lock();
        guard
            .state
            .dirty
            .iter()
            .filter_map(|field| match guard.data.get(field) {
                Some(FieldValue::Record(parent)) => Some((field.clone(), parent.clone())),
                _ => None,
            })
            .collect()
    }

    /// Dirty reference fields whose parent has no primary key yet.
    pub fn unresolved_references(&self) -> Vec<String> {
        self.dirty_references()
            .into_iter()
            .filter(|(_, parent)| !parent.has_primary_key())
            .map(|(field, _)| field)
            .collect()
    }

    /// Whether the record can be persisted now under `strictness`.
    pub fn is_flushable(&self, strictness: Strictness) -> bool {
        let model = self.canonical().model();
        self.dirty_references().iter().all(|(field, parent)| {
            parent.has_primary_key()
                || (strictness == Strictness::Relaxed
                    && model.get_field(field).is_some_and(|f| f.nullable))
        })
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let target = self.canonical();
        let guard = target.lock();
        Snapshot {
            model: Arc::clone(&guard.model),
            data: guard.data.clone(),
            dirty: guard.state.dirty.clone(),
            method: guard.state.method,
        }
    }

    /// This record's own fields, ignoring any merge redirection.
    pub(crate) fn own_data(&self) -> BTreeMap<String, FieldValue> {
        self.lock().data.clone()
    }

    /// Redirect this record to `canonical`, moving over the fields the
    /// canonical record has not set. Values already on the canonical win.
    pub(crate) fn merge_into(&self, canonical: &Record) {
        if self.same(canonical) {
            return;
        }
        let own = {
            let mut guard = self.lock();
            guard.state.merged = Some(canonical.clone());
            guard.state.dirty.clear();
            guard.data.clone()
        };
        let mut guard = canonical.lock();
        for (field, value) in own {
            if !guard.data.contains_key(&field) {
                guard.state.dirty.insert(field.clone());
                guard.data.insert(field, value);
            }
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (entity, dirty, method, merged) = {
            let guard = self.lock();
            (
                guard.model.name.clone(),
                guard.state.dirty.len(),
                guard.state.method,
                guard.state.merged.as_ref().map(Record::key),
            )
        };
        f.debug_struct("Record")
            .field("entity", &entity)
            .field("key", &self.key())
            .field("method", &method)
            .field("dirty", &dirty)
            .field("merged", &merged)
            .finish_non_exhaustive()
    }
}
