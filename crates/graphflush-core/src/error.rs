//! Error types for flush operations.

use std::fmt;

const UNIQUE_VIOLATION: &str = "23505";

/// The primary error type for all graphflush operations.
#[derive(Debug)]
pub enum Error {
    /// Field assignment rejected by the schema
    Validation(ValidationError),
    /// No progress possible resolving mandatory parent references
    DependencyCycle(CycleError),
    /// An UPDATE matched no row
    ConcurrentModification(ConcurrentModificationError),
    /// Unique keys of one record disagree about its canonical record
    MergeConflict(MergeConflictError),
    /// A storage call failed
    Query(QueryError),
    /// Unknown entity or field, or an inconsistent schema
    Schema(SchemaError),
    /// The surrounding task was cancelled
    Cancelled,
    /// Schema or options document could not be parsed
    Serde(String),
    Custom(String),
}

/// Failure reported by a storage backend or SQL driver.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    /// Unique or foreign key constraint
    Constraint,
    /// Unknown table or column
    NotFound,
    Database,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity not declared in the schema
    EntityNotFound,
    /// Field not declared on the entity
    FieldNotFound,
    /// Duplicate or malformed declaration
    Invalid,
    /// Record has no primary key or complete unique key to locate its row
    NoIdentifyingKey,
}

/// The dependency graph below a record can never become persistable.
#[derive(Debug, Clone)]
pub struct CycleError {
    /// Entity of the record whose flush was requested
    pub entity: String,
    /// Dirty reference fields still pointing at unsaved records
    pub unresolved: Vec<String>,
}

/// An UPDATE affected zero rows: the row vanished or the filter went stale.
#[derive(Debug, Clone)]
pub struct ConcurrentModificationError {
    pub entity: String,
    pub filter: String,
}

/// A record matched two different canonical records through two unique keys.
#[derive(Debug, Clone)]
pub struct MergeConflictError {
    pub entity: String,
    pub unique_key: String,
    pub value: String,
}

/// Rejected field assignments or identifiers, one entry per offending name.
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// Field (or identifier) the entry is about
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// Why an assignment or identifier was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Field is not declared on the entity
    UnknownField,
    /// DEFAULT / undefined assigned to a field
    Undefined,
    /// Record assigned to a scalar field, or scalar to a reference field
    WrongKind,
    /// Record of another entity assigned to a reference field
    WrongEntity,
    /// Identifier does not match the allowed pattern
    Identifier,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record one rejected name.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Build an error for a single field.
    pub fn single(
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new();
        err.add(field, kind, message);
        err
    }

    /// Kind of the first recorded error.
    pub fn first_kind(&self) -> Option<ValidationErrorKind> {
        self.errors.first().map(|e| e.kind)
    }
}

impl Error {
    /// Is this the transient INSERT race (a concurrent insert won)?
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_unique_violation(),
            _ => false,
        }
    }

    /// SQLSTATE of a storage failure.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }
}

impl QueryError {
    /// The error a backend reports when an INSERT hits a taken unique key.
    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Constraint,
            sql: None,
            sqlstate: Some(UNIQUE_VIOLATION.to_string()),
            message: message.into(),
            source: None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some(UNIQUE_VIOLATION)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::DependencyCycle(e) => write!(f, "Dependency cycle: {}", e),
            Error::ConcurrentModification(e) => write!(f, "Concurrent modification: {}", e),
            Error::MergeConflict(e) => write!(f, "Merge conflict: {}", e),
            Error::Query(e) => write!(f, "Storage error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Cancelled => f.write_str("Flush cancelled"),
            Error::Serde(msg) => write!(f, "Invalid document: {}", msg),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match (&self.sqlstate, &self.sql) {
            (Some(state), Some(sql)) => write!(f, " [{state}] in `{sql}`"),
            (Some(state), None) => write!(f, " [{state}]"),
            (None, Some(sql)) => write!(f, " in `{sql}`"),
            (None, None) => Ok(()),
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cannot be flushed; unresolved references: [{}]",
            self.entity,
            self.unresolved.join(", ")
        )
    }
}

impl fmt::Display for ConcurrentModificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row of {} matching {} no longer exists", self.entity, self.filter)
    }
}

impl fmt::Display for MergeConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record cannot merge into different records ({} = {})",
            self.entity, self.unique_key, self.value
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<CycleError> for Error {
    fn from(err: CycleError) -> Self {
        Error::DependencyCycle(err)
    }
}

impl From<ConcurrentModificationError> for Error {
    fn from(err: ConcurrentModificationError) -> Self {
        Error::ConcurrentModification(err)
    }
}

impl From<MergeConflictError> for Error {
    fn from(err: MergeConflictError) -> Self {
        Error::MergeConflict(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
