//! Error types for Fenland operations.

use std::fmt;

/// The primary error type for all Fenland operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Invalid lifecycle state transition
    State(StateError),
    /// Relation assignment with the wrong entity type
    Type(TypeError),
    /// Relation bookkeeping and cascade violations
    Relation(RelationError),
    /// Mapping registry errors
    Mapping(MappingError),
    /// Aggregated per-entity refresh failures
    Refresh(RefreshError),
    /// Schema/diff errors
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// No connection is registered for the requested store
    UnknownStore,
}

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
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Begin failed
    Begin,
    /// Commit failed
    Commit,
    /// Rollback failed
    Rollback,
}

/// An illegal lifecycle transition requested by application code.
#[derive(Debug, Clone)]
pub struct StateError {
    pub kind: StateErrorKind,
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// Marking an entity that already has a known state as new
    AlreadyKnown,
    /// Marking an entity staged for deletion as dirty
    DeletedDirty,
    /// Dirty registration without any property names
    NoProperties,
    /// The entity is not attached to this scope
    Unmanaged,
}

/// A relation was assigned a value of the wrong entity type.
#[derive(Debug, Clone)]
pub struct TypeError {
    /// Entity owning the relation
    pub entity: String,
    /// Relation property
    pub property: String,
    /// Declared target entity
    pub expected: String,
    /// Entity that was actually assigned
    pub actual: String,
}

#[derive(Debug, Clone)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    pub entity: String,
    pub property: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// Assigning a list to a collection that already holds items
    CollectionNotEmpty,
    /// Deleting a collection property
    CollectionUnset,
    /// Relation operation on a plain field
    NotARelation,
    /// Collection operation on a to-one relation
    NotACollection,
    /// Scalar assignment to a relation property
    ExpectedField,
    /// Collection index past the end
    IndexOutOfBounds,
    /// Property is not declared on the mapping
    UnknownProperty,
    /// Related entity is not persisted and cascade persist is off
    UnpersistedRelation,
    /// Linking to an entity staged for deletion
    DeletedRelation,
}

#[derive(Debug, Clone)]
pub struct MappingError {
    pub entity: String,
    pub message: String,
}

/// One failed entity in a refresh batch.
#[derive(Debug)]
pub struct RefreshFailure {
    pub entity: String,
    pub error: Box<Error>,
}

#[derive(Debug)]
pub struct RefreshError {
    pub failures: Vec<RefreshFailure>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Snapshot could not be read
    InvalidSnapshot,
    /// Relation references an entity missing from the snapshot
    UnknownTarget,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (deadlock, serialization, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Connection(c) => matches!(c.kind, ConnectionErrorKind::Disconnected),
            _ => false,
        }
    }

    /// Is this a structural error in the object graph or mapping?
    ///
    /// These are never fixed by retrying the same flush.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::State(_) | Error::Type(_) | Error::Relation(_) | Error::Mapping(_)
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn state(
        kind: StateErrorKind,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::State(StateError {
            kind,
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// Build a relation error.
    pub fn relation(
        kind: RelationErrorKind,
        entity: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Relation(RelationError {
            kind,
            entity: entity.into(),
            property: property.into(),
            message: message.into(),
        })
    }

    /// Build an invalid-transition error.
    pub fn invalid_transition(
        kind: StateErrorKind,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::state(kind, entity, message)
    }

    /// Build a mapping error.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            message: message.into(),
        })
    }
}

impl RelationError {
    /// Is this a cascade-preparation failure (raised before any SQL runs)?
    pub fn is_cascade_violation(&self) -> bool {
        matches!(
            self.kind,
            RelationErrorKind::UnpersistedRelation | RelationErrorKind::DeletedRelation
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::State(e) => write!(f, "Invalid state transition for '{}': {}", e.entity, e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Relation(e) => write!(f, "Relation error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error for '{}': {}", e.entity, e.message),
            Error::Refresh(e) => write!(f, "Refresh error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Refresh(e) => e
                .failures
                .first()
                .map(|failure| failure.error.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "can't assign '{}' to '{}.{}', expected an instance of '{}'",
            self.actual, self.entity, self.property, self.expected
        )
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}.{})", self.message, self.entity, self.property)
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.len() == 1 {
            let failure = &self.failures[0];
            write!(f, "'{}': {}", failure.entity, failure.error)
        } else {
            writeln!(f, "{} entities failed to refresh:", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "  - {}: {}", failure.entity, failure.error)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        Error::Refresh(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Fenland operations.
pub type Result<T> = std::result::Result<T, Error>;
