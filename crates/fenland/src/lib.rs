//! Fenland - a unit-of-work ORM core for Rust.
//!
//! Fenland tracks changes to mapped entities and writes them to one or more
//! stores in a single atomic commit per store:
//!
//! - Change interception through wrapped [`ManagedEntity`] handles and
//!   observable [`Collection`]s
//! - A [`UnitOfWork`] classifying entities as new, clean, dirty or deleted,
//!   with persist cascades and relation deltas
//! - An [`IdentityMap`] keeping one handle per `(entity, primary key)`
//! - A schema diff engine turning mapping snapshots into DDL
//!
//! # Quick Start
//!
//! ```ignore
//! use fenland::prelude::*;
//!
//! let mut registry = MappingRegistry::new();
//! registry.register(
//!     EntityMapping::new("User")
//!         .with_field(FieldOptions::id("id"))
//!         .with_field(FieldOptions::new("name", FieldType::String).size(255)),
//! )?;
//! registry.complete()?;
//!
//! async fn save(cx: &Cx, scope: &mut Scope<impl Connection>) -> Outcome<CommitResult, Error> {
//!     let user = match scope.create("User") {
//!         Ok(user) => user,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     if let Err(e) = user.set("name", "foo").and_then(|()| scope.persist(&[user.clone()])) {
//!         return Outcome::Err(e);
//!     }
//!     scope.flush(cx, FlushOptions::default()).await
//! }
//! ```

pub use fenland_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Mapping
    Cascade,
    EntityMapping,
    EntityOptions,
    FieldOptions,
    FieldType,
    JoinColumn,
    JoinTable,
    MappingRegistry,
    MappingSnapshot,
    ReferentialAction,
    RelationKind,
    Relationship,
    // Statements and stores
    Condition,
    Connection,
    Row,
    Statement,
    StoreSet,
    TransactionOps,
    Value,
    // Errors
    Error,
    RelationError,
    RelationErrorKind,
    Result,
    StateError,
    StateErrorKind,
};

pub use fenland_session::{
    Assignment, ChangeSink, Collection, CommitResult, EntityData, EntityHooks, EntityId,
    EntityState, FlushOptions, HookRegistry, IdentityMap, ManagedEntity, PendingCounts, Proxy,
    RelationChange, RelationDelta, Scope, SessionConfig, UnitOfWork,
};

pub use fenland_schema::{Instructions, SchemaDiffer, Snapshot, ddl, snapshot_of};

/// Everything needed to map entities, track them and flush.
///
/// ```ignore
/// use fenland::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Assignment, Cascade, Collection, CommitResult, Connection, Cx, EntityHooks, EntityMapping,
        EntityState, Error, FieldOptions, FieldType, FlushOptions, ManagedEntity,
        MappingRegistry, Outcome, Relationship, Result, Row, Scope, SessionConfig, StoreSet,
        Value,
    };
}
