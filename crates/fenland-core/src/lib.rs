//! Core types and traits for Fenland.
//!
//! This crate provides the foundations the unit of work and the schema
//! differ are built on:
//!
//! - `Value` for dynamically typed property values
//! - `EntityMapping` and `MappingRegistry` for read-only entity metadata
//! - `Connection` / `TransactionOps` for executing statements
//! - `Statement` for building INSERT/UPDATE/DELETE/SELECT SQL
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod mapping;
pub mod registry;
pub mod row;
pub mod statement;
pub mod store;
pub mod value;

pub use connection::{Connection, TransactionOps};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, MappingError,
    QueryError, QueryErrorKind, RefreshError, RefreshFailure, RelationError, RelationErrorKind,
    Result, SchemaError, SchemaErrorKind, StateError, StateErrorKind, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use identifiers::{is_valid_identifier, quote_ident};
pub use mapping::{
    Cascade, EntityMapping, EntityOptions, FieldOptions, FieldType, JoinColumn, JoinTable,
    MappingSnapshot, ReferentialAction, RelationKind, Relationship,
};
pub use registry::MappingRegistry;
pub use row::Row;
pub use statement::{Condition, Statement};
pub use store::StoreSet;
pub use value::Value;
