//! Mapping snapshots and schema diffing for Fenland.
//!
//! This crate provides:
//! - [`Snapshot`]: a serializable dump of every entity mapping
//! - [`SchemaDiffer`]: compares two snapshots and stages per-store
//!   [`Instructions`] (create, alter, drop, rename, foreign keys)
//! - [`ddl::render`]: turns instructions into ordered SQL statements
//!
//! # Example
//!
//! ```ignore
//! use fenland_schema::{SchemaDiffer, Snapshot, ddl, snapshot_of};
//!
//! let previous = Snapshot::from_json(&stored_json)?;
//! let current = snapshot_of(&registry);
//! for (store, instructions) in SchemaDiffer::new("default").diff(&previous, &current)? {
//!     apply(&store, ddl::render(&instructions));
//! }
//! let stored_json = current.to_json()?;
//! ```

pub mod ddl;
pub mod diff;
pub mod instructions;
pub mod naming;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use diff::SchemaDiffer;
pub use instructions::{
    AlterTable, ColumnDefinition, ForeignInstructions, ForeignKey, Instructions, Rename,
    TableDefinition, TableMeta,
};
pub use snapshot::{Snapshot, snapshot_of};
