//! Per-entity bookkeeping kept outside the entities themselves.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::delta::RelationDelta;
use crate::entity::{EntityId, ManagedEntity};

/// Lifecycle state of an entity within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Never registered with this unit of work.
    #[default]
    Unknown,
    /// Staged for insertion.
    New,
    /// In sync with the store.
    Clean,
    /// Has changed properties waiting for an UPDATE.
    Dirty,
    /// Staged for deletion.
    Deleted,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Unknown => "unknown",
            EntityState::New => "new",
            EntityState::Clean => "clean",
            EntityState::Dirty => "dirty",
            EntityState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Side-table entry for one entity.
#[derive(Debug, Default)]
pub struct EntityMeta {
    pub state: EntityState,
    /// Properties changed since the entity was last clean.
    pub dirty_properties: BTreeSet<String>,
    /// Relation additions and removals not yet written.
    pub relation_changes: RelationDelta<ManagedEntity>,
}

/// Side table from entity identity to its bookkeeping.
#[derive(Debug, Default)]
pub struct MetadataStore {
    entries: HashMap<EntityId, EntityMeta>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of an entity; `Unknown` if it has no entry.
    pub fn state(&self, id: EntityId) -> EntityState {
        self.entries.get(&id).map_or(EntityState::Unknown, |m| m.state)
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityMeta> {
        self.entries.get(&id)
    }

    /// Entry for an entity, created on first use.
    pub fn entry(&mut self, id: EntityId) -> &mut EntityMeta {
        self.entries.entry(id).or_default()
    }

    pub fn remove(&mut self, id: EntityId) -> Option<EntityMeta> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
