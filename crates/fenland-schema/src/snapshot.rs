//! Serializable snapshots of a mapping registry.
//!
//! A [`Snapshot`] is what the diff engine compares: the full descriptor
//! dump of every entity, keyed by entity name. Snapshots round-trip
//! through JSON so the previous state can be stored next to migrations.

use std::collections::BTreeMap;

use fenland_core::{
    Error, FieldOptions, MappingRegistry, MappingSnapshot, Result, SchemaError, SchemaErrorKind,
};
use serde::{Deserialize, Serialize};

/// Entity name to mapping dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entities: BTreeMap<String, MappingSnapshot>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one entity's mapping dump.
    pub fn insert(&mut self, mapping: MappingSnapshot) {
        self.entities.insert(mapping.entity.name.clone(), mapping);
    }

    pub fn with(mut self, mapping: MappingSnapshot) -> Self {
        self.insert(mapping);
        self
    }

    pub fn remove(&mut self, entity: &str) -> Option<MappingSnapshot> {
        self.entities.remove(entity)
    }

    pub fn get(&self, entity: &str) -> Option<&MappingSnapshot> {
        self.entities.get(entity)
    }

    pub fn entities(&self) -> &BTreeMap<String, MappingSnapshot> {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Primary key field of an entity in this snapshot.
    pub fn primary_field(&self, entity: &str) -> Option<&FieldOptions> {
        self.get(entity)
            .and_then(|m| m.fields.values().find(|f| f.primary))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::Schema(SchemaError {
                kind: SchemaErrorKind::InvalidSnapshot,
                message: format!("failed to serialize snapshot: {e}"),
            })
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Schema(SchemaError {
                kind: SchemaErrorKind::InvalidSnapshot,
                message: format!("failed to parse snapshot: {e}"),
            })
        })
    }
}

/// Dump every mapping of a registry.
pub fn snapshot_of(registry: &MappingRegistry) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for mapping in registry.mappings() {
        snapshot.insert(mapping.serializable());
    }
    tracing::debug!(entities = snapshot.len(), "Captured mapping snapshot");
    snapshot
}
