//! Identity Map pattern for tracking unique entity instances per primary key.
//!
//! The Identity Map ensures that each row corresponds to exactly one
//! managed entity within a scope:
//!
//! - **Uniqueness**: the same `(entity, primary key)` always yields the same handle
//! - **Cache**: lookups by primary key avoid a round trip to the store
//!
//! Entries are keyed by the primary key value at registration time and are
//! not re-indexed if the key later changes. Per-entity maps are dropped as
//! soon as their last entry goes, so entity types that fall out of use do
//! not keep state alive.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use fenland_core::Value;

use crate::entity::ManagedEntity;

/// Canonical form of a key value, so `Int(1)` and `BigInt(1)` match.
fn canonical_key(value: &Value) -> Value {
    match value {
        Value::Int(v) => Value::BigInt(i64::from(*v)),
        other => other.clone(),
    }
}

/// Hash a primary key value for use as a map key.
fn hash_pk_value(value: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    canonical_key(value).hash(&mut hasher);
    hasher.finish()
}

/// Maps `(entity name, primary key)` to the managed handle of that row.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entities: HashMap<String, HashMap<u64, Vec<(Value, ManagedEntity)>>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the handle for a row.
    pub fn fetch(&self, entity: &str, primary_key: &Value) -> Option<ManagedEntity> {
        let key = canonical_key(primary_key);
        self.entities
            .get(entity)?
            .get(&hash_pk_value(primary_key))?
            .iter()
            .find(|(pk, _)| *pk == key)
            .map(|(_, handle)| handle.clone())
    }

    /// Register a handle under its current primary key.
    ///
    /// Returns `false` (and registers nothing) when the entity has no
    /// primary key value yet.
    pub fn register(&mut self, entity: &ManagedEntity) -> bool {
        let Some(primary_key) = entity.primary_key() else {
            return false;
        };
        let key = canonical_key(&primary_key);
        let bucket = self
            .entities
            .entry(entity.entity_name().to_string())
            .or_default()
            .entry(hash_pk_value(&primary_key))
            .or_default();
        if let Some(slot) = bucket.iter_mut().find(|(pk, _)| *pk == key) {
            slot.1 = entity.clone();
        } else {
            bucket.push((key, entity.clone()));
        }
        tracing::trace!(entity = entity.entity_name(), pk = ?primary_key, "Registered in identity map");
        true
    }

    /// Remove the entry pointing at this handle, wherever it is filed.
    pub fn remove(&mut self, entity: &ManagedEntity) -> bool {
        let name = entity.entity_name();
        let Some(by_pk) = self.entities.get_mut(name) else {
            return false;
        };
        let mut removed = false;
        by_pk.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|(_, handle)| handle != entity);
            removed |= bucket.len() != before;
            !bucket.is_empty()
        });
        if by_pk.is_empty() {
            self.entities.remove(name);
        }
        removed
    }

    /// Drop every entry.
    pub fn reset(&mut self) {
        self.entities.clear();
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.entities
            .values()
            .flat_map(|by_pk| by_pk.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
