//! Pending relation changes with add/remove cancellation.
//!
//! A [`RelationDelta`] holds, per relation property, the set of related
//! entities added and the set removed since the last commit. Recording a
//! change whose inverse is already pending cancels both, so an
//! add-then-remove sequence leaves nothing behind to turn into SQL.

use std::collections::BTreeMap;

use crate::entity::EntityId;

/// Direction of a relation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationChange {
    Added,
    Removed,
}

impl RelationChange {
    pub const fn inverse(self) -> Self {
        match self {
            RelationChange::Added => RelationChange::Removed,
            RelationChange::Removed => RelationChange::Added,
        }
    }
}

/// Added and removed items of one relation property.
#[derive(Debug, Clone)]
pub struct PropertyDelta<T> {
    added: BTreeMap<EntityId, T>,
    removed: BTreeMap<EntityId, T>,
}

impl<T> Default for PropertyDelta<T> {
    fn default() -> Self {
        Self {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }
}

impl<T> PropertyDelta<T> {
    fn side_mut(&mut self, change: RelationChange) -> &mut BTreeMap<EntityId, T> {
        match change {
            RelationChange::Added => &mut self.added,
            RelationChange::Removed => &mut self.removed,
        }
    }

    pub fn added(&self) -> impl Iterator<Item = &T> {
        self.added.values()
    }

    pub fn removed(&self) -> impl Iterator<Item = &T> {
        self.removed.values()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Pending relation changes of one entity, keyed by property.
#[derive(Debug, Clone)]
pub struct RelationDelta<T> {
    properties: BTreeMap<String, PropertyDelta<T>>,
}

impl<T> Default for RelationDelta<T> {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
        }
    }
}

impl<T> RelationDelta<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a change log into a delta, cancelling inverse pairs.
    pub fn reconcile<I, S>(changes: I) -> Self
    where
        I: IntoIterator<Item = (S, RelationChange, EntityId, T)>,
        S: AsRef<str>,
    {
        let mut delta = Self::new();
        for (property, change, key, item) in changes {
            delta.record(property.as_ref(), change, key, item);
        }
        delta
    }

    /// Record one change.
    ///
    /// Returns `true` when the change cancelled a pending inverse.
    pub fn record(&mut self, property: &str, change: RelationChange, key: EntityId, item: T) -> bool {
        let entry = self.properties.entry(property.to_string()).or_default();
        let cancelled = entry.side_mut(change.inverse()).remove(&key).is_some();
        if !cancelled {
            entry.side_mut(change).insert(key, item);
        }
        if entry.is_empty() {
            self.properties.remove(property);
        }
        cancelled
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Number of pending (property, item) changes.
    pub fn len(&self) -> usize {
        self.properties
            .values()
            .map(|p| p.added.len() + p.removed.len())
            .sum()
    }

    pub fn property(&self, property: &str) -> Option<&PropertyDelta<T>> {
        self.properties.get(property)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyDelta<T>)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Is `key` pending as `change` on `property`?
    pub fn contains(&self, property: &str, change: RelationChange, key: EntityId) -> bool {
        self.properties.get(property).is_some_and(|p| match change {
            RelationChange::Added => p.added.contains_key(&key),
            RelationChange::Removed => p.removed.contains_key(&key),
        })
    }
}
