//! Managed entity handles.
//!
//! A [`ManagedEntity`] is a shared handle to one entity instance: its
//! mapping, scalar property values, to-one relation values and to-many
//! [`Collection`]s. Every handle carries a surrogate [`EntityId`] assigned
//! at construction, which keys the unit of work's side tables.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use fenland_core::{
    EntityMapping, Error, FieldOptions, RelationErrorKind, Relationship, Result, TypeError, Value,
};

use crate::collection::Collection;
use crate::delta::RelationChange;
use crate::proxy::{ChangeSink, Proxy, ProxyState};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Surrogate identity of an entity instance, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u64);

impl EntityId {
    fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a scalar assignment interacts with change tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Assignment {
    /// Compare against the current value and report a change when active.
    #[default]
    Tracked,
    /// Write the raw value without change detection (hydration, generated keys).
    SkipDirty,
}

/// A plain copy of an entity's data, detached from change tracking.
#[derive(Debug, Clone, Default)]
pub struct EntityData {
    pub values: BTreeMap<String, Value>,
    pub to_one: BTreeMap<String, ManagedEntity>,
    pub to_many: BTreeMap<String, Vec<ManagedEntity>>,
}

#[derive(Default)]
struct Slots {
    values: BTreeMap<String, Value>,
    to_one: BTreeMap<String, ManagedEntity>,
    to_many: BTreeMap<String, Collection>,
}

pub(crate) struct EntityInner {
    id: EntityId,
    mapping: Arc<EntityMapping>,
    slots: RwLock<Slots>,
    proxy: ProxyState,
}

/// Shared handle to a mapped entity instance.
#[derive(Clone)]
pub struct ManagedEntity {
    inner: Arc<EntityInner>,
}

impl ManagedEntity {
    /// Create an empty, untracked entity. To-many relations start as empty
    /// collections.
    pub fn new(mapping: Arc<EntityMapping>) -> Self {
        let inner = Arc::new_cyclic(|owner: &Weak<EntityInner>| {
            let mut slots = Slots::default();
            let to_many = mapping.relations().filter_map(|field| {
                field
                    .relationship
                    .as_ref()
                    .filter(|r| r.kind.is_to_many())
                    .map(|r| (field, r))
            });
            for (field, relationship) in to_many {
                slots.to_many.insert(
                    field.property.clone(),
                    Collection::new(owner.clone(), field.property.clone(), relationship),
                );
            }
            EntityInner {
                id: EntityId::next(),
                mapping,
                slots: RwLock::new(slots),
                proxy: ProxyState::default(),
            }
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<EntityInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    pub fn entity_name(&self) -> &str {
        self.inner.mapping.name()
    }

    pub fn mapping(&self) -> &Arc<EntityMapping> {
        &self.inner.mapping
    }

    /// Current value of a scalar property.
    pub fn get(&self, property: &str) -> Option<Value> {
        self.read().values.get(property).cloned()
    }

    /// Assign a scalar property with change tracking.
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        self.assign(property, value.into(), Assignment::Tracked)
    }

    /// Assign a scalar property.
    ///
    /// With [`Assignment::Tracked`] on an active entity, a value that
    /// differs from the current one is reported to the sink before it is
    /// written. Temporal fields compare by their second-precision string
    /// form.
    pub fn assign(&self, property: &str, value: Value, mode: Assignment) -> Result<()> {
        let field = self.scalar_field(property)?;

        if mode == Assignment::Tracked && self.is_active() {
            let old = self.get(property).unwrap_or(Value::Null);
            if !values_equal(field, &old, &value) {
                if let Some(sink) = self.inner.proxy.sink() {
                    sink.property_changed(self, property)?;
                }
            }
        }

        self.write().values.insert(property.to_string(), value);
        Ok(())
    }

    /// Delete a property.
    ///
    /// Collections cannot be unset, only emptied. Removing a to-one value
    /// reports the removal; plain fields are dropped silently.
    pub fn unset(&self, property: &str) -> Result<()> {
        let field = self.declared_field(property)?;
        match &field.relationship {
            Some(relationship) if relationship.kind.is_to_many() => Err(self.relation_error(
                RelationErrorKind::CollectionUnset,
                property,
                "collections can't be unset, only emptied",
            )),
            Some(_) => self.set_one(property, None),
            None => {
                self.write().values.remove(property);
                Ok(())
            }
        }
    }

    /// Current value of a to-one relation.
    pub fn get_one(&self, property: &str) -> Option<ManagedEntity> {
        self.read().to_one.get(property).cloned()
    }

    /// Assign a to-one relation. `None` clears it.
    pub fn set_one(&self, property: &str, target: Option<ManagedEntity>) -> Result<()> {
        let (field, relationship) = self.relation_field(property)?;
        if relationship.kind.is_to_many() {
            return Err(self.relation_error(
                RelationErrorKind::NotACollection,
                property,
                "to-many relations are assigned with set_collection",
            ));
        }
        if let Some(target) = &target {
            self.check_target(&field.property, relationship, target)?;
        }

        let current = self.get_one(property);
        if current.as_ref().map(ManagedEntity::id) == target.as_ref().map(ManagedEntity::id) {
            return Ok(());
        }

        let sink = self.inner.proxy.sink();
        if let (Some(sink), Some(target)) = (&sink, &target) {
            Proxy::wrap(target, sink, false);
        }
        if self.is_active() {
            if let Some(sink) = &sink {
                if let Some(old) = &current {
                    sink.relation_changed(self, property, old, RelationChange::Removed)?;
                }
                if let Some(new) = &target {
                    sink.relation_changed(self, property, new, RelationChange::Added)?;
                }
            }
        }

        let mut slots = self.write();
        match target {
            Some(target) => slots.to_one.insert(property.to_string(), target),
            None => slots.to_one.remove(property),
        };
        Ok(())
    }

    /// The observable collection behind a to-many relation.
    pub fn collection(&self, property: &str) -> Result<Collection> {
        let (_, relationship) = self.relation_field(property)?;
        if !relationship.kind.is_to_many() {
            return Err(self.relation_error(
                RelationErrorKind::NotACollection,
                property,
                "not a to-many relation",
            ));
        }
        let owner = Arc::downgrade(&self.inner);
        let collection = self
            .write()
            .to_many
            .entry(property.to_string())
            .or_insert_with(|| Collection::new(owner, property.to_string(), relationship))
            .clone();
        Ok(collection)
    }

    /// Replace a to-many relation with `items`.
    ///
    /// Only an empty collection can be replaced. Each item is then pushed
    /// onto the existing collection, so handles obtained earlier from
    /// [`ManagedEntity::collection`] see the new items. Passing the
    /// collection's current contents is a no-op.
    pub fn set_collection(&self, property: &str, items: Vec<ManagedEntity>) -> Result<()> {
        let current = self.collection(property)?;
        let existing = current.to_vec();
        if existing == items {
            return Ok(());
        }
        if !existing.is_empty() {
            return Err(self.relation_error(
                RelationErrorKind::CollectionNotEmpty,
                property,
                "can't assign to a collection that is not empty",
            ));
        }

        let (_, relationship) = self.relation_field(property)?;
        for item in &items {
            self.check_target(property, relationship, item)?;
        }
        for item in items {
            current.push(item)?;
        }
        Ok(())
    }

    /// Primary key value, if set and not null.
    pub fn primary_key(&self) -> Option<Value> {
        self.get(self.inner.mapping.primary_key())
            .filter(|v| !v.is_null())
    }

    /// Is this entity wrapped by a proxy?
    pub fn is_proxy(&self) -> bool {
        self.inner.proxy.is_wrapped()
    }

    /// Start reporting changes. Has no effect on unwrapped entities.
    pub fn activate(&self) {
        self.inner.proxy.set_active(true);
    }

    pub fn deactivate(&self) {
        self.inner.proxy.set_active(false);
    }

    pub fn is_active(&self) -> bool {
        self.inner.proxy.is_active()
    }

    /// A plain copy of the entity's data.
    pub fn unwrap(&self) -> EntityData {
        let slots = self.read();
        EntityData {
            values: slots.values.clone(),
            to_one: slots.to_one.clone(),
            to_many: slots
                .to_many
                .iter()
                .map(|(k, c)| (k.clone(), c.to_vec()))
                .collect(),
        }
    }

    pub(crate) fn proxy_state(&self) -> &ProxyState {
        &self.inner.proxy
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn ChangeSink>> {
        self.inner.proxy.sink()
    }

    /// Scalar values keyed by property.
    pub(crate) fn values(&self) -> BTreeMap<String, Value> {
        self.read().values.clone()
    }

    /// Related entities per relation property, to-one and to-many alike.
    pub(crate) fn relation_values(&self) -> Vec<(String, Vec<ManagedEntity>)> {
        let slots = self.read();
        let mut out: Vec<(String, Vec<ManagedEntity>)> = slots
            .to_one
            .iter()
            .map(|(k, v)| (k.clone(), vec![v.clone()]))
            .collect();
        out.extend(
            slots
                .to_many
                .iter()
                .map(|(k, c)| (k.clone(), c.to_vec())),
        );
        out
    }

    pub(crate) fn related_entities(&self) -> Vec<ManagedEntity> {
        self.relation_values()
            .into_iter()
            .flat_map(|(_, items)| items)
            .collect()
    }

    /// Drop the primary key value without change tracking.
    pub(crate) fn strip_primary_key(&self) {
        let pk = self.inner.mapping.primary_key().to_string();
        self.write().values.remove(&pk);
    }

    pub(crate) fn check_target(
        &self,
        property: &str,
        relationship: &Relationship,
        target: &ManagedEntity,
    ) -> Result<()> {
        let matches = match (relationship.target_slot, target.mapping().slot()) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => relationship.target_entity == target.entity_name(),
        };
        if matches {
            Ok(())
        } else {
            Err(Error::Type(TypeError {
                entity: self.entity_name().to_string(),
                property: property.to_string(),
                expected: relationship.target_entity.clone(),
                actual: target.entity_name().to_string(),
            }))
        }
    }

    pub(crate) fn relation_error(
        &self,
        kind: RelationErrorKind,
        property: &str,
        message: &str,
    ) -> Error {
        Error::relation(kind, self.entity_name(), property, message)
    }

    fn declared_field(&self, property: &str) -> Result<&FieldOptions> {
        self.inner.mapping.field(property).ok_or_else(|| {
            self.relation_error(
                RelationErrorKind::UnknownProperty,
                property,
                "property is not mapped",
            )
        })
    }

    fn scalar_field(&self, property: &str) -> Result<&FieldOptions> {
        let field = self.declared_field(property)?;
        if field.is_relation() {
            return Err(self.relation_error(
                RelationErrorKind::ExpectedField,
                property,
                "relation properties are assigned with set_one or set_collection",
            ));
        }
        Ok(field)
    }

    fn relation_field(&self, property: &str) -> Result<(&FieldOptions, &Relationship)> {
        let field = self.declared_field(property)?;
        match &field.relationship {
            Some(relationship) => Ok((field, relationship)),
            None => Err(self.relation_error(
                RelationErrorKind::NotARelation,
                property,
                "property is not a relation",
            )),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slots> {
        self.inner.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Slots> {
        self.inner.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Compare two values of a field the way dirty checking does.
pub(crate) fn values_equal(field: &FieldOptions, old: &Value, new: &Value) -> bool {
    if field.field_type.is_temporal() {
        if let (Some(a), Some(b)) = (old.normalized_datetime(), new.normalized_datetime()) {
            return a == b;
        }
    }
    old == new
}

impl PartialEq for ManagedEntity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ManagedEntity {}

impl fmt::Debug for ManagedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedEntity")
            .field("entity", &self.entity_name())
            .field("id", &self.id())
            .field("values", &self.read().values)
            .field("active", &self.is_active())
            .finish()
    }
}
