//! Unit of Work pattern implementation for a Fenland scope.
//!
//! The Unit of Work tracks every change made to managed entities and turns
//! them into one atomic commit per flush.
//!
//! # Overview
//!
//! The Unit of Work:
//! - Tracks new entities to INSERT
//! - Tracks modified (dirty) entities and their changed properties to UPDATE
//! - Tracks deleted entities to DELETE
//! - Tracks relation additions and removals to write as FK updates and join rows
//! - Cascades persistence along relations before anything is written
//! - Restores in-memory state when a commit fails
//!
//! # Example
//!
//! ```ignore
//! let uow = Arc::new(Mutex::new(UnitOfWork::new()));
//! let sink: Arc<dyn ChangeSink> = uow.clone();
//!
//! let user = Proxy::wrap(&ManagedEntity::new(user_mapping), &sink, false);
//! uow.lock().unwrap().register_new(&user)?;
//! user.set("name", "foo")?;            // still new, not dirty
//!
//! let mut plan = uow.lock().unwrap().plan_commit()?;
//! let result = plan.execute(&cx, &stores, &hooks, false).await;
//! ```

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use fenland_core::{Error, FieldOptions, RelationErrorKind, Result, StateErrorKind};

use crate::delta::RelationChange;
use crate::entity::{EntityId, ManagedEntity};
use crate::flush::{CommitPlan, PendingUpdate};
use crate::hooks::QueuedHook;
use crate::metadata::{EntityState, MetadataStore};
use crate::proxy::ChangeSink;

/// Tracks and manages all pending changes in a scope.
///
/// An entity appears in at most one of the new, dirty, clean and deleted
/// sets, matching its recorded state. The relationships-changed set is
/// orthogonal: any tracked entity may also carry pending relation changes.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    /// Entities staged for insertion.
    new: BTreeMap<EntityId, ManagedEntity>,

    /// Entities with changed properties.
    dirty: BTreeMap<EntityId, ManagedEntity>,

    /// Entities in sync with their store.
    clean: BTreeMap<EntityId, ManagedEntity>,

    /// Entities staged for deletion.
    deleted: BTreeMap<EntityId, ManagedEntity>,

    /// Entities with a non-empty relation delta.
    relationships_changed: BTreeMap<EntityId, ManagedEntity>,

    /// State, dirty properties and relation deltas per entity.
    meta: MetadataStore,
}

/// Summary of pending changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub new: usize,
    pub dirty: usize,
    pub deleted: usize,
    pub relations: usize,
}

impl PendingCounts {
    /// Total number of pending entries.
    pub fn total(&self) -> usize {
        self.new + self.dirty + self.deleted + self.relations
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl UnitOfWork {
    /// Create an empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of an entity.
    pub fn state_of(&self, entity: &ManagedEntity) -> EntityState {
        self.meta.state(entity.id())
    }

    /// Properties changed since the entity was last clean.
    pub fn dirty_properties(&self, entity: &ManagedEntity) -> Vec<String> {
        self.meta
            .get(entity.id())
            .map(|m| m.dirty_properties.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Does the entity have a pending relation change of this kind?
    pub fn has_relation_change(
        &self,
        entity: &ManagedEntity,
        property: &str,
        change: RelationChange,
        target: &ManagedEntity,
    ) -> bool {
        self.meta.get(entity.id()).is_some_and(|m| {
            m.relation_changes
                .contains(property, change, target.id())
        })
    }

    /// Stage an entity for insertion.
    ///
    /// Registering an entity that is already new is a no-op. Any other
    /// known state is rejected.
    pub fn register_new(&mut self, entity: &ManagedEntity) -> Result<()> {
        match self.state_of(entity) {
            EntityState::New => return Ok(()),
            EntityState::Unknown => {}
            state => {
                return Err(Error::invalid_transition(
                    StateErrorKind::AlreadyKnown,
                    entity.entity_name(),
                    format!("only unknown entities can be marked as new, this one is {state}"),
                ));
            }
        }
        self.move_to(entity, EntityState::New);
        entity.activate();
        tracing::debug!(entity = entity.entity_name(), id = %entity.id(), "Registered new");
        Ok(())
    }

    /// Record changed properties.
    ///
    /// New and unknown entities stay as they are: new entities are inserted
    /// with their current values anyway.
    pub fn register_dirty(&mut self, entity: &ManagedEntity, properties: &[&str]) -> Result<()> {
        if properties.is_empty() {
            return Err(Error::invalid_transition(
                StateErrorKind::NoProperties,
                entity.entity_name(),
                "registering an entity as dirty requires at least one property",
            ));
        }
        match self.state_of(entity) {
            EntityState::Unknown | EntityState::New => return Ok(()),
            EntityState::Deleted => {
                return Err(Error::invalid_transition(
                    StateErrorKind::DeletedDirty,
                    entity.entity_name(),
                    "trying to mark entity staged for deletion as dirty",
                ));
            }
            EntityState::Clean | EntityState::Dirty => {}
        }
        self.move_to(entity, EntityState::Dirty);
        let meta = self.meta.entry(entity.id());
        meta.dirty_properties
            .extend(properties.iter().map(|p| (*p).to_string()));
        tracing::trace!(entity = entity.entity_name(), id = %entity.id(), ?properties, "Registered dirty");
        Ok(())
    }

    /// Stage an entity for deletion, whatever its current state.
    ///
    /// Pending relation changes owned by the entity are discarded: its row
    /// is going away, so there is no foreign key or join row left to write.
    pub fn register_deleted(&mut self, entity: &ManagedEntity) {
        self.move_to(entity, EntityState::Deleted);
        self.meta.entry(entity.id()).relation_changes = Default::default();
        self.relationships_changed.remove(&entity.id());
        tracing::debug!(entity = entity.entity_name(), id = %entity.id(), "Registered deleted");
    }

    /// Mark an entity as in sync with its store and start tracking changes.
    ///
    /// Unless `fresh` is set, pending relation changes and dirty markers
    /// are discarded.
    pub fn register_clean(&mut self, entity: &ManagedEntity, fresh: bool) {
        self.move_to(entity, EntityState::Clean);
        if !fresh {
            let meta = self.meta.entry(entity.id());
            meta.dirty_properties.clear();
            meta.relation_changes = Default::default();
            self.relationships_changed.remove(&entity.id());
        }
        entity.activate();
    }

    /// Record an addition or removal on a to-one relation.
    pub fn register_relation_change(
        &mut self,
        entity: &ManagedEntity,
        property: &str,
        target: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        self.relation_field(entity, property)?;
        self.record_relation_change(entity, property, target, change);
        Ok(())
    }

    /// Record an addition or removal on a to-many collection.
    pub fn register_collection_change(
        &mut self,
        entity: &ManagedEntity,
        property: &str,
        item: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        let field = self.relation_field(entity, property)?;
        let is_to_many = field
            .relationship
            .as_ref()
            .is_some_and(|r| r.kind.is_to_many());
        if !is_to_many {
            return Err(Error::relation(
                RelationErrorKind::NotACollection,
                entity.entity_name(),
                property,
                "collection change on a to-one relation",
            ));
        }
        self.record_relation_change(entity, property, item, change);
        Ok(())
    }

    /// Forget an entity entirely and stop tracking its changes.
    pub fn detach(&mut self, entity: &ManagedEntity) {
        let id = entity.id();
        self.remove_from_sets(id);
        self.relationships_changed.remove(&id);
        self.meta.remove(id);
        entity.deactivate();
    }

    /// Summary of pending changes.
    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            new: self.new.len(),
            dirty: self.dirty.len(),
            deleted: self.deleted.len(),
            relations: self.relationships_changed.len(),
        }
    }

    /// Check if there are any pending changes.
    pub fn has_changes(&self) -> bool {
        !self.pending_counts().is_empty()
    }

    /// Entities currently known, in registration order.
    pub fn tracked(&self) -> Vec<ManagedEntity> {
        let mut all: BTreeMap<EntityId, ManagedEntity> = BTreeMap::new();
        for set in [&self.new, &self.dirty, &self.clean, &self.deleted] {
            all.extend(set.iter().map(|(id, e)| (*id, e.clone())));
        }
        all.into_values().collect()
    }

    /// Drop every tracked entity and its metadata.
    pub fn clear(&mut self) {
        for entity in self.tracked() {
            entity.deactivate();
        }
        self.new.clear();
        self.dirty.clear();
        self.clean.clear();
        self.deleted.clear();
        self.relationships_changed.clear();
        self.meta.clear();
    }

    /// Cascade persistence and snapshot everything the flush must write.
    ///
    /// Nothing is written and no state changes are lost if this fails;
    /// entities pulled in by cascade persist stay new.
    pub fn plan_commit(&mut self) -> Result<CommitPlan> {
        self.prepare_cascades()?;

        let inserts: Vec<ManagedEntity> = self.new.values().cloned().collect();
        let updates: Vec<PendingUpdate> = self
            .dirty
            .values()
            .filter_map(|entity| {
                let properties = self.meta.get(entity.id())?.dirty_properties.clone();
                (!properties.is_empty()).then(|| PendingUpdate {
                    entity: entity.clone(),
                    properties,
                })
            })
            .collect();
        let mut deletes = Vec::new();
        for entity in self.deleted.values() {
            if entity.primary_key().is_some() {
                deletes.push(entity.clone());
            } else {
                tracing::debug!(
                    entity = entity.entity_name(),
                    id = %entity.id(),
                    "Deleted entity has no primary key, nothing to delete"
                );
            }
        }
        let relations = self
            .relationships_changed
            .values()
            .filter_map(|entity| {
                let delta = self.meta.get(entity.id())?.relation_changes.clone();
                (!delta.is_empty()).then(|| (entity.clone(), delta))
            })
            .collect();

        Ok(CommitPlan::new(inserts, updates, deletes, relations))
    }

    /// Reclassify entities after every store committed.
    ///
    /// Written entities become clean, deleted entities are forgotten. The
    /// plan's queued after-commit hooks are handed back to run once no lock
    /// is held.
    pub fn finish_commit(&mut self, plan: &mut CommitPlan) -> Vec<QueuedHook> {
        let written: Vec<ManagedEntity> = self
            .new
            .values()
            .chain(self.dirty.values())
            .chain(self.relationships_changed.values())
            .filter(|e| self.meta.state(e.id()) != EntityState::Deleted)
            .cloned()
            .collect();
        for entity in &written {
            self.register_clean(entity, false);
        }

        let deleted: Vec<ManagedEntity> = self.deleted.values().cloned().collect();
        for entity in &deleted {
            self.detach(entity);
        }
        self.relationships_changed.clear();

        tracing::debug!(
            cleaned = written.len(),
            forgotten = deleted.len(),
            "Unit of work cleaned"
        );
        plan.take_queued_hooks()
    }

    /// Undo the in-memory effects of a failed commit.
    ///
    /// Primary keys generated during the failed flush are stripped and new
    /// entities are deactivated. Every entity stays in its set, so the
    /// same flush can be retried.
    pub fn rollback_new(&mut self, plan: &mut CommitPlan) {
        for entity in plan.take_generated_keys() {
            entity.strip_primary_key();
        }
        for entity in self.new.values() {
            entity.deactivate();
        }
        plan.take_queued_hooks();
    }

    /// Walk relations reachable from new entities and relation changes.
    ///
    /// Unknown related entities are registered as new when the relation
    /// cascades persist, and rejected otherwise. Linking to an entity staged
    /// for deletion is rejected. Each new entity's current relation values
    /// are recorded as additions so their foreign keys and join rows get
    /// written.
    pub fn prepare_cascades(&mut self) -> Result<()> {
        let mut queue: Vec<ManagedEntity> = self.new.values().cloned().collect();
        let mut visited = std::collections::HashSet::new();

        while let Some(entity) = queue.pop() {
            if !visited.insert(entity.id()) {
                continue;
            }
            for (property, items) in entity.relation_values() {
                let Some(field) = entity.mapping().field(&property) else {
                    continue;
                };
                for related in items {
                    if related == entity {
                        continue;
                    }
                    if self.cascade_single(&entity, field, &related, RelationChange::Added)? {
                        queue.push(related.clone());
                    }
                    self.record_relation_change(&entity, &property, &related, RelationChange::Added);
                }
            }
        }

        let changed: Vec<(ManagedEntity, Vec<(String, RelationChange, ManagedEntity)>)> = self
            .relationships_changed
            .values()
            .filter(|e| !visited.contains(&e.id()))
            .filter_map(|entity| {
                let delta = &self.meta.get(entity.id())?.relation_changes;
                let mut changes = Vec::new();
                for (property, pd) in delta.properties() {
                    changes.extend(
                        pd.added()
                            .map(|t| (property.to_string(), RelationChange::Added, t.clone())),
                    );
                    changes.extend(
                        pd.removed()
                            .map(|t| (property.to_string(), RelationChange::Removed, t.clone())),
                    );
                }
                Some((entity.clone(), changes))
            })
            .collect();

        for (entity, changes) in changed {
            for (property, change, related) in changes {
                let Some(field) = entity.mapping().field(&property) else {
                    continue;
                };
                if related == entity {
                    continue;
                }
                if self.cascade_single(&entity, field, &related, change)? {
                    // newly cascaded entities need their own relations prepared
                    queue.push(related);
                }
            }
        }
        if !queue.is_empty() {
            return self.prepare_cascades();
        }
        Ok(())
    }

    /// Check one related entity. Returns true when it was newly registered
    /// by cascade persist.
    fn cascade_single(
        &mut self,
        parent: &ManagedEntity,
        field: &FieldOptions,
        related: &ManagedEntity,
        change: RelationChange,
    ) -> Result<bool> {
        match self.state_of(related) {
            EntityState::Unknown => {
                if field.cascades_persist() {
                    self.register_new(related)?;
                    tracing::debug!(
                        parent = parent.entity_name(),
                        property = %field.property,
                        entity = related.entity_name(),
                        "Cascaded persist"
                    );
                    Ok(true)
                } else {
                    Err(Error::relation(
                        RelationErrorKind::UnpersistedRelation,
                        parent.entity_name(),
                        field.property.clone(),
                        format!(
                            "un-persisted relation found on {}.{}; either persist the entity, or use the cascade persist option",
                            parent.entity_name(),
                            field.property
                        ),
                    ))
                }
            }
            EntityState::Deleted if change == RelationChange::Added => Err(Error::relation(
                RelationErrorKind::DeletedRelation,
                parent.entity_name(),
                field.property.clone(),
                format!(
                    "trying to link {}.{} to an entity staged for deletion",
                    parent.entity_name(),
                    field.property
                ),
            )),
            _ => Ok(false),
        }
    }

    fn relation_field<'e>(&self, entity: &'e ManagedEntity, property: &str) -> Result<&'e FieldOptions> {
        match entity.mapping().field(property) {
            Some(field) if field.is_relation() => Ok(field),
            Some(_) => Err(Error::relation(
                RelationErrorKind::NotARelation,
                entity.entity_name(),
                property,
                "property is not a relation",
            )),
            None => Err(Error::relation(
                RelationErrorKind::UnknownProperty,
                entity.entity_name(),
                property,
                "property is not mapped",
            )),
        }
    }

    fn record_relation_change(
        &mut self,
        entity: &ManagedEntity,
        property: &str,
        target: &ManagedEntity,
        change: RelationChange,
    ) {
        if self.state_of(entity) == EntityState::Deleted {
            tracing::trace!(entity = entity.entity_name(), property, "Ignoring relation change on deleted entity");
            return;
        }
        let meta = self.meta.entry(entity.id());
        meta.relation_changes
            .record(property, change, target.id(), target.clone());
        if meta.relation_changes.is_empty() {
            self.relationships_changed.remove(&entity.id());
        } else {
            self.relationships_changed
                .insert(entity.id(), entity.clone());
        }
    }

    fn move_to(&mut self, entity: &ManagedEntity, state: EntityState) {
        let id = entity.id();
        self.remove_from_sets(id);
        let set = match state {
            EntityState::New => &mut self.new,
            EntityState::Dirty => &mut self.dirty,
            EntityState::Clean => &mut self.clean,
            EntityState::Deleted => &mut self.deleted,
            EntityState::Unknown => {
                self.meta.remove(id);
                return;
            }
        };
        set.insert(id, entity.clone());
        self.meta.entry(id).state = state;
        if state != EntityState::Dirty {
            self.meta.entry(id).dirty_properties.clear();
        }
    }

    fn remove_from_sets(&mut self, id: EntityId) {
        self.new.remove(&id);
        self.dirty.remove(&id);
        self.clean.remove(&id);
        self.deleted.remove(&id);
    }
}

impl ChangeSink for Mutex<UnitOfWork> {
    fn property_changed(&self, entity: &ManagedEntity, property: &str) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .register_dirty(entity, &[property])
    }

    fn relation_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        target: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .register_relation_change(entity, property, target, change)
    }

    fn collection_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        item: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .register_collection_change(entity, property, item, change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Assignment;
    use crate::proxy::Proxy;
    use crate::testing::library;
    use fenland_core::{MappingRegistry, StateError, Value};
    use std::sync::Arc;

    struct Fixture {
        registry: Arc<MappingRegistry>,
        uow: Arc<Mutex<UnitOfWork>>,
        sink: Arc<dyn ChangeSink>,
    }

    impl Fixture {
        fn new() -> Self {
            let uow = Arc::new(Mutex::new(UnitOfWork::new()));
            let sink: Arc<dyn ChangeSink> = uow.clone();
            Self {
                registry: Arc::new(library()),
                uow,
                sink,
            }
        }

        fn entity(&self, name: &str) -> ManagedEntity {
            let entity = ManagedEntity::new(Arc::clone(self.registry.get(name).unwrap()));
            Proxy::wrap(&entity, &self.sink, false)
        }

        /// An entity as if loaded from the store.
        fn loaded(&self, name: &str, pk: i64) -> ManagedEntity {
            let entity = self.entity(name);
            entity
                .assign("id", Value::BigInt(pk), Assignment::SkipDirty)
                .unwrap();
            self.uow().register_clean(&entity, true);
            entity
        }

        fn uow(&self) -> std::sync::MutexGuard<'_, UnitOfWork> {
            self.uow.lock().unwrap()
        }
    }

    fn state_kind(err: Error) -> StateErrorKind {
        match err {
            Error::State(StateError { kind, .. }) => kind,
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[test]
    fn test_new_entity_writes_do_not_mark_dirty() {
        let f = Fixture::new();
        let user = f.entity("User");
        f.uow().register_new(&user).unwrap();
        user.set("name", "foo").unwrap();

        assert_eq!(f.uow().state_of(&user), EntityState::New);
        assert!(f.uow().dirty_properties(&user).is_empty());
        assert_eq!(f.uow().pending_counts().dirty, 0);
    }

    #[test]
    fn test_clean_entity_becomes_dirty_on_changed_value_only() {
        let f = Fixture::new();
        let user = f.loaded("User", 1);
        user.assign("name", Value::from("foo"), Assignment::SkipDirty)
            .unwrap();

        user.set("name", "foo").unwrap();
        assert_eq!(f.uow().state_of(&user), EntityState::Clean);

        user.set("name", "bar").unwrap();
        user.set("email", "bar@example.com").unwrap();
        assert_eq!(f.uow().state_of(&user), EntityState::Dirty);
        assert_eq!(f.uow().dirty_properties(&user), vec!["email", "name"]);
    }

    #[test]
    fn test_relation_change_and_revert_cancel_out() {
        let f = Fixture::new();
        let publisher = f.loaded("Publisher", 1);
        let book = f.loaded("Book", 2);

        publisher
            .collection("books")
            .unwrap()
            .push(book.clone())
            .unwrap();
        assert!(f.uow().has_relation_change(&publisher, "books", RelationChange::Added, &book));
        assert_eq!(f.uow().pending_counts().relations, 1);

        publisher
            .collection("books")
            .unwrap()
            .remove(&book)
            .unwrap();
        assert!(!f.uow().has_relation_change(&publisher, "books", RelationChange::Added, &book));
        assert!(!f.uow().has_relation_change(&publisher, "books", RelationChange::Removed, &book));
        assert!(!f.uow().has_changes());
    }

    #[test]
    fn test_register_new_rejects_known_entities() {
        let f = Fixture::new();
        let user = f.loaded("User", 1);
        let err = f.uow().register_new(&user).unwrap_err();
        assert_eq!(state_kind(err), StateErrorKind::AlreadyKnown);

        let fresh = f.entity("User");
        f.uow().register_new(&fresh).unwrap();
        f.uow().register_new(&fresh).unwrap();
        assert_eq!(f.uow().pending_counts().new, 1);
    }

    #[test]
    fn test_deleted_entity_cannot_become_dirty() {
        let f = Fixture::new();
        let user = f.loaded("User", 1);
        f.uow().register_deleted(&user);

        let err = user.set("name", "late").unwrap_err();
        assert_eq!(state_kind(err), StateErrorKind::DeletedDirty);
        assert_eq!(user.get("name"), None);
        assert_eq!(f.uow().state_of(&user), EntityState::Deleted);
    }

    #[test]
    fn test_register_dirty_requires_properties() {
        let f = Fixture::new();
        let user = f.loaded("User", 1);
        let err = f.uow().register_dirty(&user, &[]).unwrap_err();
        assert_eq!(state_kind(err), StateErrorKind::NoProperties);
    }

    #[test]
    fn test_register_dirty_twice_keeps_one_property() {
        let f = Fixture::new();
        let user = f.loaded("User", 1);
        f.uow().register_dirty(&user, &["name"]).unwrap();
        f.uow().register_dirty(&user, &["name"]).unwrap();

        assert_eq!(f.uow().dirty_properties(&user), vec!["name"]);
        let plan = f.uow().plan_commit().unwrap();
        assert_eq!(plan.update_count(), 1);
    }

    #[test]
    fn test_unknown_entities_ignore_dirty_registration() {
        let f = Fixture::new();
        let user = f.entity("User");
        f.uow().register_dirty(&user, &["name"]).unwrap();
        assert_eq!(f.uow().state_of(&user), EntityState::Unknown);
    }

    #[test]
    fn test_collection_change_on_to_one_is_rejected() {
        let f = Fixture::new();
        let book = f.loaded("Book", 1);
        let publisher = f.loaded("Publisher", 2);
        let err = f
            .uow()
            .register_collection_change(&book, "publisher", &publisher, RelationChange::Added)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Relation(e) if e.kind == RelationErrorKind::NotACollection
        ));
    }

    #[test]
    fn test_cascade_persist_registers_related_entities() {
        let f = Fixture::new();
        let publisher = f.entity("Publisher");
        let book = f.entity("Book");
        publisher
            .collection("books")
            .unwrap()
            .push(book.clone())
            .unwrap();
        f.uow().register_new(&publisher).unwrap();

        let plan = f.uow().plan_commit().unwrap();
        assert_eq!(plan.insert_count(), 2);
        assert_eq!(f.uow().state_of(&book), EntityState::New);
        assert!(book.is_active());
        assert!(f.uow().has_relation_change(&publisher, "books", RelationChange::Added, &book));
    }

    #[test]
    fn test_unpersisted_relation_without_cascade_is_rejected() {
        let f = Fixture::new();
        let book = f.entity("Book");
        let tag = f.entity("Tag");
        book.collection("tags").unwrap().push(tag).unwrap();
        f.uow().register_new(&book).unwrap();

        let err = f.uow().plan_commit().unwrap_err();
        match err {
            Error::Relation(e) => {
                assert!(e.is_cascade_violation());
                assert_eq!(e.kind, RelationErrorKind::UnpersistedRelation);
                assert!(e.message.contains("un-persisted relation found"));
                assert!(e.message.contains("cascade persist"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_linking_to_deleted_entity_is_rejected() {
        let f = Fixture::new();
        let publisher = f.loaded("Publisher", 1);
        let book = f.loaded("Book", 2);
        f.uow().register_deleted(&publisher);
        book.set_one("publisher", Some(publisher)).unwrap();

        let err = f.uow().plan_commit().unwrap_err();
        assert!(matches!(
            err,
            Error::Relation(e) if e.kind == RelationErrorKind::DeletedRelation
        ));
    }

    #[test]
    fn test_deleted_without_primary_key_is_not_planned() {
        let f = Fixture::new();
        let user = f.entity("User");
        f.uow().register_deleted(&user);
        let plan = f.uow().plan_commit().unwrap();
        assert_eq!(plan.delete_count(), 0);
    }

    #[test]
    fn test_deleting_entity_discards_its_relation_changes() {
        let f = Fixture::new();
        let publisher = f.loaded("Publisher", 1);
        let book = f.loaded("Book", 2);
        publisher
            .collection("books")
            .unwrap()
            .push(book.clone())
            .unwrap();
        f.uow().register_deleted(&publisher);
        assert!(!f.uow().has_relation_change(&publisher, "books", RelationChange::Added, &book));

        let late = f.loaded("Book", 3);
        publisher.collection("books").unwrap().push(late).unwrap();
        assert_eq!(f.uow().pending_counts().relations, 0);

        let plan = f.uow().plan_commit().unwrap();
        assert_eq!(plan.delete_count(), 1);
        assert_eq!(plan.relation_count(), 0);
    }

    #[test]
    fn test_new_entity_removed_before_commit_is_forgotten() {
        let f = Fixture::new();
        let publisher = f.entity("Publisher");
        f.uow().register_new(&publisher).unwrap();
        let book = f.loaded("Book", 2);
        publisher
            .collection("books")
            .unwrap()
            .push(book)
            .unwrap();
        f.uow().register_deleted(&publisher);

        let mut plan = f.uow().plan_commit().unwrap();
        assert!(plan.is_empty());
        f.uow().finish_commit(&mut plan);
        assert_eq!(f.uow().state_of(&publisher), EntityState::Unknown);
        assert!(!f.uow().has_changes());
    }

    #[test]
    fn test_finish_commit_cleans_and_forgets() {
        let f = Fixture::new();
        let user = f.entity("User");
        f.uow().register_new(&user).unwrap();
        let gone = f.loaded("User", 5);
        f.uow().register_deleted(&gone);

        let mut plan = f.uow().plan_commit().unwrap();
        f.uow().finish_commit(&mut plan);

        assert_eq!(f.uow().state_of(&user), EntityState::Clean);
        assert_eq!(f.uow().state_of(&gone), EntityState::Unknown);
        assert!(!f.uow().has_changes());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let f = Fixture::new();
        let user = f.entity("User");
        f.uow().register_new(&user).unwrap();
        f.uow().clear();
        assert_eq!(f.uow().state_of(&user), EntityState::Unknown);
        assert!(!user.is_active());
        assert!(f.uow().tracked().is_empty());
    }
}
