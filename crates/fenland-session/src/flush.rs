//! Commit execution.
//!
//! A [`CommitPlan`] is the snapshot of everything one flush writes. It is
//! executed in fixed phases, each statement awaited in turn:
//!
//! 1. INSERT new entities, writing generated keys back
//! 2. UPDATE dirty entities with their changed columns
//! 3. DELETE deleted entities
//! 4. Write relation changes as FK updates and join-table rows
//!
//! Every statement runs inside a transaction on the entity's store. A
//! transaction is opened the first time a store is used and all of them
//! are committed once every phase succeeded. On any failure every open
//! transaction is rolled back.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use asupersync::{Cx, Outcome};
use serde::Serialize;

use fenland_core::{
    Condition, Connection, Error, RelationErrorKind, RelationKind, Result, StateErrorKind,
    Statement, StoreSet, TransactionOps, Value,
};

use crate::delta::{RelationChange, RelationDelta};
use crate::entity::{Assignment, ManagedEntity};
use crate::hooks::{HookKind, HookRegistry, QueuedHook};

/// A dirty entity and the properties to write.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub entity: ManagedEntity,
    pub properties: BTreeSet<String>,
}

/// Statement counts of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub relations: usize,
}

/// Everything one flush will write.
#[derive(Debug, Default)]
pub struct CommitPlan {
    inserts: Vec<ManagedEntity>,
    updates: Vec<PendingUpdate>,
    deletes: Vec<ManagedEntity>,
    relations: Vec<(ManagedEntity, RelationDelta<ManagedEntity>)>,
    /// Entities whose primary key was generated by this flush.
    generated: Vec<ManagedEntity>,
    /// After-commit hooks, run only once every store committed.
    queued: Vec<QueuedHook>,
}

impl CommitPlan {
    pub(crate) fn new(
        inserts: Vec<ManagedEntity>,
        updates: Vec<PendingUpdate>,
        deletes: Vec<ManagedEntity>,
        relations: Vec<(ManagedEntity, RelationDelta<ManagedEntity>)>,
    ) -> Self {
        Self {
            inserts,
            updates,
            deletes,
            relations,
            generated: Vec::new(),
            queued: Vec::new(),
        }
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.len()
    }

    pub fn update_count(&self) -> usize {
        self.updates.len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }

    /// Number of entities with relation changes.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.relations.is_empty()
    }

    /// Entities this plan inserts.
    pub fn inserted(&self) -> &[ManagedEntity] {
        &self.inserts
    }

    /// Entities this plan updates.
    pub fn updated(&self) -> impl Iterator<Item = &ManagedEntity> {
        self.updates.iter().map(|u| &u.entity)
    }

    /// Entities this plan deletes.
    pub fn deleted(&self) -> &[ManagedEntity] {
        &self.deletes
    }

    pub(crate) fn take_generated_keys(&mut self) -> Vec<ManagedEntity> {
        std::mem::take(&mut self.generated)
    }

    pub(crate) fn take_queued_hooks(&mut self) -> Vec<QueuedHook> {
        std::mem::take(&mut self.queued)
    }

    /// Execute the plan and commit every store it touched.
    ///
    /// On failure every open transaction has been rolled back when this
    /// returns. In-memory state is left to the caller, see
    /// [`UnitOfWork::rollback_new`](crate::UnitOfWork::rollback_new).
    #[tracing::instrument(level = "info", skip_all, fields(
        inserts = self.inserts.len(),
        updates = self.updates.len(),
        deletes = self.deletes.len(),
        relations = self.relations.len(),
    ))]
    pub async fn execute<C: Connection>(
        &mut self,
        cx: &Cx,
        stores: &StoreSet<C>,
        hooks: &HookRegistry,
        skip_hooks: bool,
    ) -> Outcome<CommitResult, Error> {
        let start = std::time::Instant::now();
        let mut txs = StoreTransactions::new(stores);

        let outcome = self.run_phases(cx, &mut txs, hooks, skip_hooks).await;
        let result = match outcome {
            Outcome::Ok(result) => result,
            failure => {
                tracing::warn!("Commit failed, rolling back");
                txs.rollback_all(cx).await;
                self.queued.clear();
                return failure;
            }
        };

        match txs.commit_all(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => {
                self.queued.clear();
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                self.queued.clear();
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                self.queued.clear();
                return Outcome::Panicked(p);
            }
        }

        tracing::info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            relations = result.relations,
            elapsed_us = start.elapsed().as_micros(),
            "Commit complete"
        );
        Outcome::Ok(result)
    }

    async fn run_phases<'s, C: Connection + 's>(
        &mut self,
        cx: &Cx,
        txs: &mut StoreTransactions<'s, C>,
        hooks: &HookRegistry,
        skip_hooks: bool,
    ) -> Outcome<CommitResult, Error> {
        let mut result = CommitResult::default();

        // 1. Inserts
        for entity in &self.inserts {
            if !skip_hooks {
                if let Some(h) = hooks.get(entity.entity_name()) {
                    if let Err(e) = h.before_create(entity) {
                        return Outcome::Err(e);
                    }
                }
            }
            let mapping = entity.mapping();
            let statement = Statement::insert(mapping.table_name(), insert_values(entity));
            let store = txs.resolve(mapping.store_name());
            tracing::trace!(sql = %statement.sql, store = %store, "Executing INSERT");

            let id = match txs.insert(cx, &store, &statement).await {
                Outcome::Ok(id) => id,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            if entity.primary_key().is_none() && mapping.has_generated_key() {
                if let Err(e) = entity.assign(
                    mapping.primary_key(),
                    Value::BigInt(id),
                    Assignment::SkipDirty,
                ) {
                    return Outcome::Err(e);
                }
                self.generated.push(entity.clone());
            }
            result.inserted += 1;
            if !skip_hooks {
                self.queued.push(QueuedHook {
                    kind: HookKind::AfterCreate,
                    entity: entity.clone(),
                });
            }
        }

        // 2. Updates
        for update in &self.updates {
            let entity = &update.entity;
            let mapping = entity.mapping();
            let Some(primary_key) = entity.primary_key() else {
                return Outcome::Err(Error::invalid_transition(
                    StateErrorKind::Unmanaged,
                    entity.entity_name(),
                    "dirty entity has no primary key",
                ));
            };

            let values = entity.values();
            let mut changes: BTreeMap<String, Value> = update
                .properties
                .iter()
                .map(|p| (p.clone(), values.get(p).cloned().unwrap_or(Value::Null)))
                .collect();
            if !skip_hooks {
                if let Some(h) = hooks.get(entity.entity_name()) {
                    if let Err(e) = h.before_update(entity, &mut changes) {
                        return Outcome::Err(e);
                    }
                    for (property, value) in &changes {
                        let is_scalar = mapping.field(property).is_some_and(|f| !f.is_relation());
                        if is_scalar && values.get(property) != Some(value) {
                            if let Err(e) = entity.assign(property, value.clone(), Assignment::SkipDirty) {
                                return Outcome::Err(e);
                            }
                        }
                    }
                }
            }
            if changes.is_empty() {
                continue;
            }

            let set = changes
                .into_iter()
                .map(|(property, value)| {
                    let column = mapping
                        .field(&property)
                        .map_or(property.clone(), |f| f.name.clone());
                    (column, value)
                })
                .collect();
            let statement = Statement::update(
                mapping.table_name(),
                set,
                vec![Condition::eq(mapping.primary_column(), primary_key)],
            );
            let store = txs.resolve(mapping.store_name());
            tracing::trace!(sql = %statement.sql, store = %store, "Executing UPDATE");
            match txs.execute(cx, &store, &statement).await {
                Outcome::Ok(_) => result.updated += 1,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            if !skip_hooks {
                self.queued.push(QueuedHook {
                    kind: HookKind::AfterUpdate,
                    entity: entity.clone(),
                });
            }
        }

        // 3. Deletes
        for entity in &self.deletes {
            let Some(primary_key) = entity.primary_key() else {
                continue;
            };
            if !skip_hooks {
                if let Some(h) = hooks.get(entity.entity_name()) {
                    if let Err(e) = h.before_remove(entity) {
                        return Outcome::Err(e);
                    }
                }
            }
            let mapping = entity.mapping();
            let statement = Statement::delete(
                mapping.table_name(),
                vec![Condition::eq(mapping.primary_column(), primary_key)],
            );
            let store = txs.resolve(mapping.store_name());
            tracing::trace!(sql = %statement.sql, store = %store, "Executing DELETE");
            match txs.execute(cx, &store, &statement).await {
                Outcome::Ok(_) => result.deleted += 1,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            if !skip_hooks {
                self.queued.push(QueuedHook {
                    kind: HookKind::AfterRemove,
                    entity: entity.clone(),
                });
            }
        }

        // 4. Relations
        let writes = match relation_writes(&self.relations) {
            Ok(writes) => writes,
            Err(e) => return Outcome::Err(e),
        };
        for write in writes {
            let store = txs.resolve(write.store.as_deref());
            tracing::trace!(sql = %write.statement.sql, store = %store, "Executing relation write");
            match txs.execute(cx, &store, &write.statement).await {
                Outcome::Ok(_) => result.relations += 1,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        Outcome::Ok(result)
    }
}

/// Column values for an INSERT. A null primary key is left to the store.
fn insert_values(entity: &ManagedEntity) -> Vec<(String, Value)> {
    let mapping = entity.mapping();
    entity
        .values()
        .into_iter()
        .filter_map(|(property, value)| {
            let field = mapping.field(&property)?;
            if field.is_relation() || (field.primary && value.is_null()) {
                return None;
            }
            Some((field.name.clone(), value))
        })
        .collect()
}

/// One relation statement and the store of the table it writes.
#[derive(Debug)]
struct RelationWrite {
    store: Option<String>,
    statement: Statement,
}

/// Turn relation deltas into statements, removals before additions per
/// property. Identical statements produced by both sides of a
/// bidirectional relation are written once.
fn relation_writes(
    relations: &[(ManagedEntity, RelationDelta<ManagedEntity>)],
) -> Result<Vec<RelationWrite>> {
    let mut seen = HashSet::new();
    let mut writes = Vec::new();
    for (owner, delta) in relations {
        for (property, changes) in delta.properties() {
            let ordered = changes
                .removed()
                .map(|t| (RelationChange::Removed, t))
                .chain(changes.added().map(|t| (RelationChange::Added, t)));
            for (change, target) in ordered {
                let write = relation_write(owner, property, change, target)?;
                let key = format!(
                    "{}\u{0}{}\u{0}{:?}",
                    write.store.as_deref().unwrap_or_default(),
                    write.statement.sql,
                    write.statement.params
                );
                if seen.insert(key) {
                    writes.push(write);
                }
            }
        }
    }
    Ok(writes)
}

fn relation_write(
    owner: &ManagedEntity,
    property: &str,
    change: RelationChange,
    target: &ManagedEntity,
) -> Result<RelationWrite> {
    let mapping = owner.mapping();
    let field = mapping
        .field(property)
        .ok_or_else(|| owner.relation_error(RelationErrorKind::UnknownProperty, property, "property is not mapped"))?;
    let relationship = field
        .relationship
        .as_ref()
        .ok_or_else(|| owner.relation_error(RelationErrorKind::NotARelation, property, "property is not a relation"))?;
    let key_of = |entity: &ManagedEntity| {
        entity.primary_key().ok_or_else(|| {
            owner.relation_error(
                RelationErrorKind::UnpersistedRelation,
                property,
                "related entity has no primary key",
            )
        })
    };

    if relationship.kind == RelationKind::ManyToMany {
        // the owning side's join table, columns ordered owner first
        let (owning, other, join_table) = match &relationship.mapped_by {
            None => (owner, target, field.join_table.as_ref()),
            Some(mapped_by) => (target, owner, target.mapping().join_table(mapped_by)),
        };
        let join_table = join_table
            .ok_or_else(|| Error::mapping(owning.entity_name(), "many-to-many relation has no join table"))?;
        let (Some(left), Some(right)) = (
            join_table.join_columns.first(),
            join_table.inverse_join_columns.first(),
        ) else {
            return Err(Error::mapping(
                owning.entity_name(),
                format!("join table '{}' has no join columns", join_table.name),
            ));
        };
        let left_key = key_of(owning)?;
        let right_key = key_of(other)?;
        let statement = match change {
            RelationChange::Added => Statement::insert(
                &join_table.name,
                vec![(left.name.clone(), left_key), (right.name.clone(), right_key)],
            ),
            RelationChange::Removed => Statement::delete(
                &join_table.name,
                vec![
                    Condition::eq(&left.name, left_key),
                    Condition::eq(&right.name, right_key),
                ],
            ),
        };
        return Ok(RelationWrite {
            store: owning.mapping().store_name().map(str::to_string),
            statement,
        });
    }

    if relationship.is_owning() {
        // FK column on the owner's own table
        let join_column = field
            .join_column
            .as_ref()
            .ok_or_else(|| Error::mapping(owner.entity_name(), format!("relation '{property}' has no join column")))?;
        let owner_key = key_of(owner)?;
        let target_key = key_of(target)?;
        let statement = match change {
            RelationChange::Added => Statement::update(
                mapping.table_name(),
                vec![(join_column.name.clone(), target_key)],
                vec![Condition::eq(mapping.primary_column(), owner_key)],
            ),
            RelationChange::Removed => Statement::update(
                mapping.table_name(),
                vec![(join_column.name.clone(), Value::Null)],
                vec![
                    Condition::eq(mapping.primary_column(), owner_key),
                    Condition::eq(&join_column.name, target_key),
                ],
            ),
        };
        return Ok(RelationWrite {
            store: mapping.store_name().map(str::to_string),
            statement,
        });
    }

    // inverse side: the FK lives on the target's table
    let mapped_by = relationship.mapped_by.as_deref().ok_or_else(|| {
        Error::mapping(owner.entity_name(), format!("inverse relation '{property}' has no mapped_by"))
    })?;
    let target_mapping = target.mapping();
    let join_column = target_mapping.join_column(mapped_by).ok_or_else(|| {
        Error::mapping(
            target.entity_name(),
            format!("relation '{mapped_by}' has no join column"),
        )
    })?;
    let owner_key = key_of(owner)?;
    let target_key = key_of(target)?;
    let statement = match change {
        RelationChange::Added => Statement::update(
            target_mapping.table_name(),
            vec![(join_column.name.clone(), owner_key)],
            vec![Condition::eq(target_mapping.primary_column(), target_key)],
        ),
        RelationChange::Removed => Statement::update(
            target_mapping.table_name(),
            vec![(join_column.name.clone(), Value::Null)],
            vec![
                Condition::eq(target_mapping.primary_column(), target_key),
                Condition::eq(&join_column.name, owner_key),
            ],
        ),
    };
    Ok(RelationWrite {
        store: target_mapping.store_name().map(str::to_string),
        statement,
    })
}

/// Transactions opened lazily, one per store, in first-use order.
struct StoreTransactions<'s, C: Connection + 's> {
    stores: &'s StoreSet<C>,
    open: Vec<(String, C::Tx<'s>)>,
}

impl<'s, C: Connection + 's> StoreTransactions<'s, C> {
    fn new(stores: &'s StoreSet<C>) -> Self {
        Self {
            stores,
            open: Vec::new(),
        }
    }

    fn resolve(&self, store: Option<&str>) -> String {
        self.stores.resolve(store).to_string()
    }

    async fn begin(&mut self, cx: &Cx, store: &str) -> Outcome<usize, Error> {
        if let Some(index) = self.open.iter().position(|(name, _)| name == store) {
            return Outcome::Ok(index);
        }
        let stores: &'s StoreSet<C> = self.stores;
        let conn = match stores.get(store) {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        match conn.begin(cx).await {
            Outcome::Ok(tx) => {
                tracing::debug!(store = %store, "Began transaction");
                self.open.push((store.to_string(), tx));
                Outcome::Ok(self.open.len() - 1)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn execute(&mut self, cx: &Cx, store: &str, statement: &Statement) -> Outcome<u64, Error> {
        let index = match self.begin(cx, store).await {
            Outcome::Ok(index) => index,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.open[index]
            .1
            .execute(cx, &statement.sql, &statement.params)
            .await
    }

    async fn insert(&mut self, cx: &Cx, store: &str, statement: &Statement) -> Outcome<i64, Error> {
        let index = match self.begin(cx, store).await {
            Outcome::Ok(index) => index,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.open[index]
            .1
            .insert(cx, &statement.sql, &statement.params)
            .await
    }

    /// Commit in first-use order. A failed commit rolls back the stores
    /// not yet committed; stores committed before it stay committed.
    async fn commit_all(self, cx: &Cx) -> Outcome<(), Error> {
        let mut open = self.open.into_iter();
        while let Some((store, tx)) = open.next() {
            match tx.commit(cx).await {
                Outcome::Ok(()) => tracing::debug!(store = %store, "Committed transaction"),
                failure => {
                    tracing::error!(store = %store, "Commit failed, rolling back remaining stores");
                    for (store, tx) in open {
                        rollback_one(cx, &store, tx).await;
                    }
                    return failure;
                }
            }
        }
        Outcome::Ok(())
    }

    async fn rollback_all(self, cx: &Cx) {
        for (store, tx) in self.open {
            rollback_one(cx, &store, tx).await;
        }
    }
}

async fn rollback_one<T: TransactionOps>(cx: &Cx, store: &str, tx: T) {
    match tx.rollback(cx).await {
        Outcome::Ok(()) => tracing::debug!(store = %store, "Rolled back transaction"),
        Outcome::Err(e) => tracing::warn!(store = %store, error = %e, "Rollback failed"),
        Outcome::Cancelled(_) => tracing::warn!(store = %store, "Rollback cancelled"),
        Outcome::Panicked(_) => tracing::warn!(store = %store, "Rollback panicked"),
    }
}

#[cfg(test)]
#[allow(clippy::manual_async_fn)]
mod tests {
    use super::*;
    use crate::proxy::{ChangeSink, Proxy};
    use crate::testing::{MockConnection, library, unwrap_outcome};
    use crate::unit_of_work::UnitOfWork;
    use asupersync::runtime::RuntimeBuilder;
    use fenland_core::MappingRegistry;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        registry: Arc<MappingRegistry>,
        uow: Arc<Mutex<UnitOfWork>>,
        sink: Arc<dyn ChangeSink>,
        conn: MockConnection,
    }

    impl Fixture {
        fn new() -> Self {
            let uow = Arc::new(Mutex::new(UnitOfWork::new()));
            let sink: Arc<dyn ChangeSink> = uow.clone();
            Self {
                registry: Arc::new(library()),
                uow,
                sink,
                conn: MockConnection::new(),
            }
        }

        fn entity(&self, name: &str) -> ManagedEntity {
            let entity = ManagedEntity::new(Arc::clone(self.registry.get(name).unwrap()));
            Proxy::wrap(&entity, &self.sink, false)
        }

        fn loaded(&self, name: &str, pk: i64) -> ManagedEntity {
            let entity = self.entity(name);
            entity
                .assign("id", Value::BigInt(pk), Assignment::SkipDirty)
                .unwrap();
            self.uow.lock().unwrap().register_clean(&entity, true);
            entity
        }

        fn flush(&self) -> Outcome<CommitResult, Error> {
            let rt = RuntimeBuilder::current_thread()
                .build()
                .expect("create asupersync runtime");
            let cx = Cx::for_testing();
            let mut plan = match self.uow.lock().unwrap().plan_commit() {
                Ok(plan) => plan,
                Err(e) => return Outcome::Err(e),
            };
            let stores = StoreSet::new("default", self.conn.clone());
            let outcome = rt.block_on(async {
                plan.execute(&cx, &stores, &HookRegistry::new(), false)
                    .await
            });
            let mut uow = self.uow.lock().unwrap();
            if matches!(outcome, Outcome::Ok(_)) {
                uow.finish_commit(&mut plan);
            } else {
                uow.rollback_new(&mut plan);
            }
            outcome
        }
    }

    #[test]
    fn test_insert_writes_generated_key_back() {
        let f = Fixture::new();
        let user = f.entity("User");
        user.set("name", "foo").unwrap();
        f.uow.lock().unwrap().register_new(&user).unwrap();

        let result = unwrap_outcome(f.flush());
        assert_eq!(result.inserted, 1);

        let statements = f.conn.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].0, "INSERT INTO \"user\" (\"name\") VALUES ($1)");
        assert_eq!(statements[0].1, vec![Value::from("foo")]);
        assert_eq!(user.primary_key(), Some(Value::BigInt(1)));
        assert_eq!(f.conn.commits(), 1);
    }

    #[test]
    fn test_update_writes_only_changed_columns() {
        let f = Fixture::new();
        let user = f.loaded("User", 7);
        user.assign("name", Value::from("foo"), Assignment::SkipDirty)
            .unwrap();
        user.set("email", "new@x.com").unwrap();
        user.set("email", "new@x.com").unwrap();

        let result = unwrap_outcome(f.flush());
        assert_eq!(result.updated, 1);
        assert_eq!(
            f.conn.statements(),
            vec![(
                "UPDATE \"user\" SET \"email\" = $1 WHERE \"id\" = $2".to_string(),
                vec![Value::from("new@x.com"), Value::BigInt(7)],
            )]
        );
        assert!(f.uow.lock().unwrap().dirty_properties(&user).is_empty());
    }

    #[test]
    fn test_one_to_many_addition_updates_child_fk() {
        let f = Fixture::new();
        let publisher = f.loaded("Publisher", 1);
        let book = f.loaded("Book", 10);
        publisher
            .collection("books")
            .unwrap()
            .push(book)
            .unwrap();

        let result = unwrap_outcome(f.flush());
        assert_eq!(result.relations, 1);
        assert_eq!(
            f.conn.statements(),
            vec![(
                "UPDATE \"book\" SET \"publisher_id\" = $1 WHERE \"id\" = $2".to_string(),
                vec![Value::BigInt(1), Value::BigInt(10)],
            )]
        );
    }

    #[test]
    fn test_many_to_many_changes_write_join_rows() {
        let f = Fixture::new();
        let book = f.loaded("Book", 3);
        let tag = f.loaded("Tag", 4);
        let old = f.loaded("Tag", 5);
        book.deactivate();
        book.collection("tags").unwrap().push(old.clone()).unwrap();
        book.activate();

        book.collection("tags").unwrap().push(tag).unwrap();
        book.collection("tags").unwrap().remove(&old).unwrap();

        unwrap_outcome(f.flush());
        assert_eq!(
            f.conn.statements(),
            vec![
                (
                    "DELETE FROM \"book_tag\" WHERE \"book_id\" = $1 AND \"tag_id\" = $2".to_string(),
                    vec![Value::BigInt(3), Value::BigInt(5)],
                ),
                (
                    "INSERT INTO \"book_tag\" (\"book_id\", \"tag_id\") VALUES ($1, $2)".to_string(),
                    vec![Value::BigInt(3), Value::BigInt(4)],
                ),
            ]
        );
    }

    #[test]
    fn test_inverse_many_to_many_uses_owning_join_table() {
        let f = Fixture::new();
        let tag = f.loaded("Tag", 4);
        let book = f.loaded("Book", 3);
        tag.collection("books").unwrap().push(book).unwrap();

        unwrap_outcome(f.flush());
        assert_eq!(
            f.conn.statements(),
            vec![(
                "INSERT INTO \"book_tag\" (\"book_id\", \"tag_id\") VALUES ($1, $2)".to_string(),
                vec![Value::BigInt(3), Value::BigInt(4)],
            )]
        );
    }

    #[test]
    fn test_bidirectional_change_is_written_once() {
        let f = Fixture::new();
        let publisher = f.loaded("Publisher", 1);
        let book = f.loaded("Book", 10);
        book.set_one("publisher", Some(publisher.clone())).unwrap();
        publisher
            .collection("books")
            .unwrap()
            .push(book)
            .unwrap();

        let result = unwrap_outcome(f.flush());
        assert_eq!(result.relations, 1);
        assert_eq!(f.conn.statements().len(), 1);
    }

    #[test]
    fn test_cascade_rejection_issues_no_statements() {
        let f = Fixture::new();
        let book = f.entity("Book");
        let publisher = f.entity("Publisher");
        book.set_one("publisher", Some(publisher)).unwrap();
        f.uow.lock().unwrap().register_new(&book).unwrap();

        let outcome = f.flush();
        assert!(matches!(
            outcome,
            Outcome::Err(Error::Relation(ref e)) if e.kind == RelationErrorKind::UnpersistedRelation
        ));
        assert!(f.conn.statements().is_empty());
        assert_eq!(f.conn.begins(), 0);
    }

    #[test]
    fn test_failed_relation_write_strips_generated_keys() {
        let f = Fixture::new();
        let publisher = f.entity("Publisher");
        let book = f.entity("Book");
        publisher
            .collection("books")
            .unwrap()
            .push(book.clone())
            .unwrap();
        f.uow.lock().unwrap().register_new(&publisher).unwrap();
        f.conn.fail_on("UPDATE \"book\"");

        let outcome = f.flush();
        assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
        assert_eq!(f.conn.rollbacks(), 1);
        assert_eq!(f.conn.commits(), 0);
        for entity in [&publisher, &book] {
            assert_eq!(entity.primary_key(), None);
            assert!(!entity.is_active());
        }

        // the same flush can be retried
        f.conn.clear_failures();
        unwrap_outcome(f.flush());
        assert!(publisher.primary_key().is_some());
        assert!(publisher.is_active());
    }

    #[test]
    fn test_delete_by_primary_key() {
        let f = Fixture::new();
        let user = f.loaded("User", 9);
        f.uow.lock().unwrap().register_deleted(&user);

        let result = unwrap_outcome(f.flush());
        assert_eq!(result.deleted, 1);
        assert_eq!(
            f.conn.statements(),
            vec![(
                "DELETE FROM \"user\" WHERE \"id\" = $1".to_string(),
                vec![Value::BigInt(9)],
            )]
        );
    }
}
