//! Unit of Work, change interception and identity map for Fenland.
//!
//! `fenland-session` is the **unit-of-work layer**. Application code works
//! with plain [`ManagedEntity`] handles; a [`Scope`] intercepts their
//! changes, tracks their lifecycle state and writes everything pending in
//! one atomic commit per store.
//!
//! # Role In The Architecture
//!
//! - **Change interception**: wrapped entities report property writes and
//!   relation mutations while active.
//! - **State tracking**: the unit of work classifies entities as new, clean,
//!   dirty or deleted and keeps relation deltas with add/remove cancellation.
//! - **Identity map**: a single in-memory handle per `(entity, primary key)`.
//! - **Transactional safety**: one transaction per store, all committed or
//!   all rolled back.
//!
//! # Example
//!
//! ```ignore
//! let mut scope = Scope::new(registry, StoreSet::new("default", conn), SessionConfig::default());
//!
//! let user = scope.create("User")?;
//! user.set("name", "foo")?;
//! scope.persist(&[user.clone()])?;
//!
//! scope.flush(&cx, FlushOptions::default()).await?;
//! assert_eq!(scope.state_of(&user), EntityState::Clean);
//! ```

pub mod collection;
pub mod delta;
pub mod entity;
pub mod flush;
pub mod hooks;
pub mod identity_map;
pub mod metadata;
pub mod proxy;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::Collection;
pub use delta::{PropertyDelta, RelationChange, RelationDelta};
pub use entity::{Assignment, EntityData, EntityId, ManagedEntity};
pub use flush::{CommitPlan, CommitResult, PendingUpdate};
pub use hooks::{EntityHooks, HookKind, HookRegistry, QueuedHook};
pub use identity_map::IdentityMap;
pub use metadata::{EntityMeta, EntityState, MetadataStore};
pub use proxy::{ChangeSink, Proxy};
pub use unit_of_work::{PendingCounts, UnitOfWork};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use asupersync::{Cx, Outcome};
use fenland_core::{
    ConfigError, Condition, Connection, EntityMapping, Error, MappingRegistry, QueryError,
    QueryErrorKind, RefreshError, RefreshFailure, Result, Row, StateErrorKind, Statement,
    StoreSet, Value,
};
use serde::Deserialize;

// ============================================================================
// Scope Configuration
// ============================================================================

/// Configuration for [`Scope`] behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Store used for entities whose mapping names none.
    pub default_store: String,
    /// Reload inserted entities from their store after commit.
    pub refresh_created: bool,
    /// Reload updated entities from their store after commit.
    pub refresh_updated: bool,
    /// Whether registered lifecycle hooks run during flush.
    pub lifecycle_hooks: bool,
    /// Whether [`Scope::clear`] also empties the identity map.
    pub clear_identity_map_on_clear: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_store: "default".to_string(),
            refresh_created: false,
            refresh_updated: false,
            lifecycle_hooks: true,
            clear_identity_map_on_clear: true,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    #[must_use]
    pub fn default_store(mut self, store: impl Into<String>) -> Self {
        self.default_store = store.into();
        self
    }

    #[must_use]
    pub fn refresh_created(mut self, value: bool) -> Self {
        self.refresh_created = value;
        self
    }

    #[must_use]
    pub fn refresh_updated(mut self, value: bool) -> Self {
        self.refresh_updated = value;
        self
    }

    #[must_use]
    pub fn lifecycle_hooks(mut self, value: bool) -> Self {
        self.lifecycle_hooks = value;
        self
    }

    #[must_use]
    pub fn clear_identity_map_on_clear(mut self, value: bool) -> Self {
        self.clear_identity_map_on_clear = value;
        self
    }
}

/// Per-call options for [`Scope::flush`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOptions {
    /// Leave entity states untouched after commit and skip after-commit hooks.
    pub skip_clean: bool,
    /// Run no lifecycle hooks during this flush.
    pub skip_lifecycle_hooks: bool,
    /// Overrides [`SessionConfig::refresh_created`] when set.
    pub refresh_created: Option<bool>,
    /// Overrides [`SessionConfig::refresh_updated`] when set.
    pub refresh_updated: Option<bool>,
}

impl FlushOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn skip_clean(mut self, value: bool) -> Self {
        self.skip_clean = value;
        self
    }

    #[must_use]
    pub fn skip_lifecycle_hooks(mut self, value: bool) -> Self {
        self.skip_lifecycle_hooks = value;
        self
    }

    #[must_use]
    pub fn refresh_created(mut self, value: bool) -> Self {
        self.refresh_created = Some(value);
        self
    }

    #[must_use]
    pub fn refresh_updated(mut self, value: bool) -> Self {
        self.refresh_updated = Some(value);
        self
    }
}

// ============================================================================
// Scope
// ============================================================================

/// The application-facing unit of work.
///
/// A scope owns one [`UnitOfWork`], one [`IdentityMap`] and the store
/// connections its flushes write to. Entities created, persisted or
/// attached through it report their changes to its unit of work.
pub struct Scope<C: Connection> {
    registry: Arc<MappingRegistry>,
    stores: StoreSet<C>,
    config: SessionConfig,
    hooks: HookRegistry,
    unit_of_work: Arc<Mutex<UnitOfWork>>,
    sink: Arc<dyn ChangeSink>,
    identity_map: IdentityMap,
}

impl<C: Connection> Scope<C> {
    /// Create a scope over a completed mapping registry.
    pub fn new(registry: Arc<MappingRegistry>, stores: StoreSet<C>, config: SessionConfig) -> Self {
        if !registry.is_complete() {
            tracing::warn!("Scope created over an incomplete mapping registry");
        }
        let unit_of_work = Arc::new(Mutex::new(UnitOfWork::new()));
        let sink: Arc<dyn ChangeSink> = unit_of_work.clone();
        Self {
            registry,
            stores,
            config,
            hooks: HookRegistry::new(),
            unit_of_work,
            sink,
            identity_map: IdentityMap::new(),
        }
    }

    /// Use `hooks` for lifecycle callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register lifecycle hooks for one entity.
    pub fn register_hooks(&mut self, entity: impl Into<String>, hooks: Arc<dyn EntityHooks>) {
        self.hooks.register(entity, hooks);
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The unit of work, locked.
    pub fn unit_of_work(&self) -> MutexGuard<'_, UnitOfWork> {
        self.unit_of_work
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// A fresh entity wrapped for this scope, not yet staged.
    pub fn create(&self, entity: &str) -> Result<ManagedEntity> {
        let mapping = self.mapping(entity)?;
        let handle = ManagedEntity::new(Arc::clone(mapping));
        Ok(Proxy::wrap(&handle, &self.sink, false))
    }

    /// Stage entities for insertion.
    pub fn persist(&self, entities: &[ManagedEntity]) -> Result<()> {
        let mut uow = self.unit_of_work();
        for entity in entities {
            Proxy::wrap(entity, &self.sink, false);
            uow.register_new(entity)?;
        }
        Ok(())
    }

    /// Stage an entity for deletion.
    ///
    /// Tracked entities reachable through relations that cascade remove are
    /// staged as well.
    pub fn remove(&self, entity: &ManagedEntity) {
        let mut uow = self.unit_of_work();
        let mut visited = HashSet::new();
        let mut queue = vec![entity.clone()];
        while let Some(next) = queue.pop() {
            if !visited.insert(next.id()) {
                continue;
            }
            Proxy::wrap(&next, &self.sink, false);
            uow.register_deleted(&next);
            for (property, related) in next.relation_values() {
                let cascades = next
                    .mapping()
                    .field(&property)
                    .is_some_and(|f| f.cascades_remove());
                if !cascades {
                    continue;
                }
                queue.extend(
                    related
                        .into_iter()
                        .filter(|r| uow.state_of(r) != EntityState::Unknown),
                );
            }
        }
    }

    /// Wrap an entity for this scope without staging it.
    pub fn attach(&self, entity: &ManagedEntity, active: bool) -> ManagedEntity {
        Proxy::wrap(entity, &self.sink, active)
    }

    /// Stop tracking an entity and disconnect it from this scope.
    pub fn detach(&mut self, entity: &ManagedEntity) {
        self.unit_of_work().detach(entity);
        self.identity_map.remove(entity);
        Proxy::release(entity);
    }

    /// Lifecycle state of an entity in this scope.
    pub fn state_of(&self, entity: &ManagedEntity) -> EntityState {
        self.unit_of_work().state_of(entity)
    }

    /// Summary of pending changes.
    pub fn pending_counts(&self) -> PendingCounts {
        self.unit_of_work().pending_counts()
    }

    /// Discard all tracked state without touching any store.
    pub fn clear(&mut self) {
        self.unit_of_work().clear();
        if self.config.clear_identity_map_on_clear {
            self.identity_map.reset();
        }
        tracing::debug!("Scope cleared");
    }

    /// Write every pending change and commit.
    ///
    /// On failure every transaction opened by this flush has been rolled
    /// back, keys generated by it are stripped and new entities are
    /// deactivated. All entities stay staged, so the flush can be retried.
    ///
    /// A refresh failure after commit is returned once the written entities
    /// are clean, so retrying never writes them twice.
    #[tracing::instrument(level = "info", skip(self, cx))]
    pub async fn flush(&mut self, cx: &Cx, options: FlushOptions) -> Outcome<CommitResult, Error> {
        let planned = self.unit_of_work().plan_commit();
        let mut plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                tracing::debug!(error = %e, "Commit preparation failed");
                return Outcome::Err(e);
            }
        };
        if plan.is_empty() {
            tracing::debug!("Nothing to flush");
            if !options.skip_clean {
                self.unit_of_work().finish_commit(&mut plan);
            }
            return Outcome::Ok(CommitResult::default());
        }

        let skip_hooks = options.skip_lifecycle_hooks || !self.config.lifecycle_hooks;
        let result = match plan.execute(cx, &self.stores, &self.hooks, skip_hooks).await {
            Outcome::Ok(result) => result,
            failure => {
                self.unit_of_work().rollback_new(&mut plan);
                return failure;
            }
        };

        let mut stale: Vec<ManagedEntity> = Vec::new();
        if options.refresh_created.unwrap_or(self.config.refresh_created) {
            stale.extend(plan.inserted().iter().cloned());
        }
        if options.refresh_updated.unwrap_or(self.config.refresh_updated) {
            stale.extend(plan.updated().cloned());
        }
        // The stores have committed: a failed refresh is reported only after
        // the unit of work has been reclassified.
        let refreshed = if stale.is_empty() {
            Outcome::Ok(())
        } else {
            self.refresh(cx, &stale).await
        };

        for entity in plan.inserted() {
            self.identity_map.register(entity);
        }
        for entity in plan.deleted() {
            self.identity_map.remove(entity);
        }

        if !options.skip_clean {
            let queued = self.unit_of_work().finish_commit(&mut plan);
            for hook in &queued {
                hook.run(&self.hooks);
            }
        }

        match refreshed {
            Outcome::Ok(()) => Outcome::Ok(result),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Reload entities' scalar properties from their stores.
    ///
    /// Entities without a primary key value, or whose row is gone, are
    /// reported together in one [`Error::Refresh`]; the others are still
    /// refreshed.
    #[tracing::instrument(level = "debug", skip(self, cx, entities), fields(count = entities.len()))]
    pub async fn refresh(&self, cx: &Cx, entities: &[ManagedEntity]) -> Outcome<(), Error> {
        let mut failures = Vec::new();
        for entity in entities {
            let Some(primary_key) = entity.primary_key() else {
                failures.push(RefreshFailure {
                    entity: entity.entity_name().to_string(),
                    error: Box::new(Error::invalid_transition(
                        StateErrorKind::Unmanaged,
                        entity.entity_name(),
                        "can't refresh an entity without a primary key value",
                    )),
                });
                continue;
            };
            match self.load_row(cx, entity.mapping(), primary_key).await {
                Outcome::Ok(Some(row)) => {
                    if let Err(e) = hydrate(entity, &row) {
                        failures.push(RefreshFailure {
                            entity: entity.entity_name().to_string(),
                            error: Box::new(e),
                        });
                    }
                }
                Outcome::Ok(None) => failures.push(RefreshFailure {
                    entity: entity.entity_name().to_string(),
                    error: Box::new(Error::Query(QueryError {
                        kind: QueryErrorKind::NotFound,
                        sql: None,
                        sqlstate: None,
                        message: "row no longer exists".to_string(),
                        source: None,
                    })),
                }),
                Outcome::Err(e) => failures.push(RefreshFailure {
                    entity: entity.entity_name().to_string(),
                    error: Box::new(e),
                }),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if failures.is_empty() {
            Outcome::Ok(())
        } else {
            tracing::debug!(failed = failures.len(), "Refresh incomplete");
            Outcome::Err(Error::Refresh(RefreshError { failures }))
        }
    }

    /// Get an entity by primary key.
    ///
    /// The identity map is checked first. Otherwise the row is loaded,
    /// hydrated into a fresh handle and tracked as clean.
    #[tracing::instrument(level = "debug", skip(self, cx, primary_key))]
    pub async fn find(
        &mut self,
        cx: &Cx,
        entity: &str,
        primary_key: impl Into<Value>,
    ) -> Outcome<Option<ManagedEntity>, Error> {
        let primary_key = primary_key.into();
        let mapping = match self.mapping(entity) {
            Ok(mapping) => Arc::clone(mapping),
            Err(e) => return Outcome::Err(e),
        };

        if let Some(found) = self.identity_map.fetch(entity, &primary_key) {
            if self.state_of(&found) == EntityState::Deleted {
                return Outcome::Ok(None);
            }
            tracing::trace!(entity, "Identity map hit");
            return Outcome::Ok(Some(found));
        }

        let row = match self.load_row(cx, &mapping, primary_key).await {
            Outcome::Ok(Some(row)) => row,
            Outcome::Ok(None) => return Outcome::Ok(None),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let handle = Proxy::wrap(&ManagedEntity::new(mapping), &self.sink, false);
        if let Err(e) = hydrate(&handle, &row) {
            return Outcome::Err(e);
        }
        self.unit_of_work().register_clean(&handle, true);
        self.identity_map.register(&handle);
        Outcome::Ok(Some(handle))
    }

    async fn load_row(
        &self,
        cx: &Cx,
        mapping: &EntityMapping,
        primary_key: Value,
    ) -> Outcome<Option<Row>, Error> {
        let store = self.stores.resolve(mapping.store_name());
        let conn = match self.stores.get(store) {
            Ok(conn) => conn,
            Err(e) => return Outcome::Err(e),
        };
        let columns: Vec<&str> = mapping
            .fields()
            .iter()
            .filter(|f| !f.is_relation())
            .map(|f| f.name.as_str())
            .collect();
        let statement = Statement::select(
            mapping.table_name(),
            &columns,
            vec![Condition::eq(mapping.primary_column(), primary_key)],
        );
        tracing::trace!(sql = %statement.sql, store = %store, "Loading row");
        conn.query(cx, &statement.sql, &statement.params)
            .await
            .map(|rows| rows.into_iter().next())
    }

    fn mapping(&self, entity: &str) -> Result<&Arc<EntityMapping>> {
        self.registry
            .get(entity)
            .ok_or_else(|| Error::mapping(entity, "entity is not mapped"))
    }
}

impl<C: Connection + std::fmt::Debug> std::fmt::Debug for Scope<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("stores", &self.stores)
            .field("config", &self.config)
            .field("pending", &self.pending_counts())
            .field("identity_map", &self.identity_map.len())
            .finish()
    }
}

/// Write a row's columns onto the entity without change tracking.
fn hydrate(entity: &ManagedEntity, row: &Row) -> Result<()> {
    let mapping = Arc::clone(entity.mapping());
    for field in mapping.fields().iter().filter(|f| !f.is_relation()) {
        if let Some(value) = row.get_by_name(&field.name) {
            entity.assign(&field.property, value.clone(), Assignment::SkipDirty)?;
        }
    }
    Ok(())
}
