//! Entity lifecycle hooks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fenland_core::{Result, Value};

use crate::entity::ManagedEntity;

/// Lifecycle callbacks for one entity type.
///
/// `before_*` hooks run right before the corresponding statement; an error
/// aborts the flush and rolls back every open transaction. `after_*` hooks
/// are queued and run once, after all stores have committed; their errors
/// are logged and do not undo the commit.
///
/// # Example
///
/// ```ignore
/// struct Stamp;
///
/// impl EntityHooks for Stamp {
///     fn before_update(&self, _entity: &ManagedEntity, changes: &mut BTreeMap<String, Value>) -> Result<()> {
///         changes.insert("updated_at".into(), Value::Timestamp(now_micros()));
///         Ok(())
///     }
/// }
/// ```
pub trait EntityHooks: Send + Sync {
    /// Called before the entity's INSERT.
    #[allow(unused_variables)]
    fn before_create(&self, entity: &ManagedEntity) -> Result<()> {
        Ok(())
    }

    /// Called after commit for entities inserted by the flush.
    #[allow(unused_variables)]
    fn after_create(&self, entity: &ManagedEntity) -> Result<()> {
        Ok(())
    }

    /// Called before the entity's UPDATE with the changed values.
    ///
    /// Entries added to or removed from `changes` alter the statement.
    #[allow(unused_variables)]
    fn before_update(
        &self,
        entity: &ManagedEntity,
        changes: &mut BTreeMap<String, Value>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after commit for entities updated by the flush.
    #[allow(unused_variables)]
    fn after_update(&self, entity: &ManagedEntity) -> Result<()> {
        Ok(())
    }

    /// Called before the entity's DELETE.
    #[allow(unused_variables)]
    fn before_remove(&self, entity: &ManagedEntity) -> Result<()> {
        Ok(())
    }

    /// Called after commit for entities deleted by the flush.
    #[allow(unused_variables)]
    fn after_remove(&self, entity: &ManagedEntity) -> Result<()> {
        Ok(())
    }
}

/// Hooks registered per entity name.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn EntityHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hooks for an entity, replacing any earlier registration.
    pub fn register(&mut self, entity: impl Into<String>, hooks: Arc<dyn EntityHooks>) {
        self.hooks.insert(entity.into(), hooks);
    }

    pub fn get(&self, entity: &str) -> Option<&Arc<dyn EntityHooks>> {
        self.hooks.get(entity)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("entities", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Which after-commit hook a queued entry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    AfterCreate,
    AfterUpdate,
    AfterRemove,
}

/// An after-commit hook waiting for the commit to succeed.
#[derive(Debug, Clone)]
pub struct QueuedHook {
    pub kind: HookKind,
    pub entity: ManagedEntity,
}

impl QueuedHook {
    pub(crate) fn run(&self, hooks: &HookRegistry) {
        let Some(entity_hooks) = hooks.get(self.entity.entity_name()) else {
            return;
        };
        let result = match self.kind {
            HookKind::AfterCreate => entity_hooks.after_create(&self.entity),
            HookKind::AfterUpdate => entity_hooks.after_update(&self.entity),
            HookKind::AfterRemove => entity_hooks.after_remove(&self.entity),
        };
        if let Err(error) = result {
            tracing::warn!(
                entity = self.entity.entity_name(),
                hook = ?self.kind,
                error = %error,
                "After-commit hook failed"
            );
        }
    }
}
