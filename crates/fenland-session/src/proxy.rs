//! Change interception for managed entities.
//!
//! Wrapping an entity connects it to a [`ChangeSink`]. While the wrapper
//! is active, property writes and relation mutations made through the
//! [`ManagedEntity`] and [`Collection`](crate::Collection) accessors are
//! classified and forwarded to the sink. Inactive wrappers write through
//! silently, which is how hydration and construction avoid marking
//! entities dirty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use fenland_core::Result;

use crate::delta::RelationChange;
use crate::entity::ManagedEntity;

/// Receives classified change events from active proxies.
pub trait ChangeSink: Send + Sync {
    /// A scalar property changed value.
    fn property_changed(&self, entity: &ManagedEntity, property: &str) -> Result<()>;

    /// A to-one relation gained or lost a value.
    fn relation_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        target: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()>;

    /// An item was added to or removed from a to-many collection.
    fn collection_changed(
        &self,
        entity: &ManagedEntity,
        property: &str,
        item: &ManagedEntity,
        change: RelationChange,
    ) -> Result<()>;
}

/// Per-entity proxy marker, activation flag and sink.
#[derive(Default)]
pub(crate) struct ProxyState {
    wrapped: AtomicBool,
    active: AtomicBool,
    sink: RwLock<Option<Weak<dyn ChangeSink>>>,
}

impl ProxyState {
    pub(crate) fn is_wrapped(&self) -> bool {
        self.wrapped.load(Ordering::Acquire)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.is_wrapped() && self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn ChangeSink>> {
        self.sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Returns `false` when the entity was already wrapped.
    fn attach(&self, sink: &Arc<dyn ChangeSink>, active: bool) -> bool {
        if self.wrapped.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(sink));
        self.active.store(active, Ordering::Release);
        true
    }

    fn release(&self) {
        self.active.store(false, Ordering::Release);
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.wrapped.store(false, Ordering::Release);
    }
}

/// Wraps entities for change interception.
pub struct Proxy;

impl Proxy {
    /// Wrap `entity`, routing its change events to `sink`.
    ///
    /// Wrapping an already-wrapped entity returns it unchanged, including
    /// its activation state. Related entities reachable through to-one
    /// relations and collections are wrapped as well, inactive.
    pub fn wrap(entity: &ManagedEntity, sink: &Arc<dyn ChangeSink>, active: bool) -> ManagedEntity {
        if entity.proxy_state().attach(sink, active) {
            tracing::trace!(entity = entity.entity_name(), id = %entity.id(), active, "Wrapped entity");
            for related in entity.related_entities() {
                Proxy::wrap(&related, sink, false);
            }
        }
        entity.clone()
    }

    /// Disconnect `entity` from its sink. Related entities are left alone.
    pub fn release(entity: &ManagedEntity) {
        entity.proxy_state().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, library};

    #[test]
    fn test_wrap_is_idempotent() {
        let registry = library();
        let sink = RecordingSink::shared();
        let user = ManagedEntity::new(Arc::clone(registry.get("User").unwrap()));
        assert!(!user.is_proxy());

        let wrapped = Proxy::wrap(&user, &sink.as_dyn(), false);
        assert!(wrapped.is_proxy());
        assert!(!wrapped.is_active());

        // a second wrap does not activate
        let again = Proxy::wrap(&wrapped, &sink.as_dyn(), true);
        assert_eq!(again, user);
        assert!(!again.is_active());
    }

    #[test]
    fn test_wrap_reaches_related_entities() {
        let registry = library();
        let sink = RecordingSink::shared();
        let book = ManagedEntity::new(Arc::clone(registry.get("Book").unwrap()));
        let publisher = ManagedEntity::new(Arc::clone(registry.get("Publisher").unwrap()));
        book.set_one("publisher", Some(publisher.clone())).unwrap();
        assert!(!publisher.is_proxy());

        Proxy::wrap(&book, &sink.as_dyn(), true);
        assert!(publisher.is_proxy());
        assert!(!publisher.is_active());
    }

    #[test]
    fn test_release_disconnects() {
        let registry = library();
        let sink = RecordingSink::shared();
        let user = ManagedEntity::new(Arc::clone(registry.get("User").unwrap()));
        Proxy::wrap(&user, &sink.as_dyn(), true);
        Proxy::release(&user);
        assert!(!user.is_proxy());
        assert!(!user.is_active());

        user.set("name", "quiet").unwrap();
        assert!(sink.events().is_empty());
    }
}
