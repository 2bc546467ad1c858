//! Named store connections.

use std::collections::BTreeMap;

use crate::error::{ConnectionError, ConnectionErrorKind, Error, Result};

/// Connections keyed by store name, with one designated default.
///
/// Entities whose mapping names no store are written to the default store.
#[derive(Debug)]
pub struct StoreSet<C> {
    default: String,
    stores: BTreeMap<String, C>,
}

impl<C> StoreSet<C> {
    /// Create a store set with a single default store.
    pub fn new(default: impl Into<String>, connection: C) -> Self {
        let default = default.into();
        let mut stores = BTreeMap::new();
        stores.insert(default.clone(), connection);
        Self { default, stores }
    }

    /// Register an additional named store.
    pub fn with_store(mut self, name: impl Into<String>, connection: C) -> Self {
        self.stores.insert(name.into(), connection);
        self
    }

    /// Name of the default store.
    pub fn default_store(&self) -> &str {
        &self.default
    }

    /// Resolve an optional store name to a concrete one.
    pub fn resolve<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.default)
    }

    /// Get the connection for a store.
    pub fn get(&self, name: &str) -> Result<&C> {
        self.stores.get(name).ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::UnknownStore,
                message: format!("no connection registered for store '{name}'"),
                source: None,
            })
        })
    }

    /// Names of all registered stores.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_and_get() {
        let stores = StoreSet::new("default", 1).with_store("audit", 2);
        assert_eq!(stores.default_store(), "default");
        assert_eq!(stores.resolve(None), "default");
        assert_eq!(stores.resolve(Some("audit")), "audit");
        assert_eq!(*stores.get("audit").unwrap(), 2);
        assert_eq!(stores.names().collect::<Vec<_>>(), vec!["audit", "default"]);
    }

    #[test]
    fn test_unknown_store() {
        let stores = StoreSet::new("default", ());
        let err = stores.get("reporting").unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::UnknownStore,
                ..
            })
        ));
    }
}
