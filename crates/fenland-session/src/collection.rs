//! Observable to-many collections.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use fenland_core::{Error, RelationErrorKind, Relationship, Result};

use crate::delta::RelationChange;
use crate::entity::{EntityInner, ManagedEntity};
use crate::proxy::Proxy;

struct CollectionInner {
    owner: Weak<EntityInner>,
    property: String,
    relationship: Relationship,
    items: RwLock<Vec<ManagedEntity>>,
}

/// The items of one to-many relation.
///
/// Mutations made while the owning entity is active are reported as
/// additions and removals. An item only counts as removed once no copy of
/// it remains in the collection, and writing an item that is already
/// present elsewhere is treated as a reorder.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    pub(crate) fn new(owner: Weak<EntityInner>, property: String, relationship: &Relationship) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                owner,
                property,
                relationship: relationship.clone(),
                items: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Marker distinguishing observable collections from plain lists.
    pub fn is_collection_proxy(&self) -> bool {
        true
    }

    pub fn property(&self) -> &str {
        &self.inner.property
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ManagedEntity> {
        self.read().get(index).cloned()
    }

    pub fn contains(&self, item: &ManagedEntity) -> bool {
        self.read().contains(item)
    }

    pub fn to_vec(&self) -> Vec<ManagedEntity> {
        self.read().clone()
    }

    /// Append an item.
    pub fn push(&self, item: ManagedEntity) -> Result<()> {
        let index = self.len();
        self.set(index, item)
    }

    /// Write `item` at `index`. Writing at `len()` appends.
    pub fn set(&self, index: usize, item: ManagedEntity) -> Result<()> {
        let owner = self.owner();
        if let Some(owner) = &owner {
            owner.check_target(&self.inner.property, &self.inner.relationship, &item)?;
        }

        let (previous, existed_elsewhere, previous_survives) = {
            let items = self.read();
            if index > items.len() {
                return Err(self.index_error(index, items.len()));
            }
            let previous = items.get(index).cloned();
            let existed_elsewhere = items
                .iter()
                .enumerate()
                .any(|(i, existing)| i != index && *existing == item);
            let previous_survives = previous.as_ref().is_some_and(|prev| {
                *prev == item
                    || items
                        .iter()
                        .enumerate()
                        .any(|(i, existing)| i != index && existing == prev)
            });
            (previous, existed_elsewhere, previous_survives)
        };

        if let Some(owner) = owner.as_ref().filter(|o| o.is_active()) {
            if let Some(sink) = owner.sink() {
                Proxy::wrap(&item, &sink, false);
                if let Some(previous) = previous.as_ref().filter(|_| !previous_survives) {
                    sink.collection_changed(owner, &self.inner.property, previous, RelationChange::Removed)?;
                }
                let replaced_itself = previous.as_ref() == Some(&item);
                if !existed_elsewhere && !replaced_itself {
                    sink.collection_changed(owner, &self.inner.property, &item, RelationChange::Added)?;
                }
            }
        } else if let Some(sink) = owner.as_ref().and_then(ManagedEntity::sink) {
            Proxy::wrap(&item, &sink, false);
        }

        let mut items = self.write();
        if index < items.len() {
            items[index] = item;
        } else {
            items.push(item);
        }
        Ok(())
    }

    /// Remove the first occurrence of `item`. Returns whether it was present.
    pub fn remove(&self, item: &ManagedEntity) -> Result<bool> {
        let position = self.read().iter().position(|existing| existing == item);
        match position {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Remove the item at `index` (splice), returning it.
    pub fn remove_at(&self, index: usize) -> Result<ManagedEntity> {
        let (removed, survives) = {
            let items = self.read();
            let Some(removed) = items.get(index).cloned() else {
                return Err(self.index_error(index, items.len()));
            };
            let survives = items
                .iter()
                .enumerate()
                .any(|(i, existing)| i != index && *existing == removed);
            (removed, survives)
        };

        if !survives {
            if let Some(owner) = self.owner().filter(ManagedEntity::is_active) {
                if let Some(sink) = owner.sink() {
                    sink.collection_changed(&owner, &self.inner.property, &removed, RelationChange::Removed)?;
                }
            }
        }

        self.write().remove(index);
        Ok(removed)
    }

    /// Remove every item.
    pub fn clear(&self) -> Result<()> {
        while !self.is_empty() {
            let last = self.len() - 1;
            self.remove_at(last)?;
        }
        Ok(())
    }

    fn owner(&self) -> Option<ManagedEntity> {
        self.inner.owner.upgrade().map(ManagedEntity::from_inner)
    }

    fn index_error(&self, index: usize, len: usize) -> Error {
        Error::relation(
            RelationErrorKind::IndexOutOfBounds,
            self.owner()
                .map_or_else(String::new, |o| o.entity_name().to_string()),
            self.inner.property.clone(),
            format!("index {index} is out of bounds for a collection of {len}"),
        )
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ManagedEntity>> {
        self.inner.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ManagedEntity>> {
        self.inner.items.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<_> = self.read().iter().map(ManagedEntity::id).collect();
        f.debug_struct("Collection")
            .field("property", &self.inner.property)
            .field("items", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, RecordingSink, library};
    use RelationChange::{Added, Removed};

    struct Fixture {
        sink: Arc<RecordingSink>,
        publisher: ManagedEntity,
        books: Vec<ManagedEntity>,
    }

    fn fixture(active: bool) -> Fixture {
        let registry = library();
        let sink = RecordingSink::shared();
        let publisher = ManagedEntity::new(Arc::clone(registry.get("Publisher").unwrap()));
        Proxy::wrap(&publisher, &sink.as_dyn(), active);
        let books = (0..3)
            .map(|_| ManagedEntity::new(Arc::clone(registry.get("Book").unwrap())))
            .collect();
        Fixture {
            sink,
            publisher,
            books,
        }
    }

    fn event(f: &Fixture, book: usize, change: RelationChange) -> Event {
        Event::Collection(f.publisher.id(), "books".to_string(), f.books[book].id(), change)
    }

    #[test]
    fn test_marker() {
        let f = fixture(true);
        assert!(f.publisher.collection("books").unwrap().is_collection_proxy());
    }

    #[test]
    fn test_push_reports_added_and_wraps_item() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();

        assert_eq!(f.sink.events(), vec![event(&f, 0, Added)]);
        assert!(f.books[0].is_proxy());
        assert!(books.contains(&f.books[0]));
    }

    #[test]
    fn test_inactive_push_writes_through() {
        let f = fixture(false);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();
        assert_eq!(books.len(), 1);
        assert!(f.sink.events().is_empty());
    }

    #[test]
    fn test_push_rejects_wrong_entity_type() {
        let f = fixture(true);
        let registry = library();
        let user = ManagedEntity::new(Arc::clone(registry.get("User").unwrap()));
        let err = f.publisher.collection("books").unwrap().push(user).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert!(f.sink.events().is_empty());
    }

    #[test]
    fn test_index_assignment_replaces_and_reports_both_sides() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();
        books.set(0, f.books[1].clone()).unwrap();

        assert_eq!(
            f.sink.events(),
            vec![event(&f, 0, Added), event(&f, 0, Removed), event(&f, 1, Added)]
        );
        assert_eq!(books.to_vec(), vec![f.books[1].clone()]);
    }

    #[test]
    fn test_reorder_reports_nothing() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();
        books.push(f.books[1].clone()).unwrap();
        books.push(f.books[0].clone()).unwrap();
        let before = f.sink.events().len();

        // books[0] still present at index 2, books[1] already present at index 1
        books.set(0, f.books[1].clone()).unwrap();
        assert_eq!(f.sink.events().len(), before);
    }

    #[test]
    fn test_remove_reports_only_when_last_copy_goes() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();
        books.push(f.books[0].clone()).unwrap();
        assert_eq!(f.sink.events(), vec![event(&f, 0, Added)]);

        assert!(books.remove(&f.books[0]).unwrap());
        assert_eq!(f.sink.events().len(), 1);

        assert!(books.remove(&f.books[0]).unwrap());
        assert_eq!(f.sink.events(), vec![event(&f, 0, Added), event(&f, 0, Removed)]);

        assert!(!books.remove(&f.books[0]).unwrap());
    }

    #[test]
    fn test_out_of_bounds() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        let err = books.set(2, f.books[0].clone()).unwrap_err();
        assert!(matches!(
            err,
            Error::Relation(e) if e.kind == RelationErrorKind::IndexOutOfBounds
        ));
        assert!(books.remove_at(0).is_err());
    }

    #[test]
    fn test_clear_removes_everything() {
        let f = fixture(true);
        let books = f.publisher.collection("books").unwrap();
        books.push(f.books[0].clone()).unwrap();
        books.push(f.books[1].clone()).unwrap();
        books.clear().unwrap();
        assert!(books.is_empty());
        assert_eq!(f.sink.events().len(), 4);
    }
}
