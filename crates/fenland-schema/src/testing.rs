//! Mapping fixtures shared by the unit tests.

use fenland_core::{EntityMapping, FieldOptions, FieldType, MappingRegistry, Relationship};

use crate::snapshot::{Snapshot, snapshot_of};

pub(crate) fn publisher() -> EntityMapping {
    EntityMapping::new("Publisher")
        .with_field(FieldOptions::id("id"))
        .with_field(FieldOptions::new("name", FieldType::String).size(255))
        .with_field(FieldOptions::relation(
            "books",
            Relationship::one_to_many("Book", "publisher"),
        ))
}

/// `Book` without its tags.
pub(crate) fn book() -> EntityMapping {
    EntityMapping::new("Book")
        .with_field(FieldOptions::id("id"))
        .with_field(FieldOptions::new("name", FieldType::String).size(255))
        .with_field(FieldOptions::relation(
            "publisher",
            Relationship::many_to_one("Publisher").inversed_by("books"),
        ))
}

pub(crate) fn book_tags() -> FieldOptions {
    FieldOptions::relation("tags", Relationship::many_to_many("Tag").inversed_by("books"))
}

pub(crate) fn tag() -> EntityMapping {
    EntityMapping::new("Tag")
        .with_field(FieldOptions::id("id"))
        .with_field(FieldOptions::new("name", FieldType::String).size(255))
        .with_field(FieldOptions::relation(
            "books",
            Relationship::many_to_many("Book").mapped_by("tags"),
        ))
}

pub(crate) fn registry(mappings: impl IntoIterator<Item = EntityMapping>) -> MappingRegistry {
    let mut registry = MappingRegistry::new();
    for mapping in mappings {
        registry.register(mapping).unwrap();
    }
    registry.complete().unwrap();
    registry
}

pub(crate) fn snapshot(mappings: impl IntoIterator<Item = EntityMapping>) -> Snapshot {
    snapshot_of(&registry(mappings))
}

/// Publishers owning books tagged with tags.
pub(crate) fn library() -> MappingRegistry {
    registry([publisher(), book().with_field(book_tags()), tag()])
}

pub(crate) fn library_snapshot() -> Snapshot {
    snapshot_of(&library())
}
