mod common;

use common::library;
use fenland::{SchemaDiffer, Snapshot, ddl, snapshot_of};

#[test]
fn new_entity_is_created_with_its_foreign_key() {
    let current = snapshot_of(&library());
    let mut previous = current.clone();
    previous.remove("Book");

    let stores = SchemaDiffer::default().diff(&previous, &current).unwrap();
    let instructions = &stores["default"];

    let book = instructions.created("book").unwrap();
    assert_eq!(book.column_names(), vec!["id", "name", "publisher_id"]);
    let fks = &instructions.foreign.create["book"];
    assert_eq!(fks.len(), 1);
    assert_eq!(fks[0].referenced_table, "publisher");
    assert_eq!(fks[0].referenced_column, "id");
    assert!(!stores.contains_key("archive"));

    let statements = ddl::render(instructions);
    let create = statements
        .iter()
        .position(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"book\""))
        .unwrap();
    let foreign = statements
        .iter()
        .position(|s| s.contains("REFERENCES \"publisher\" (\"id\")"))
        .unwrap();
    assert!(create < foreign);
}

#[test]
fn stored_snapshot_diffs_clean_against_the_same_mapping() {
    let current = snapshot_of(&library());
    let stored = Snapshot::from_json(&current.to_json().unwrap()).unwrap();
    assert!(
        SchemaDiffer::default()
            .diff(&stored, &current)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn first_diff_creates_every_store() {
    let stores = SchemaDiffer::new("main")
        .diff(&Snapshot::new(), &snapshot_of(&library()))
        .unwrap();
    assert_eq!(stores.keys().collect::<Vec<_>>(), vec!["archive", "main"]);
    assert!(stores["archive"].created("audit_log").is_some());
    assert!(stores["main"].created("book_tag").is_some());
}
