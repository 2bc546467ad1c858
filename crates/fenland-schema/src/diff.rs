//! Schema diff engine for comparing mapping snapshots.
//!
//! [`SchemaDiffer::diff`] walks every entity present in either snapshot and
//! stages the instructions that move each store from the old mapping to the
//! new one. Entities only in the new snapshot are created, entities only in
//! the old one are dropped, and entities present in both are compared field
//! by field, index by index and unique constraint by unique constraint.
//!
//! Every mapped field is reduced to its *footprint* in the store: a plain
//! column, a foreign-key column, a join table, or nothing at all for inverse
//! relation sides. Remaining fields whose footprint changed are dropped and
//! re-added; there is no in-place `ALTER COLUMN`. A created column whose name
//! matches a dropped one is reconciled first, so a property renamed onto the
//! same unchanged column produces no instructions.

use std::collections::BTreeMap;

use fenland_core::{
    Error, FieldOptions, JoinColumn, JoinTable, MappingSnapshot, RelationKind, Result,
    SchemaError, SchemaErrorKind,
};

use crate::instructions::{
    ColumnDefinition, ForeignKey, Instructions, Rename, TableDefinition, TableMeta,
};
use crate::naming;
use crate::snapshot::Snapshot;

// ============================================================================
// Set Diff
// ============================================================================

/// Keys split by which side of the comparison holds them.
struct SetDiff<'a, T> {
    drop: Vec<&'a T>,
    create: Vec<&'a T>,
    remain: Vec<(&'a T, &'a T)>,
}

fn set_diff<'a, T>(old: &'a BTreeMap<String, T>, new: &'a BTreeMap<String, T>) -> SetDiff<'a, T> {
    let mut diff = SetDiff {
        drop: Vec::new(),
        create: Vec::new(),
        remain: Vec::new(),
    };
    for (key, before) in old {
        match new.get(key) {
            Some(after) => diff.remain.push((before, after)),
            None => diff.drop.push(before),
        }
    }
    for (key, after) in new {
        if !old.contains_key(key) {
            diff.create.push(after);
        }
    }
    diff
}

// ============================================================================
// Field Footprints
// ============================================================================

/// What one mapped field occupies in the store.
#[derive(Debug, Clone, PartialEq)]
enum Footprint {
    /// Inverse relation sides live in the other table.
    None,
    Column(ColumnFootprint),
    JoinTable(JoinTableFootprint),
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnFootprint {
    column: ColumnDefinition,
    foreign_key: Option<ForeignKey>,
    /// Single-column unique constraint of one-to-one join columns.
    unique: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct JoinTableFootprint {
    table: TableDefinition,
    foreign_keys: Vec<ForeignKey>,
}

fn unknown_target(entity: &str, property: &str, target: &str) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::UnknownTarget,
        message: format!(
            "relation {entity}.{property} targets '{target}', which is not in the snapshot \
             or has no primary key"
        ),
    })
}

/// Resolve the store footprint of `field` against the snapshot it came from.
///
/// Implicit join columns and join tables are named here exactly as the
/// registry names them, so snapshots written before completion diff the
/// same way as completed ones.
fn footprint(
    snapshot: &Snapshot,
    mapping: &MappingSnapshot,
    field: &FieldOptions,
) -> Result<Footprint> {
    let Some(relationship) = &field.relationship else {
        return Ok(Footprint::Column(ColumnFootprint {
            column: ColumnDefinition::from(field),
            foreign_key: None,
            unique: None,
        }));
    };
    if !relationship.is_owning() || relationship.kind == RelationKind::OneToMany {
        return Ok(Footprint::None);
    }

    let owner_table = mapping.entity.table_name.as_str();
    let target_entity = relationship.target_entity.as_str();
    let missing = || unknown_target(&mapping.entity.name, &field.property, target_entity);
    let target = snapshot.get(target_entity).ok_or_else(missing)?;
    let target_pk = snapshot.primary_field(target_entity).ok_or_else(missing)?;
    let target_table = target.entity.table_name.as_str();

    match relationship.kind {
        RelationKind::ManyToOne | RelationKind::OneToOne => {
            let mut join_column = field.join_column.clone().unwrap_or_else(|| {
                JoinColumn::new(
                    naming::join_column_name(&field.property),
                    target_pk.name.clone(),
                )
            });
            if relationship.kind == RelationKind::OneToOne {
                join_column.unique = true;
            }
            let column = ColumnDefinition {
                nullable: join_column.nullable,
                unsigned: target_pk.unsigned,
                ..ColumnDefinition::new(join_column.name.clone(), target_pk.field_type)
            };
            let unique = join_column
                .unique
                .then(|| naming::unique_name(owner_table, &[join_column.name.as_str()]));
            Ok(Footprint::Column(ColumnFootprint {
                column,
                foreign_key: Some(foreign_key(owner_table, &join_column, target_table)),
                unique,
            }))
        }
        RelationKind::ManyToMany => {
            let owner_pk = mapping
                .fields
                .values()
                .find(|f| f.primary)
                .ok_or_else(|| {
                    unknown_target(&mapping.entity.name, &field.property, &mapping.entity.name)
                })?;
            let join_table = field.join_table.clone().unwrap_or_else(|| {
                JoinTable::new(
                    naming::join_table_name(owner_table, target_table),
                    JoinColumn::new(naming::join_column_name(owner_table), owner_pk.name.clone())
                        .not_null(),
                    JoinColumn::new(
                        naming::join_column_name(target_table),
                        target_pk.name.clone(),
                    )
                    .not_null(),
                )
            });

            let mut table = TableDefinition {
                table_name: join_table.name.clone(),
                ..TableDefinition::default()
            };
            let mut foreign_keys = Vec::new();
            let sides = [
                (&join_table.join_columns, owner_pk, owner_table),
                (&join_table.inverse_join_columns, target_pk, target_table),
            ];
            for (columns, referenced_pk, referenced_table) in sides {
                for join_column in columns {
                    table.fields.push(ColumnDefinition {
                        nullable: join_column.nullable,
                        unsigned: referenced_pk.unsigned,
                        ..ColumnDefinition::new(join_column.name.clone(), referenced_pk.field_type)
                    });
                    foreign_keys.push(foreign_key(
                        &join_table.name,
                        join_column,
                        referenced_table,
                    ));
                }
            }
            let columns: Vec<String> = table.fields.iter().map(|c| c.name.clone()).collect();
            table
                .unique
                .insert(naming::unique_name(&join_table.name, &columns), columns);
            Ok(Footprint::JoinTable(JoinTableFootprint {
                table,
                foreign_keys,
            }))
        }
        RelationKind::OneToMany => Ok(Footprint::None),
    }
}

fn foreign_key(table: &str, join_column: &JoinColumn, referenced_table: &str) -> ForeignKey {
    ForeignKey {
        name: naming::foreign_key_name(table, &join_column.name),
        column: join_column.name.clone(),
        referenced_table: referenced_table.to_string(),
        referenced_column: join_column.referenced_column_name.clone(),
        on_delete: join_column.on_delete,
        on_update: join_column.on_update,
    }
}

/// Primary keys first, then the remaining fields in property order.
fn ordered_fields(mapping: &MappingSnapshot) -> Vec<&FieldOptions> {
    let mut fields: Vec<&FieldOptions> = mapping.fields.values().collect();
    fields.sort_by_key(|f| !f.primary);
    fields
}

// ============================================================================
// Table Changes
// ============================================================================

/// Footprints dropped and created on one remaining table, reconciled by
/// column (or join table) name before they become instructions.
#[derive(Default)]
struct TableChanges {
    dropped: BTreeMap<String, ColumnFootprint>,
    created: Vec<ColumnFootprint>,
    dropped_joins: BTreeMap<String, JoinTableFootprint>,
    created_joins: Vec<JoinTableFootprint>,
}

impl TableChanges {
    fn drop(&mut self, footprint: Footprint) {
        match footprint {
            Footprint::None => {}
            Footprint::Column(column) => {
                self.dropped.insert(column.column.name.clone(), column);
            }
            Footprint::JoinTable(join) => {
                self.dropped_joins.insert(join.table.table_name.clone(), join);
            }
        }
    }

    fn create(&mut self, footprint: Footprint) {
        match footprint {
            Footprint::None => {}
            Footprint::Column(column) => self.created.push(column),
            Footprint::JoinTable(join) => self.created_joins.push(join),
        }
    }

    fn apply(self, old_table: &str, table: &str, instructions: &mut Instructions) {
        let mut dropped = self.dropped;
        for created in self.created {
            match dropped.remove(&created.column.name) {
                Some(previous) if previous.column != created.column => {
                    drop_column(instructions, old_table, table, previous);
                    add_column(instructions, table, created);
                }
                Some(previous) => {
                    // Same column; only its constraints may have moved.
                    if previous.foreign_key != created.foreign_key {
                        if let Some(fk) = previous.foreign_key {
                            instructions.drop_foreign(old_table, fk.name);
                        }
                        if let Some(fk) = created.foreign_key {
                            instructions.create_foreign(table, fk);
                        }
                    }
                    if previous.unique != created.unique {
                        let alter = instructions.alter_mut(table);
                        if let Some(name) = previous.unique {
                            alter.drop_unique.push(name);
                        }
                        if let Some(name) = created.unique {
                            alter.unique.insert(name, vec![created.column.name.clone()]);
                        }
                    }
                }
                None => add_column(instructions, table, created),
            }
        }
        for previous in dropped.into_values() {
            drop_column(instructions, old_table, table, previous);
        }

        let mut dropped_joins = self.dropped_joins;
        for created in self.created_joins {
            match dropped_joins.remove(&created.table.table_name) {
                Some(previous) if previous == created => {}
                Some(previous) => {
                    drop_join_table(instructions, previous);
                    create_join_table(instructions, created);
                }
                None => create_join_table(instructions, created),
            }
        }
        for previous in dropped_joins.into_values() {
            drop_join_table(instructions, previous);
        }
    }
}

fn add_column(instructions: &mut Instructions, table: &str, created: ColumnFootprint) {
    let alter = instructions.alter_mut(table);
    if let Some(name) = created.unique {
        alter.unique.insert(name, vec![created.column.name.clone()]);
    }
    alter.fields.push(created.column);
    if let Some(fk) = created.foreign_key {
        instructions.create_foreign(table, fk);
    }
}

fn drop_column(
    instructions: &mut Instructions,
    old_table: &str,
    table: &str,
    previous: ColumnFootprint,
) {
    if let Some(fk) = previous.foreign_key {
        instructions.drop_foreign(old_table, fk.name);
    }
    let alter = instructions.alter_mut(table);
    if let Some(name) = previous.unique {
        alter.drop_unique.push(name);
    }
    alter.drop_column.push(previous.column.name);
}

fn create_join_table(instructions: &mut Instructions, join: JoinTableFootprint) {
    if instructions.created(&join.table.table_name).is_some() {
        return;
    }
    for fk in join.foreign_keys {
        instructions.create_foreign(&join.table.table_name, fk);
    }
    instructions.create.push(join.table);
}

fn drop_join_table(instructions: &mut Instructions, join: JoinTableFootprint) {
    if !instructions.drop.contains(&join.table.table_name) {
        instructions.drop.push(join.table.table_name);
    }
}

/// Drop and recreate named indexes (or unique constraints) whose columns changed.
fn diff_named_columns(
    old: &BTreeMap<String, Vec<String>>,
    new: &BTreeMap<String, Vec<String>>,
    drop: &mut Vec<String>,
    create: &mut BTreeMap<String, Vec<String>>,
) {
    for (name, columns) in old {
        match new.get(name) {
            Some(after) if after == columns => {}
            Some(after) => {
                drop.push(name.clone());
                create.insert(name.clone(), after.clone());
            }
            None => drop.push(name.clone()),
        }
    }
    for (name, columns) in new {
        if !old.contains_key(name) {
            create.insert(name.clone(), columns.clone());
        }
    }
}

// ============================================================================
// Schema Differ
// ============================================================================

/// Compares two snapshots and stages per-store [`Instructions`].
///
/// # Example
///
/// ```ignore
/// let previous = Snapshot::from_json(&std::fs::read_to_string("schema.json")?)?;
/// let current = snapshot_of(&registry);
/// for (store, instructions) in SchemaDiffer::new("default").diff(&previous, &current)? {
///     for sql in ddl::render(&instructions) {
///         println!("{store}: {sql}");
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SchemaDiffer {
    default_store: String,
}

impl Default for SchemaDiffer {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SchemaDiffer {
    /// Entities without an explicit store land in `default_store`.
    pub fn new(default_store: impl Into<String>) -> Self {
        Self {
            default_store: default_store.into(),
        }
    }

    pub fn default_store(&self) -> &str {
        &self.default_store
    }

    /// Stage the instructions that turn `old` into `new`, keyed by store.
    ///
    /// Stores with nothing to do are left out of the result.
    #[tracing::instrument(level = "debug", skip_all, fields(old = old.len(), new = new.len()))]
    pub fn diff(&self, old: &Snapshot, new: &Snapshot) -> Result<BTreeMap<String, Instructions>> {
        let mut stores: BTreeMap<String, Instructions> = BTreeMap::new();
        let entities = set_diff(old.entities(), new.entities());

        for mapping in entities.create {
            let instructions = stores.entry(self.store_of(mapping)).or_default();
            create_entity(new, mapping, instructions)?;
        }
        for (before, after) in entities.remain {
            let old_store = self.store_of(before);
            let new_store = self.store_of(after);
            if old_store == new_store {
                let instructions = stores.entry(new_store).or_default();
                remain_entity(old, new, before, after, instructions)?;
            } else {
                tracing::debug!(
                    entity = %after.entity.name,
                    from = %old_store,
                    to = %new_store,
                    "Entity moved between stores"
                );
                drop_entity(old, before, stores.entry(old_store).or_default())?;
                create_entity(new, after, stores.entry(new_store).or_default())?;
            }
        }
        for mapping in entities.drop {
            let instructions = stores.entry(self.store_of(mapping)).or_default();
            drop_entity(old, mapping, instructions)?;
        }

        for instructions in stores.values_mut() {
            instructions.prune();
        }
        stores.retain(|_, instructions| !instructions.is_empty());
        for (store, instructions) in &stores {
            tracing::debug!(
                store = %store,
                create = instructions.create.len(),
                alter = instructions.alter.len(),
                drop = instructions.drop.len(),
                rename = instructions.rename.len(),
                "Staged schema instructions"
            );
        }
        Ok(stores)
    }

    fn store_of(&self, mapping: &MappingSnapshot) -> String {
        mapping
            .entity
            .store
            .clone()
            .unwrap_or_else(|| self.default_store.clone())
    }
}

fn create_entity(
    snapshot: &Snapshot,
    mapping: &MappingSnapshot,
    instructions: &mut Instructions,
) -> Result<()> {
    let table = mapping.entity.table_name.as_str();
    let mut definition = TableDefinition {
        table_name: table.to_string(),
        fields: Vec::new(),
        index: mapping.index.clone(),
        unique: mapping.unique.clone(),
        meta: TableMeta {
            charset: mapping.entity.charset.clone(),
            collate: mapping.entity.collate.clone(),
        },
    };
    let mut joins = Vec::new();
    for field in ordered_fields(mapping) {
        match footprint(snapshot, mapping, field)? {
            Footprint::None => {}
            Footprint::Column(column) => {
                if let Some(name) = column.unique {
                    definition
                        .unique
                        .insert(name, vec![column.column.name.clone()]);
                }
                if let Some(fk) = column.foreign_key {
                    instructions.create_foreign(table, fk);
                }
                definition.fields.push(column.column);
            }
            Footprint::JoinTable(join) => joins.push(join),
        }
    }
    tracing::trace!(table = %table, columns = definition.fields.len(), "Staged table creation");
    instructions.create.push(definition);
    for join in joins {
        create_join_table(instructions, join);
    }
    Ok(())
}

fn drop_entity(
    snapshot: &Snapshot,
    mapping: &MappingSnapshot,
    instructions: &mut Instructions,
) -> Result<()> {
    let table = mapping.entity.table_name.as_str();
    if !instructions.drop.iter().any(|t| t == table) {
        instructions.drop.push(table.to_string());
    }
    for field in ordered_fields(mapping) {
        match footprint(snapshot, mapping, field)? {
            Footprint::Column(ColumnFootprint {
                foreign_key: Some(fk),
                ..
            }) => instructions.drop_foreign(table, fk.name),
            Footprint::JoinTable(join) => drop_join_table(instructions, join),
            _ => {}
        }
    }
    Ok(())
}

fn remain_entity(
    old: &Snapshot,
    new: &Snapshot,
    before: &MappingSnapshot,
    after: &MappingSnapshot,
    instructions: &mut Instructions,
) -> Result<()> {
    let old_table = before.entity.table_name.as_str();
    let table = after.entity.table_name.as_str();
    if old_table != table {
        instructions.rename.push(Rename {
            from: old_table.to_string(),
            to: table.to_string(),
        });
    }

    let mut changes = TableChanges::default();
    let fields = set_diff(&before.fields, &after.fields);
    for field in fields.drop {
        changes.drop(footprint(old, before, field)?);
    }
    for field in fields.create {
        changes.create(footprint(new, after, field)?);
    }
    for (was, now) in fields.remain {
        let was = footprint(old, before, was)?;
        let now = footprint(new, after, now)?;
        if was != now {
            changes.drop(was);
            changes.create(now);
        }
    }
    changes.apply(old_table, table, instructions);

    let alter = instructions.alter_mut(table);
    diff_named_columns(&before.index, &after.index, &mut alter.drop_index, &mut alter.index);
    diff_named_columns(
        &before.unique,
        &after.unique,
        &mut alter.drop_unique,
        &mut alter.unique,
    );
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
