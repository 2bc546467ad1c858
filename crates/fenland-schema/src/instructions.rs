//! Per-store schema instructions produced by the diff engine.

use std::collections::BTreeMap;

use fenland_core::{FieldOptions, FieldType, ReferentialAction};
use serde::{Deserialize, Serialize};

/// One column as it should exist in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_to: Option<serde_json::Value>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub generated_value: bool,
    #[serde(default)]
    pub unsigned: bool,
}

impl ColumnDefinition {
    /// A non-null column with no default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            size: None,
            nullable: false,
            default_to: None,
            primary: false,
            generated_value: false,
            unsigned: false,
        }
    }
}

impl From<&FieldOptions> for ColumnDefinition {
    fn from(field: &FieldOptions) -> Self {
        Self {
            name: field.name.clone(),
            field_type: field.field_type,
            size: field.size,
            nullable: field.nullable,
            default_to: field.default_to.clone(),
            primary: field.primary,
            generated_value: field.generated_value,
            unsigned: field.unsigned,
        }
    }
}

/// Table-level options carried into CREATE TABLE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collate: Option<String>,
}

/// A table to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub table_name: String,
    pub fields: Vec<ColumnDefinition>,
    #[serde(default)]
    pub index: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub unique: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub meta: TableMeta,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.fields.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Changes to an existing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterTable {
    pub table_name: String,
    #[serde(default)]
    pub drop_index: Vec<String>,
    #[serde(default)]
    pub drop_unique: Vec<String>,
    #[serde(default)]
    pub drop_column: Vec<String>,
    /// Indexes to add.
    #[serde(default)]
    pub index: BTreeMap<String, Vec<String>>,
    /// Unique constraints to add.
    #[serde(default)]
    pub unique: BTreeMap<String, Vec<String>>,
    /// Columns to add.
    #[serde(default)]
    pub fields: Vec<ColumnDefinition>,
}

impl AlterTable {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.drop_index.is_empty()
            && self.drop_unique.is_empty()
            && self.drop_column.is_empty()
            && self.index.is_empty()
            && self.unique.is_empty()
            && self.fields.is_empty()
    }
}

/// A table rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

/// Foreign key changes keyed by table name.
///
/// Drops are keyed by the table name before any rename, creates by the
/// name after it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForeignInstructions {
    #[serde(default)]
    pub create: BTreeMap<String, Vec<ForeignKey>>,
    /// Constraint names to drop.
    #[serde(default)]
    pub drop: BTreeMap<String, Vec<String>>,
}

impl ForeignInstructions {
    pub fn is_empty(&self) -> bool {
        self.create.values().all(Vec::is_empty) && self.drop.values().all(Vec::is_empty)
    }
}

/// Everything one store needs to move from the old mapping to the new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub create: Vec<TableDefinition>,
    #[serde(default)]
    pub alter: Vec<AlterTable>,
    #[serde(default)]
    pub drop: Vec<String>,
    #[serde(default)]
    pub rename: Vec<Rename>,
    #[serde(default)]
    pub foreign: ForeignInstructions,
}

impl Instructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.alter.iter().all(AlterTable::is_empty)
            && self.drop.is_empty()
            && self.rename.is_empty()
            && self.foreign.is_empty()
    }

    pub fn created(&self, table: &str) -> Option<&TableDefinition> {
        self.create.iter().find(|t| t.table_name == table)
    }

    pub fn altered(&self, table: &str) -> Option<&AlterTable> {
        self.alter.iter().find(|t| t.table_name == table)
    }

    /// The pending alter for a table, created on first use.
    pub(crate) fn alter_mut(&mut self, table: &str) -> &mut AlterTable {
        let pos = match self.alter.iter().position(|t| t.table_name == table) {
            Some(pos) => pos,
            None => {
                self.alter.push(AlterTable::new(table));
                self.alter.len() - 1
            }
        };
        &mut self.alter[pos]
    }

    pub(crate) fn create_foreign(&mut self, table: &str, foreign_key: ForeignKey) {
        let keys = self.foreign.create.entry(table.to_string()).or_default();
        if !keys.iter().any(|k| k.name == foreign_key.name) {
            keys.push(foreign_key);
        }
    }

    pub(crate) fn drop_foreign(&mut self, table: &str, name: String) {
        let names = self.foreign.drop.entry(table.to_string()).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    /// Remove alters and foreign key lists that ended up empty.
    pub(crate) fn prune(&mut self) {
        self.alter.retain(|a| !a.is_empty());
        self.foreign.create.retain(|_, keys| !keys.is_empty());
        self.foreign.drop.retain(|_, names| !names.is_empty());
    }
}
