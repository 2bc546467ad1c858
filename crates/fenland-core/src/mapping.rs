//! Entity mapping descriptors.
//!
//! An [`EntityMapping`] is the read-only description of one entity type:
//! its table, store, fields, relations, indexes and unique constraints.
//! Mappings are assembled with the builder methods below, handed to a
//! [`MappingRegistry`](crate::registry::MappingRegistry), and become
//! immutable `Arc<EntityMapping>`s once the registry is completed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identifiers::table_name_for;

/// Column type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    #[default]
    Integer,
    BigInteger,
    Float,
    Decimal,
    String,
    Text,
    Boolean,
    Date,
    DateTime,
    Time,
    Json,
    Uuid,
    Binary,
}

impl FieldType {
    /// Values of temporal fields are compared by their normalized string form.
    pub const fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime | FieldType::Time)
    }
}

/// Kind of a relation between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// `User` has one `Profile`.
    OneToOne,
    /// One `Publisher` has many `Book`s.
    OneToMany,
    /// Many `Book`s belong to one `Publisher`.
    ManyToOne,
    /// `Book`s have many `Tag`s through a join table.
    ManyToMany,
}

impl RelationKind {
    /// Is the relation value a collection?
    pub const fn is_to_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Persistence operations propagated from an entity to its relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cascade {
    Persist,
    Remove,
    All,
}

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// A relation declared on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub target_entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inversed_by: Option<String>,
    /// Registry slot of the target, filled when the registry completes.
    #[serde(skip)]
    pub target_slot: Option<usize>,
}

impl Relationship {
    fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target_entity: target.into(),
            mapped_by: None,
            inversed_by: None,
            target_slot: None,
        }
    }

    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::OneToOne, target)
    }

    pub fn one_to_many(target: impl Into<String>, mapped_by: impl Into<String>) -> Self {
        Self::new(RelationKind::OneToMany, target).mapped_by(mapped_by)
    }

    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationKind::ManyToOne, target)
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationKind::ManyToMany, target)
    }

    /// Name the property on the target that owns this relation.
    pub fn mapped_by(mut self, property: impl Into<String>) -> Self {
        self.mapped_by = Some(property.into());
        self
    }

    /// Name the inverse property on the target.
    pub fn inversed_by(mut self, property: impl Into<String>) -> Self {
        self.inversed_by = Some(property.into());
        self
    }

    /// Does this side hold the foreign key (or own the join table)?
    ///
    /// Many-to-one is always owning, one-to-many never is. One-to-one and
    /// many-to-many own the relation unless they are `mapped_by` the
    /// other side.
    pub fn is_owning(&self) -> bool {
        match self.kind {
            RelationKind::ManyToOne => true,
            RelationKind::OneToMany => false,
            RelationKind::OneToOne | RelationKind::ManyToMany => self.mapped_by.is_none(),
        }
    }
}

/// Foreign-key column backing an owning to-one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinColumn {
    pub name: String,
    pub referenced_column_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

fn default_true() -> bool {
    true
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced_column_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column_name: referenced_column_name.into(),
            nullable: true,
            unique: false,
            on_delete: None,
            on_update: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }
}

/// Join table backing an owning many-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTable {
    pub name: String,
    /// Columns referencing the owning entity.
    pub join_columns: Vec<JoinColumn>,
    /// Columns referencing the target entity.
    pub inverse_join_columns: Vec<JoinColumn>,
}

impl JoinTable {
    pub fn new(
        name: impl Into<String>,
        join_column: JoinColumn,
        inverse_join_column: JoinColumn,
    ) -> Self {
        Self {
            name: name.into(),
            join_columns: vec![join_column],
            inverse_join_columns: vec![inverse_join_column],
        }
    }
}

/// Options of one mapped field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    /// Property name on the entity
    pub property: String,
    /// Column name
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cascades: Vec<Cascade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_column: Option<JoinColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_table: Option<JoinTable>,
}

impl FieldOptions {
    /// A plain column whose name equals the property name.
    pub fn new(property: impl Into<String>, field_type: FieldType) -> Self {
        let property = property.into();
        Self {
            name: property.clone(),
            property,
            field_type,
            size: None,
            nullable: false,
            default_to: None,
            primary: false,
            generated_value: false,
            unsigned: false,
            relationship: None,
            cascades: Vec::new(),
            join_column: None,
            join_table: None,
        }
    }

    /// A relation property.
    pub fn relation(property: impl Into<String>, relationship: Relationship) -> Self {
        let mut field = Self::new(property, FieldType::Integer);
        field.nullable = true;
        field.relationship = Some(relationship);
        field
    }

    /// Shorthand for an auto-generated integer primary key.
    pub fn id(property: impl Into<String>) -> Self {
        Self::new(property, FieldType::Integer)
            .primary()
            .generated()
            .unsigned()
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_to(mut self, value: serde_json::Value) -> Self {
        self.default_to = Some(value);
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated_value = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        if !self.cascades.contains(&cascade) {
            self.cascades.push(cascade);
        }
        self
    }

    pub fn join_column(mut self, join_column: JoinColumn) -> Self {
        self.join_column = Some(join_column);
        self
    }

    pub fn join_table(mut self, join_table: JoinTable) -> Self {
        self.join_table = Some(join_table);
        self
    }

    pub fn is_relation(&self) -> bool {
        self.relationship.is_some()
    }

    pub fn cascades_persist(&self) -> bool {
        self.cascades
            .iter()
            .any(|c| matches!(c, Cascade::Persist | Cascade::All))
    }

    pub fn cascades_remove(&self) -> bool {
        self.cascades
            .iter()
            .any(|c| matches!(c, Cascade::Remove | Cascade::All))
    }
}

/// Table-level options of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOptions {
    pub name: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collate: Option<String>,
}

/// Serialized form of a mapping, as stored in schema snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSnapshot {
    pub entity: EntityOptions,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldOptions>,
    #[serde(default)]
    pub relations: BTreeMap<String, Relationship>,
    #[serde(default)]
    pub index: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub unique: BTreeMap<String, Vec<String>>,
}

/// Read-only metadata for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    pub entity: EntityOptions,
    fields: Vec<FieldOptions>,
    indexes: BTreeMap<String, Vec<String>>,
    uniques: BTreeMap<String, Vec<String>>,
    primary_key: String,
    slot: Option<usize>,
}

impl EntityMapping {
    /// Start a mapping for `name`; the table defaults to the snake-cased name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            entity: EntityOptions {
                table_name: table_name_for(&name),
                name,
                store: None,
                charset: None,
                collate: None,
            },
            fields: Vec::new(),
            indexes: BTreeMap::new(),
            uniques: BTreeMap::new(),
            primary_key: "id".to_string(),
            slot: None,
        }
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.entity.table_name = table_name.into();
        self
    }

    pub fn store(mut self, store: impl Into<String>) -> Self {
        self.entity.store = Some(store.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.entity.charset = Some(charset.into());
        self
    }

    pub fn collate(mut self, collate: impl Into<String>) -> Self {
        self.entity.collate = Some(collate.into());
        self
    }

    /// Add a field. Re-adding a property replaces the earlier declaration.
    pub fn with_field(mut self, field: FieldOptions) -> Self {
        if field.primary {
            self.primary_key.clone_from(&field.property);
        }
        if let Some(existing) = self.fields.iter_mut().find(|f| f.property == field.property) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
        self
    }

    /// Add a named index over columns.
    pub fn index<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes
            .insert(name.into(), columns.into_iter().map(Into::into).collect());
        self
    }

    /// Add a named unique constraint over columns.
    pub fn unique<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniques
            .insert(name.into(), columns.into_iter().map(Into::into).collect());
        self
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.entity.name
    }

    /// Primary key property.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Primary key column.
    pub fn primary_column(&self) -> &str {
        self.field(&self.primary_key)
            .map_or(self.primary_key.as_str(), |f| f.name.as_str())
    }

    /// Is the primary key generated by the store on insert?
    pub fn has_generated_key(&self) -> bool {
        self.field(&self.primary_key)
            .is_some_and(|f| f.generated_value)
    }

    /// Property names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.property.as_str())
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldOptions] {
        &self.fields
    }

    pub fn field(&self, property: &str) -> Option<&FieldOptions> {
        self.fields.iter().find(|f| f.property == property)
    }

    /// Fields that declare a relation.
    pub fn relations(&self) -> impl Iterator<Item = &FieldOptions> {
        self.fields.iter().filter(|f| f.relationship.is_some())
    }

    pub fn relation(&self, property: &str) -> Option<&Relationship> {
        self.field(property).and_then(|f| f.relationship.as_ref())
    }

    pub fn join_column(&self, property: &str) -> Option<&JoinColumn> {
        self.field(property).and_then(|f| f.join_column.as_ref())
    }

    pub fn join_table(&self, property: &str) -> Option<&JoinTable> {
        self.field(property).and_then(|f| f.join_table.as_ref())
    }

    pub fn table_name(&self) -> &str {
        &self.entity.table_name
    }

    /// Store name, `None` meaning the default store.
    pub fn store_name(&self) -> Option<&str> {
        self.entity.store.as_deref()
    }

    pub fn indexes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.indexes
    }

    pub fn uniques(&self) -> &BTreeMap<String, Vec<String>> {
        &self.uniques
    }

    /// Registry slot, assigned when the registry completes.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub(crate) fn set_slot(&mut self, slot: usize) {
        self.slot = Some(slot);
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [FieldOptions] {
        &mut self.fields
    }

    /// Full descriptor dump used for snapshots.
    pub fn serializable(&self) -> MappingSnapshot {
        MappingSnapshot {
            entity: self.entity.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| (f.property.clone(), f.clone()))
                .collect(),
            relations: self
                .fields
                .iter()
                .filter_map(|f| {
                    f.relationship
                        .as_ref()
                        .map(|r| (f.property.clone(), r.clone()))
                })
                .collect(),
            index: self.indexes.clone(),
            unique: self.uniques.clone(),
        }
    }
}
