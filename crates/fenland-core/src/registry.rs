//! Mapping registry and mapping completion.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identifiers::is_valid_identifier;
use crate::mapping::{EntityMapping, FieldType, JoinColumn, JoinTable, RelationKind};

/// Collects entity mappings and finalizes them.
///
/// Until [`complete`](MappingRegistry::complete) is called mappings may
/// refer to targets that are not registered yet. Completion resolves every
/// relation target to a registry slot, fills implicit join columns and
/// join tables, validates identifiers, and freezes the mappings.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: Vec<Arc<EntityMapping>>,
    by_name: HashMap<String, usize>,
    complete: bool,
}

struct TargetInfo {
    table: String,
    primary_column: String,
    primary_type: FieldType,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping. Names must be unique.
    pub fn register(&mut self, mapping: EntityMapping) -> Result<()> {
        if self.complete {
            return Err(Error::mapping(
                mapping.name(),
                "registry is already complete",
            ));
        }
        if self.by_name.contains_key(mapping.name()) {
            return Err(Error::mapping(mapping.name(), "entity registered twice"));
        }
        self.by_name
            .insert(mapping.name().to_string(), self.mappings.len());
        self.mappings.push(Arc::new(mapping));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, mapping: EntityMapping) -> Result<Self> {
        self.register(mapping)?;
        Ok(self)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Finalize all mappings.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.mappings.len()))]
    pub fn complete(&mut self) -> Result<()> {
        if self.complete {
            return Ok(());
        }

        let mut targets = Vec::with_capacity(self.mappings.len());
        for mapping in &self.mappings {
            let pk = mapping.field(mapping.primary_key()).ok_or_else(|| {
                Error::mapping(
                    mapping.name(),
                    format!("primary key '{}' is not a mapped field", mapping.primary_key()),
                )
            })?;
            if !pk.primary || pk.is_relation() {
                return Err(Error::mapping(
                    mapping.name(),
                    format!("field '{}' is not a primary key column", pk.property),
                ));
            }
            targets.push(TargetInfo {
                table: mapping.table_name().to_string(),
                primary_column: pk.name.clone(),
                primary_type: pk.field_type,
            });
        }

        let mut completed = Vec::with_capacity(self.mappings.len());
        for (slot, mapping) in self.mappings.iter().enumerate() {
            let mut mapping = EntityMapping::clone(mapping);
            mapping.set_slot(slot);
            let owner_table = mapping.table_name().to_string();
            let owner_pk = mapping.primary_column().to_string();
            let owner_name = mapping.name().to_string();

            for field in mapping.fields_mut() {
                let Some(relationship) = field.relationship.as_mut() else {
                    continue;
                };
                let target_slot = *self
                    .by_name
                    .get(&relationship.target_entity)
                    .ok_or_else(|| {
                        Error::mapping(
                            &owner_name,
                            format!(
                                "relation '{}' targets unknown entity '{}'",
                                field.property, relationship.target_entity
                            ),
                        )
                    })?;
                relationship.target_slot = Some(target_slot);
                let target = &targets[target_slot];

                match relationship.kind {
                    RelationKind::ManyToOne | RelationKind::OneToOne
                        if relationship.is_owning() =>
                    {
                        let implicit_name = format!("{}_id", field.property);
                        let join_column = field.join_column.get_or_insert_with(|| {
                            JoinColumn::new(implicit_name, target.primary_column.clone())
                        });
                        if relationship.kind == RelationKind::OneToOne {
                            join_column.unique = true;
                        }
                        field.name.clone_from(&join_column.name);
                        field.nullable = join_column.nullable;
                        field.field_type = target.primary_type;
                    }
                    RelationKind::ManyToMany if relationship.is_owning() => {
                        if field.join_table.is_none() {
                            field.join_table = Some(JoinTable::new(
                                format!("{}_{}", owner_table, target.table),
                                JoinColumn::new(format!("{owner_table}_id"), owner_pk.clone())
                                    .not_null(),
                                JoinColumn::new(
                                    format!("{}_id", target.table),
                                    target.primary_column.clone(),
                                )
                                .not_null(),
                            ));
                        }
                    }
                    _ => {}
                }
            }

            validate_identifiers(&mapping)?;
            completed.push(Arc::new(mapping));
        }

        self.mappings = completed;
        self.complete = true;
        tracing::debug!(entities = self.mappings.len(), "Mapping registry complete");
        Ok(())
    }

    /// Look up a mapping by entity name.
    pub fn get(&self, name: &str) -> Option<&Arc<EntityMapping>> {
        self.by_name.get(name).map(|&slot| &self.mappings[slot])
    }

    /// Look up a mapping by registry slot.
    pub fn by_slot(&self, slot: usize) -> Option<&Arc<EntityMapping>> {
        self.mappings.get(slot)
    }

    /// Resolve a relation's target mapping.
    pub fn target_of(&self, mapping: &EntityMapping, property: &str) -> Option<&Arc<EntityMapping>> {
        mapping
            .relation(property)
            .and_then(|r| r.target_slot)
            .and_then(|slot| self.by_slot(slot))
    }

    /// All mappings in registration order.
    pub fn mappings(&self) -> impl Iterator<Item = &Arc<EntityMapping>> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn validate_identifiers(mapping: &EntityMapping) -> Result<()> {
    let check = |what: &str, name: &str| {
        if is_valid_identifier(name) {
            Ok(())
        } else {
            Err(Error::mapping(
                mapping.name(),
                format!("invalid {what} name '{name}'"),
            ))
        }
    };

    check("table", mapping.table_name())?;
    for field in mapping.fields() {
        if field.relationship.as_ref().is_some_and(|r| r.kind.is_to_many()) {
            if let Some(join_table) = &field.join_table {
                check("join table", &join_table.name)?;
                for column in join_table
                    .join_columns
                    .iter()
                    .chain(&join_table.inverse_join_columns)
                {
                    check("join column", &column.name)?;
                }
            }
            continue;
        }
        check("column", &field.name)?;
    }
    for (name, columns) in mapping.indexes().iter().chain(mapping.uniques()) {
        check("index", name)?;
        for column in columns {
            check("column", column)?;
        }
    }
    Ok(())
}
