//! DDL generation from diff instructions.
//!
//! [`render`] turns one store's [`Instructions`] into ordered SQL
//! statements: foreign keys are dropped first and added last, so every
//! table and column they reference already exists (or is already gone)
//! when they run. Identifiers are double-quoted and column types follow
//! PostgreSQL naming.

use std::collections::BTreeMap;

use fenland_core::{FieldType, quote_ident};

use crate::instructions::{AlterTable, ColumnDefinition, ForeignKey, Instructions, TableDefinition};

/// Render instructions as SQL statements, in execution order:
///
/// 1. drop foreign keys
/// 2. rename tables
/// 3. alter tables (drop indexes, uniques and columns, then add them)
/// 4. drop tables
/// 5. create tables and their indexes
/// 6. add foreign keys
pub fn render(instructions: &Instructions) -> Vec<String> {
    let mut statements = Vec::new();

    for (table, names) in &instructions.foreign.drop {
        for name in names {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                quote_ident(table),
                quote_ident(name)
            ));
        }
    }

    for rename in &instructions.rename {
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&rename.from),
            quote_ident(&rename.to)
        ));
    }

    for alter in &instructions.alter {
        render_alter(alter, &mut statements);
    }

    for table in &instructions.drop {
        tracing::debug!(table = %table, "Generating DROP TABLE DDL");
        statements.push(format!("DROP TABLE IF EXISTS {}", quote_ident(table)));
    }

    for table in &instructions.create {
        statements.push(create_table(table));
        statements.extend(create_indexes(&table.table_name, &table.index));
    }

    for (table, keys) in &instructions.foreign.create {
        for key in keys {
            statements.push(add_foreign_key(table, key));
        }
    }

    statements
}

fn render_alter(alter: &AlterTable, statements: &mut Vec<String>) {
    let table = quote_ident(&alter.table_name);
    for name in &alter.drop_index {
        statements.push(format!("DROP INDEX IF EXISTS {}", quote_ident(name)));
    }
    for name in &alter.drop_unique {
        statements.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            table,
            quote_ident(name)
        ));
    }
    for column in &alter.drop_column {
        statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            table,
            quote_ident(column)
        ));
    }
    for column in &alter.fields {
        statements.push(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            table,
            column_definition(column)
        ));
    }
    for (name, columns) in &alter.unique {
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            table,
            quote_ident(name),
            column_list(columns)
        ));
    }
    statements.extend(create_indexes(&alter.table_name, &alter.index));
}

fn create_table(table: &TableDefinition) -> String {
    tracing::debug!(
        table = %table.table_name,
        columns = table.fields.len(),
        "Generating CREATE TABLE DDL"
    );

    let mut parts: Vec<String> = table
        .fields
        .iter()
        .map(|c| format!("  {}", column_definition(c)))
        .collect();

    let primary: Vec<String> = table
        .fields
        .iter()
        .filter(|c| c.primary)
        .map(|c| c.name.clone())
        .collect();
    if !primary.is_empty() {
        parts.push(format!("  PRIMARY KEY ({})", column_list(&primary)));
    }

    for (name, columns) in &table.unique {
        parts.push(format!(
            "  CONSTRAINT {} UNIQUE ({})",
            quote_ident(name),
            column_list(columns)
        ));
    }

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quote_ident(&table.table_name),
        parts.join(",\n")
    );
    tracing::trace!(sql = %sql, "Generated CREATE TABLE statement");
    sql
}

fn create_indexes(table: &str, indexes: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    indexes
        .iter()
        .map(|(name, columns)| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(name),
                quote_ident(table),
                column_list(columns)
            )
        })
        .collect()
}

fn add_foreign_key(table: &str, key: &ForeignKey) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(table),
        quote_ident(&key.name),
        quote_ident(&key.column),
        quote_ident(&key.referenced_table),
        quote_ident(&key.referenced_column)
    );
    if let Some(action) = key.on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action.as_sql());
    }
    if let Some(action) = key.on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action.as_sql());
    }
    sql
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format a column definition for CREATE TABLE or ADD COLUMN.
fn column_definition(column: &ColumnDefinition) -> String {
    let mut parts = vec![quote_ident(&column.name), sql_type(column)];
    if column.generated_value {
        parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
    }
    if !column.nullable {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = &column.default_to {
        parts.push(format!("DEFAULT {}", default_literal(default)));
    }
    parts.join(" ")
}

/// SQL type of a column.
pub fn sql_type(column: &ColumnDefinition) -> String {
    match column.field_type {
        FieldType::Integer => "INTEGER".to_string(),
        FieldType::BigInteger => "BIGINT".to_string(),
        FieldType::Float => "DOUBLE PRECISION".to_string(),
        FieldType::Decimal => match column.size {
            Some(precision) => format!("NUMERIC({precision})"),
            None => "NUMERIC".to_string(),
        },
        FieldType::String => format!("VARCHAR({})", column.size.unwrap_or(255)),
        FieldType::Text => "TEXT".to_string(),
        FieldType::Boolean => "BOOLEAN".to_string(),
        FieldType::Date => "DATE".to_string(),
        FieldType::DateTime => "TIMESTAMP".to_string(),
        FieldType::Time => "TIME".to_string(),
        FieldType::Json => "JSONB".to_string(),
        FieldType::Uuid => "UUID".to_string(),
        FieldType::Binary => "BYTEA".to_string(),
    }
}

fn default_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
