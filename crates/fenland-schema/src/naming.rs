//! Deterministic names for generated schema objects.
//!
//! Re-diffing the same snapshots must produce the same names, so every
//! implicit constraint or join table name is derived only from table and
//! column names.

/// `idx_{table}_{col1}_{col2}`
pub fn index_name<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    format!("idx_{}_{}", table, join_columns(columns))
}

/// `uniq_{table}_{col1}_{col2}`
pub fn unique_name<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    format!("uniq_{}_{}", table, join_columns(columns))
}

/// `fk_{table}_{column}`
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("fk_{}_{}", table, column)
}

/// `{owner_table}_{target_table}`
pub fn join_table_name(owner_table: &str, target_table: &str) -> String {
    format!("{}_{}", owner_table, target_table)
}

/// `{property}_id` for owning to-one relations, `{table}_id` inside join tables.
pub fn join_column_name(base: &str) -> String {
    format!("{}_id", base)
}

fn join_columns<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("_")
}
