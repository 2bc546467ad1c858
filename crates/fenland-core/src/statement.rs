//! INSERT/UPDATE/DELETE/SELECT statement building.
//!
//! Statements quote every identifier and bind every value as a `$n`
//! placeholder, so callers only hand over table names, column names and
//! values.

use crate::identifiers::quote_ident;
use crate::value::Value;

/// A rendered SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A single `column = value` condition. Conditions are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub value: Value,
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

struct Binder {
    params: Vec<Value>,
}

impl Binder {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn where_clause(&mut self, conditions: Vec<Condition>) -> String {
        if conditions.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = conditions
            .into_iter()
            .map(|c| {
                if c.value.is_null() {
                    format!("{} IS NULL", quote_ident(&c.column))
                } else {
                    let placeholder = self.bind(c.value);
                    format!("{} = {}", quote_ident(&c.column), placeholder)
                }
            })
            .collect();
        format!(" WHERE {}", parts.join(" AND "))
    }
}

impl Statement {
    /// `INSERT INTO table (cols...) VALUES ($1, ...)`.
    ///
    /// An empty column list renders `DEFAULT VALUES`.
    pub fn insert(table: &str, values: Vec<(String, Value)>) -> Self {
        if values.is_empty() {
            return Self {
                sql: format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)),
                params: Vec::new(),
            };
        }

        let mut binder = Binder::new();
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            columns.push(quote_ident(&column));
            placeholders.push(binder.bind(value));
        }

        Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: binder.params,
        }
    }

    /// `UPDATE table SET col = $1, ... WHERE ...`.
    pub fn update(table: &str, set: Vec<(String, Value)>, conditions: Vec<Condition>) -> Self {
        let mut binder = Binder::new();
        let assignments: Vec<String> = set
            .into_iter()
            .map(|(column, value)| format!("{} = {}", quote_ident(&column), binder.bind(value)))
            .collect();
        let where_clause = binder.where_clause(conditions);

        Self {
            sql: format!(
                "UPDATE {} SET {}{}",
                quote_ident(table),
                assignments.join(", "),
                where_clause
            ),
            params: binder.params,
        }
    }

    /// `DELETE FROM table WHERE ...`.
    pub fn delete(table: &str, conditions: Vec<Condition>) -> Self {
        let mut binder = Binder::new();
        let where_clause = binder.where_clause(conditions);

        Self {
            sql: format!("DELETE FROM {}{}", quote_ident(table), where_clause),
            params: binder.params,
        }
    }

    /// `SELECT cols FROM table WHERE ...`.
    pub fn select(table: &str, columns: &[&str], conditions: Vec<Condition>) -> Self {
        let mut binder = Binder::new();
        let column_list = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let where_clause = binder.where_clause(conditions);

        Self {
            sql: format!(
                "SELECT {} FROM {}{}",
                column_list,
                quote_ident(table),
                where_clause
            ),
            params: binder.params,
        }
    }
}
