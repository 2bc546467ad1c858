//! SQL identifier quoting and validation.
//!
//! Table and column names reach generated SQL through [`quote_ident`].
//! Names declared on mappings are additionally checked with
//! [`is_valid_identifier`] when the registry is completed, so that schema
//! diffs never carry names a database would reject.

use std::sync::OnceLock;

use regex::Regex;

/// Longest identifier accepted by the most restrictive supported store.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use fenland_core::quote_ident;
///
/// assert_eq!(quote_ident("user"), "\"user\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Check that a declared table or column name is a plain SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN
        && identifier_pattern().is_some_and(|pattern| pattern.is_match(name))
}

/// Convert a camel-case entity name into a snake-case table name.
///
/// ```
/// use fenland_core::identifiers::table_name_for;
///
/// assert_eq!(table_name_for("BookAuthor"), "book_author");
/// assert_eq!(table_name_for("user"), "user");
/// ```
pub fn table_name_for(entity: &str) -> String {
    let mut out = String::with_capacity(entity.len() + 4);
    for (i, ch) in entity.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
