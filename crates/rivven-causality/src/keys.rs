//! Row key derivation
//!
//! A row yields one key per primary/unique index: for each index column
//! `<value>.<column>.`, concatenated. A prefix index truncates the value to
//! its prefix length in characters. Null values are skipped; an index whose
//! columns are all null yields no key. A row that yields no key at all,
//! either because the table has no unique index or because every unique
//! column is null, falls back to the quoted table name, serializing it with
//! every other such row of the table.

use crate::schema::{IndexInfo, TableInfo};
use serde_json::Value;

/// Render a column value as it appears in a key.
pub fn column_value(value: &Value, prefix_length: Option<usize>) -> Option<String> {
    let rendered = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    Some(match prefix_length {
        Some(len) => rendered.chars().take(len).collect(),
        None => rendered,
    })
}

/// Key of `row` for one index, or `None` if every index column is null.
pub fn gen_key(index: &IndexInfo, row: &[Value]) -> Option<String> {
    let mut key = String::new();
    for column in &index.columns {
        let Some(value) = row.get(column.offset) else {
            continue;
        };
        if let Some(rendered) = column_value(value, column.length) {
            key.push_str(&rendered);
            key.push('.');
            key.push_str(&column.name);
            key.push('.');
        }
    }
    (!key.is_empty()).then_some(key)
}

/// All keys of `row`, primary key first.
pub fn gen_multiple_keys(table: &TableInfo, row: &[Value]) -> Vec<String> {
    let mut keys: Vec<String> = table
        .unique_indices()
        .filter_map(|index| gen_key(index, row))
        .collect();
    if keys.is_empty() {
        keys.push(table.quoted_name());
    }
    keys
}
