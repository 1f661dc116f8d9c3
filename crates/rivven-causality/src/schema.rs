//! Table and index model used to derive row keys
//!
//! Only what key derivation needs: column names and positions, and which
//! indexes are primary or unique, with optional prefix lengths.
//!
//! ```rust
//! use rivven_causality::schema::{IndexPart, TableInfo};
//!
//! // create table t (c1 text, c2 int unique, unique key c1(c1(3)))
//! let table = TableInfo::builder("test", "t")
//!     .column("c1")
//!     .column("c2")
//!     .unique_key("c1", [IndexPart::prefix("c1", 3)])
//!     .unique_key("c2", ["c2"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(table.unique_indices().count(), 2);
//! ```

use crate::error::{CausalityError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Position of the column in a row
    pub offset: usize,
}

/// A column of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    /// Position of the column in a row
    pub offset: usize,
    /// Prefix length in characters, `None` for the whole value
    pub length: Option<usize>,
}

/// An index of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub primary: bool,
    pub unique: bool,
    pub columns: Vec<IndexColumn>,
}

/// Column reference used when declaring an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPart {
    column: String,
    length: Option<usize>,
}

impl IndexPart {
    /// Index the whole column value.
    pub fn full(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            length: None,
        }
    }

    /// Index the first `length` characters of the column.
    pub fn prefix(column: impl Into<String>, length: usize) -> Self {
        Self {
            column: column.into(),
            length: Some(length),
        }
    }
}

impl From<&str> for IndexPart {
    fn from(column: &str) -> Self {
        Self::full(column)
    }
}

impl From<String> for IndexPart {
    fn from(column: String) -> Self {
        Self::full(column)
    }
}

/// Downstream table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indices: Vec<IndexInfo>,
}

impl TableInfo {
    /// Create a new builder.
    pub fn builder(schema: impl Into<String>, name: impl Into<String>) -> TableInfoBuilder {
        TableInfoBuilder {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Quoted full name, e.g. `` `db`.`tb` ``.
    pub fn quoted_name(&self) -> String {
        format!("`{}`.`{}`", self.schema, self.name)
    }

    /// Primary key first, then the unique keys in declaration order.
    pub fn unique_indices(&self) -> impl Iterator<Item = &IndexInfo> {
        let primary = self.indices.iter().filter(|i| i.primary);
        let unique = self.indices.iter().filter(|i| i.unique && !i.primary);
        primary.chain(unique)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

struct PendingIndex {
    name: String,
    primary: bool,
    unique: bool,
    parts: Vec<IndexPart>,
}

/// Builder for TableInfo.
pub struct TableInfoBuilder {
    schema: String,
    name: String,
    columns: Vec<String>,
    indices: Vec<PendingIndex>,
}

impl TableInfoBuilder {
    /// Append a column.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Declare the primary key.
    pub fn primary_key<I, P>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<IndexPart>,
    {
        self.indices.push(PendingIndex {
            name: "PRIMARY".to_string(),
            primary: true,
            unique: true,
            parts: parts.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Declare a unique key.
    pub fn unique_key<I, P>(mut self, name: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<IndexPart>,
    {
        self.indices.push(PendingIndex {
            name: name.into(),
            primary: false,
            unique: true,
            parts: parts.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Declare a non-unique index (ignored for keys).
    pub fn index<I, P>(mut self, name: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<IndexPart>,
    {
        self.indices.push(PendingIndex {
            name: name.into(),
            primary: false,
            unique: false,
            parts: parts.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Resolve column references and build the table.
    pub fn build(self) -> Result<TableInfo> {
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        for (offset, name) in self.columns.into_iter().enumerate() {
            if !seen.insert(name.clone()) {
                return Err(CausalityError::schema(format!(
                    "duplicate column {} in table {}.{}",
                    name, self.schema, self.name
                )));
            }
            columns.push(ColumnInfo { name, offset });
        }

        if self.indices.iter().filter(|i| i.primary).count() > 1 {
            return Err(CausalityError::schema(format!(
                "multiple primary keys in table {}.{}",
                self.schema, self.name
            )));
        }

        let mut indices = Vec::with_capacity(self.indices.len());
        for index in self.indices {
            if index.parts.is_empty() {
                return Err(CausalityError::schema(format!(
                    "index {} has no columns",
                    index.name
                )));
            }
            let mut index_columns = Vec::with_capacity(index.parts.len());
            for part in index.parts {
                let column = columns
                    .iter()
                    .find(|c| c.name == part.column)
                    .ok_or_else(|| {
                        CausalityError::schema(format!(
                            "index {} references unknown column {}",
                            index.name, part.column
                        ))
                    })?;
                if part.length == Some(0) {
                    return Err(CausalityError::schema(format!(
                        "index {} has a zero prefix length on {}",
                        index.name, part.column
                    )));
                }
                index_columns.push(IndexColumn {
                    name: column.name.clone(),
                    offset: column.offset,
                    length: part.length,
                });
            }
            indices.push(IndexInfo {
                name: index.name,
                primary: index.primary,
                unique: index.unique,
                columns: index_columns,
            });
        }

        Ok(TableInfo {
            schema: self.schema,
            name: self.name,
            columns,
            indices,
        })
    }
}
