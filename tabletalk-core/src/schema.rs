//! Declarative store schema: tables, keys, indexes, attributes.
//!
//! Pure data loaded from a JSON document at process start (and on
//! explicit reload). The validator and the prompt builders are the only
//! consumers; nothing here talks to the store.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};

/// The type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    String,
    Number,
    Binary,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Binary => "binary",
        }
    }
}

/// The declared type of a non-key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    List,
    Map,
    Binary,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Binary => "binary",
        }
    }
}

/// A key attribute definition (name + type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub name: String,
    pub key_type: KeyType,
}

/// A non-key attribute, described for the query generator's benefit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    #[serde(default)]
    pub description: String,
}

/// A secondary index over a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub index_name: String,
    pub partition_key: KeySchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeySchema>,
    #[serde(default)]
    pub description: String,
}

/// Schema for a single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    #[serde(default)]
    pub description: String,
    pub partition_key: KeySchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeySchema>,
    #[serde(default)]
    pub attributes: Vec<AttributeSchema>,
    #[serde(default)]
    pub indexes: Vec<IndexDescription>,
}

impl TableSchema {
    /// Look up an index by name.
    pub fn index(&self, index_name: &str) -> Option<&IndexDescription> {
        self.indexes.iter().find(|i| i.index_name == index_name)
    }

    /// The key attributes a targeted lookup must bind: partition key,
    /// plus sort key when the table has one.
    pub fn required_key_names(&self) -> Vec<&str> {
        let mut names = vec![self.partition_key.name.as_str()];
        if let Some(sk) = &self.sort_key {
            names.push(sk.name.as_str());
        }
        names
    }
}

/// The full store schema: an ordered list of tables.
///
/// Immutable after load. The registry shares it read-only behind an
/// `Arc`; reload builds a fresh instance and swaps the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
}

impl SchemaDescription {
    /// Parse a schema document from JSON and check its internal
    /// consistency (non-empty, unique table and index names).
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(json).map_err(|e| SchemaError::Malformed {
            reason: e.to_string(),
        })?;
        schema.check()?;
        Ok(schema)
    }

    /// Look up a table by name.
    pub fn table(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table_name == table_name)
    }

    /// Internal consistency check.
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.tables.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut table_names = std::collections::HashSet::new();
        for table in &self.tables {
            if !table_names.insert(table.table_name.as_str()) {
                return Err(SchemaError::DuplicateTable {
                    table: table.table_name.clone(),
                });
            }
            let mut index_names = std::collections::HashSet::new();
            for index in &table.indexes {
                if !index_names.insert(index.index_name.as_str()) {
                    return Err(SchemaError::DuplicateIndex {
                        table: table.table_name.clone(),
                        index: index.index_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
