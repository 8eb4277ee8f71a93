//! TABLETALK Store - Data-Store Abstraction Layer
//!
//! Trait for the key-value/document store collaborator, plus the
//! key/filter expression engine and an in-memory implementation used in
//! tests and local development. The pipeline only ever talks to
//! `StoreClient`; a production deployment plugs in a client for the
//! real store behind the same four operations.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tabletalk_core::{ExecutionErrorKind, Item, TypedValue};
use thiserror::Error;

pub mod expr;
pub mod memory;

pub use memory::MemoryStore;

// ============================================================================
// STORE ERRORS
// ============================================================================

/// A store-side fault, already classified into the pipeline's closed
/// set of kinds. `raw_message` preserves the store's verbatim text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", kind.as_str())]
pub struct StoreError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub raw_message: String,
}

impl StoreError {
    pub fn new(
        kind: ExecutionErrorKind,
        message: impl Into<String>,
        raw_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_message: raw_message.into(),
        }
    }

    pub fn resource_not_found(resource: impl std::fmt::Display) -> Self {
        let msg = format!("Requested resource not found: {resource}");
        Self::new(ExecutionErrorKind::ResourceNotFound, msg.clone(), msg)
    }

    pub fn expression(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ExecutionErrorKind::ExpressionError,
            message.clone(),
            message,
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// OPERATION INPUTS / OUTPUT
// ============================================================================

/// Key map for targeted lookups: attribute name to key value.
pub type Key = BTreeMap<String, TypedValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Key,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryInput {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_values: BTreeMap<String, TypedValue>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanInput {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_values: BTreeMap<String, TypedValue>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetItemInput {
    pub table_name: String,
    pub keys: Vec<Key>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
}

/// Normalized output of any store operation. Items keep the store's
/// typed-value tagging.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub scanned_count: usize,
}

impl StoreOutput {
    pub fn new(items: Vec<Item>, scanned_count: usize) -> Self {
        let count = items.len();
        Self {
            items,
            count,
            scanned_count,
        }
    }
}

// ============================================================================
// STORE CLIENT TRAIT
// ============================================================================

/// Trait for the data-store collaborator.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Fetch a single item by its full primary key.
    async fn get_item(&self, input: GetItemInput) -> StoreResult<StoreOutput>;

    /// Key-based query against a table or one of its secondary indexes.
    async fn query(&self, input: QueryInput) -> StoreResult<StoreOutput>;

    /// Full (or filtered) table traversal.
    async fn scan(&self, input: ScanInput) -> StoreResult<StoreOutput>;

    /// Fetch several items by full primary key in one call.
    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<StoreOutput>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_contains_kind() {
        let err = StoreError::resource_not_found("table Orders");
        let msg = format!("{}", err);
        assert!(msg.contains("resource_not_found"));
        assert!(msg.contains("table Orders"));
    }

    #[test]
    fn test_store_output_counts() {
        let item: Item = BTreeMap::from([("a".to_string(), TypedValue::string("1"))]);
        let output = StoreOutput::new(vec![item], 3);
        assert_eq!(output.count, 1);
        assert_eq!(output.scanned_count, 3);
    }
}
