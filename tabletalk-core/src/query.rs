//! Structured query descriptors produced by the generator.
//!
//! A descriptor is the contract between the generative step and the
//! store: the model emits one as JSON, the validator checks it against
//! the schema, and the executor maps it onto a store call. Descriptors
//! are never mutated after validation; every retry builds a new one.

use crate::value::TypedValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four supported store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryOperation {
    GetItem,
    Query,
    Scan,
    BatchGetItem,
}

impl QueryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetItem => "GetItem",
            Self::Query => "Query",
            Self::Scan => "Scan",
            Self::BatchGetItem => "BatchGetItem",
        }
    }
}

impl std::fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, executable store query.
///
/// Field spellings follow the store's API conventions so the model can
/// emit the descriptor as JSON without a translation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub operation: QueryOperation,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_condition_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_values: Option<BTreeMap<String, TypedValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl QueryDescriptor {
    /// A minimal descriptor for the given operation and table. Expression
    /// fields start empty and are filled in by the caller.
    pub fn new(operation: QueryOperation, table_name: impl Into<String>) -> Self {
        Self {
            operation,
            table_name: table_name.into(),
            index_name: None,
            key_condition_expression: None,
            filter_expression: None,
            projection_expression: None,
            expression_attribute_values: None,
            expression_attribute_names: None,
            limit: None,
        }
    }

    /// The bound value for a `:placeholder`, if any.
    pub fn value_binding(&self, placeholder: &str) -> Option<&TypedValue> {
        self.expression_attribute_values.as_ref()?.get(placeholder)
    }

    /// Resolve a `#placeholder` to its real attribute name, if mapped.
    pub fn name_binding(&self, placeholder: &str) -> Option<&str> {
        self.expression_attribute_names
            .as_ref()?
            .get(placeholder)
            .map(String::as_str)
    }

    /// All expressions present on the descriptor, for placeholder checks.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        [
            self.key_condition_expression.as_deref(),
            self.filter_expression.as_deref(),
            self.projection_expression.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    /// Compact JSON rendering, used in correction prompts and
    /// diagnostic detail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_roundtrip_through_json() {
        for op in [
            QueryOperation::GetItem,
            QueryOperation::Query,
            QueryOperation::Scan,
            QueryOperation::BatchGetItem,
        ] {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
            let back: QueryOperation = serde_json::from_str(&json).unwrap();
            assert_eq!(back, op);
        }
    }

    #[test]
    fn test_descriptor_parses_from_model_style_json() {
        let json = r#"{
            "operation": "Query",
            "table_name": "Orders",
            "key_condition_expression": "customer_id = :cid",
            "expression_attribute_values": {":cid": {"S": "12345"}}
        }"#;
        let descriptor: QueryDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.operation, QueryOperation::Query);
        assert_eq!(descriptor.table_name, "Orders");
        assert_eq!(
            descriptor.value_binding(":cid"),
            Some(&TypedValue::string("12345"))
        );
        assert!(descriptor.index_name.is_none());
        assert!(descriptor.limit.is_none());
    }

    #[test]
    fn test_optional_fields_omitted_from_json() {
        let descriptor = QueryDescriptor::new(QueryOperation::Scan, "Orders");
        let json = descriptor.to_json();
        assert!(!json.contains("index_name"));
        assert!(!json.contains("limit"));
    }

    #[test]
    fn test_name_binding_resolution() {
        let mut descriptor = QueryDescriptor::new(QueryOperation::Query, "Orders");
        descriptor.expression_attribute_names = Some(BTreeMap::from([(
            "#st".to_string(),
            "status".to_string(),
        )]));
        assert_eq!(descriptor.name_binding("#st"), Some("status"));
        assert_eq!(descriptor.name_binding("#missing"), None);
    }

    #[test]
    fn test_expressions_iterator_skips_absent() {
        let mut descriptor = QueryDescriptor::new(QueryOperation::Query, "Orders");
        descriptor.key_condition_expression = Some("customer_id = :cid".to_string());
        descriptor.filter_expression = Some("total > :min".to_string());
        let expressions: Vec<&str> = descriptor.expressions().collect();
        assert_eq!(expressions, vec!["customer_id = :cid", "total > :min"]);
    }
}
