//! Execution results and the execution failure type.

use crate::error::ExecutionErrorKind;
use crate::query::QueryDescriptor;
use crate::value::TypedValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A result item: attribute name to typed value, tagging preserved.
pub type Item = BTreeMap<String, TypedValue>;

/// Normalized successful result of a store call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub items: Vec<Item>,
    pub count: usize,
    /// Items the store examined before filtering. Equals `count` for
    /// key-based lookups; may exceed it for filtered scans.
    pub scanned_count: usize,
}

impl ExecutionResult {
    pub fn new(items: Vec<Item>, scanned_count: usize) -> Self {
        let count = items.len();
        Self {
            items,
            count,
            scanned_count,
        }
    }

    /// An empty result (zero items, zero scanned).
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A classified store-side failure with full diagnostic detail.
///
/// `raw_detail` keeps the store's verbatim error text and `descriptor`
/// the exact query attempted, so a retry prompt or an operator-facing
/// error display can reconstruct what happened without guessing.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("Execution failed ({}): {message}", kind.as_str())]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub raw_detail: String,
    pub descriptor: QueryDescriptor,
}

impl ExecutionError {
    pub fn new(
        kind: ExecutionErrorKind,
        message: impl Into<String>,
        raw_detail: impl Into<String>,
        descriptor: QueryDescriptor,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_detail: raw_detail.into(),
            descriptor,
        }
    }
}

/// Either side of an execution, attached to a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(ExecutionResult),
    Failure(ExecutionError),
}

impl ExecutionOutcome {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Success(r) => Some(r),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOperation;

    #[test]
    fn test_count_matches_items() {
        let item: Item = BTreeMap::from([("id".to_string(), TypedValue::string("1"))]);
        let result = ExecutionResult::new(vec![item.clone(), item], 5);
        assert_eq!(result.count, 2);
        assert_eq!(result.scanned_count, 5);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_empty_result() {
        let result = ExecutionResult::empty();
        assert!(result.is_empty());
        assert_eq!(result.count, 0);
        assert_eq!(result.scanned_count, 0);
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::new(
            ExecutionErrorKind::Throttled,
            "request rate exceeded",
            "ProvisionedThroughputExceededException",
            QueryDescriptor::new(QueryOperation::Query, "Orders"),
        );
        let msg = format!("{}", err);
        assert!(msg.contains("throttled"));
        assert!(msg.contains("request rate exceeded"));
    }

    #[test]
    fn test_outcome_accessors() {
        let success = ExecutionOutcome::Success(ExecutionResult::empty());
        assert!(success.result().is_some());
        assert!(success.error().is_none());

        let failure = ExecutionOutcome::Failure(ExecutionError::new(
            ExecutionErrorKind::Unknown,
            "boom",
            "boom",
            QueryDescriptor::new(QueryOperation::Scan, "Orders"),
        ));
        assert!(failure.result().is_none());
        assert!(failure.error().is_some());
    }
}
