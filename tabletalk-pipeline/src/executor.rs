//! Query execution: validated descriptors onto store calls.
//!
//! The executor is a thin adapter. It builds the store's per-operation
//! input from the descriptor, forwards the call, and wraps whatever
//! comes back. It never inspects result semantics and never retries;
//! transient-fault policy belongs to the orchestrator, which can see
//! the whole attempt budget.

use std::sync::Arc;
use tabletalk_core::{
    ExecutionError, ExecutionResult, QueryDescriptor, QueryOperation, TypedValue,
};
use tabletalk_store::{
    BatchGetItemInput, GetItemInput, Key, QueryInput, ScanInput, StoreClient, StoreOutput,
};
use tracing::{info, warn};

/// Executes descriptors against a [`StoreClient`].
pub struct QueryExecutor {
    store: Arc<dyn StoreClient>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    /// Execute a validated descriptor. `Err` carries the classified
    /// store fault together with the descriptor that caused it.
    pub async fn execute(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Result<ExecutionResult, ExecutionError> {
        let output = match descriptor.operation {
            QueryOperation::GetItem => {
                let input = GetItemInput {
                    table_name: descriptor.table_name.clone(),
                    key: primary_key(descriptor),
                    projection_expression: descriptor.projection_expression.clone(),
                    expression_attribute_names: descriptor.expression_attribute_names.clone(),
                };
                self.store.get_item(input).await
            }
            QueryOperation::Query => {
                let input = QueryInput {
                    table_name: descriptor.table_name.clone(),
                    index_name: descriptor.index_name.clone(),
                    key_condition_expression: descriptor
                        .key_condition_expression
                        .clone()
                        .unwrap_or_default(),
                    filter_expression: descriptor.filter_expression.clone(),
                    projection_expression: descriptor.projection_expression.clone(),
                    expression_attribute_values: descriptor
                        .expression_attribute_values
                        .clone()
                        .unwrap_or_default(),
                    expression_attribute_names: descriptor.expression_attribute_names.clone(),
                    limit: descriptor.limit,
                };
                self.store.query(input).await
            }
            QueryOperation::Scan => {
                // Scans are legitimate but worth surfacing in logs; on a
                // large table they are the expensive path.
                warn!(table = %descriptor.table_name, "executing full table scan");
                let input = ScanInput {
                    table_name: descriptor.table_name.clone(),
                    index_name: descriptor.index_name.clone(),
                    filter_expression: descriptor.filter_expression.clone(),
                    projection_expression: descriptor.projection_expression.clone(),
                    expression_attribute_values: descriptor
                        .expression_attribute_values
                        .clone()
                        .unwrap_or_default(),
                    expression_attribute_names: descriptor.expression_attribute_names.clone(),
                    limit: descriptor.limit,
                };
                self.store.scan(input).await
            }
            QueryOperation::BatchGetItem => {
                let input = BatchGetItemInput {
                    table_name: descriptor.table_name.clone(),
                    keys: batch_keys(descriptor),
                    projection_expression: descriptor.projection_expression.clone(),
                    expression_attribute_names: descriptor.expression_attribute_names.clone(),
                };
                self.store.batch_get_item(input).await
            }
        };

        match output {
            Ok(output) => {
                let result = normalize(output);
                info!(
                    operation = %descriptor.operation,
                    table = %descriptor.table_name,
                    count = result.count,
                    scanned = result.scanned_count,
                    "store call succeeded"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(
                    operation = %descriptor.operation,
                    table = %descriptor.table_name,
                    kind = err.kind.as_str(),
                    "store call failed: {}",
                    err.message
                );
                Err(ExecutionError::new(
                    err.kind,
                    err.message,
                    err.raw_message,
                    descriptor.clone(),
                ))
            }
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor").finish_non_exhaustive()
    }
}

fn normalize(output: StoreOutput) -> ExecutionResult {
    ExecutionResult {
        items: output.items,
        count: output.count,
        scanned_count: output.scanned_count,
    }
}

/// Build the GetItem key from the descriptor's value bindings. The
/// validator guarantees the bindings are exactly the key attributes,
/// under either the bare attribute name or a `:name` placeholder;
/// placeholder spellings are normalized back to attribute names here.
fn primary_key(descriptor: &QueryDescriptor) -> Key {
    let mut key = Key::new();
    if let Some(values) = &descriptor.expression_attribute_values {
        for (name, value) in values {
            key.insert(
                name.strip_prefix(':').unwrap_or(name).to_string(),
                value.clone(),
            );
        }
    }
    key
}

/// Expand BatchGetItem bindings into a key list. A list value fans out
/// into one key per element; scalar values repeat across all keys. With
/// multiple lists, elements pair up positionally and the shortest list
/// bounds the batch.
fn batch_keys(descriptor: &QueryDescriptor) -> Vec<Key> {
    let Some(values) = &descriptor.expression_attribute_values else {
        return Vec::new();
    };

    let batch_len = values
        .values()
        .filter_map(|v| match v {
            TypedValue::L(entries) => Some(entries.len()),
            _ => None,
        })
        .min()
        .unwrap_or(1);

    (0..batch_len)
        .map(|i| {
            let mut key = Key::new();
            for (name, value) in values {
                let entry = match value {
                    TypedValue::L(entries) => entries[i].clone(),
                    scalar => scalar.clone(),
                };
                key.insert(
                    name.strip_prefix(':').unwrap_or(name).to_string(),
                    entry,
                );
            }
            key
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tabletalk_core::{
        AttributeSchema, AttributeType, ExecutionErrorKind, KeySchema, KeyType, TableSchema,
    };
    use tabletalk_store::MemoryStore;

    fn orders_table() -> TableSchema {
        TableSchema {
            table_name: "Orders".to_string(),
            description: String::new(),
            partition_key: KeySchema {
                name: "customer_id".to_string(),
                key_type: KeyType::String,
            },
            sort_key: Some(KeySchema {
                name: "order_date".to_string(),
                key_type: KeyType::String,
            }),
            attributes: vec![AttributeSchema {
                name: "total".to_string(),
                attr_type: AttributeType::Number,
                description: String::new(),
            }],
            indexes: vec![],
        }
    }

    fn item(pairs: &[(&str, TypedValue)]) -> BTreeMap<String, TypedValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn seeded_executor() -> QueryExecutor {
        let store = MemoryStore::new();
        store.create_table(orders_table());
        for (cid, date, total) in [
            ("12345", "2024-03-01", 100),
            ("12345", "2024-03-15", 250),
            ("99999", "2024-02-10", 40),
        ] {
            store
                .put_item(
                    "Orders",
                    item(&[
                        ("customer_id", TypedValue::string(cid)),
                        ("order_date", TypedValue::string(date)),
                        ("total", TypedValue::number(total)),
                    ]),
                )
                .unwrap();
        }
        QueryExecutor::new(Arc::new(store))
    }

    fn values(pairs: &[(&str, TypedValue)]) -> BTreeMap<String, TypedValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_query_returns_customer_orders() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::Query, "Orders");
        descriptor.key_condition_expression = Some("customer_id = :cid".to_string());
        descriptor.expression_attribute_values =
            Some(values(&[(":cid", TypedValue::string("12345"))]));

        let result = executor.execute(&descriptor).await.unwrap();
        assert_eq!(result.count, 2);
        assert!(result
            .items
            .iter()
            .all(|i| i.get("customer_id") == Some(&TypedValue::string("12345"))));
    }

    #[tokio::test]
    async fn test_get_item_builds_key_from_bindings() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::GetItem, "Orders");
        descriptor.expression_attribute_values = Some(values(&[
            (":customer_id", TypedValue::string("12345")),
            ("order_date", TypedValue::string("2024-03-15")),
        ]));

        let result = executor.execute(&descriptor).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(
            result.items[0].get("total"),
            Some(&TypedValue::number(250))
        );
    }

    #[tokio::test]
    async fn test_batch_get_fans_out_list_bindings() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::BatchGetItem, "Orders");
        descriptor.expression_attribute_values = Some(values(&[
            (
                ":customer_id",
                TypedValue::L(vec![
                    TypedValue::string("12345"),
                    TypedValue::string("99999"),
                ]),
            ),
            (
                ":order_date",
                TypedValue::L(vec![
                    TypedValue::string("2024-03-01"),
                    TypedValue::string("2024-02-10"),
                ]),
            ),
        ]));

        let result = executor.execute(&descriptor).await.unwrap();
        assert_eq!(result.count, 2);
    }

    #[tokio::test]
    async fn test_scan_with_filter() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::Scan, "Orders");
        descriptor.filter_expression = Some("total > :min".to_string());
        descriptor.expression_attribute_values =
            Some(values(&[(":min", TypedValue::number(50))]));

        let result = executor.execute(&descriptor).await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.scanned_count, 3);
    }

    #[tokio::test]
    async fn test_missing_table_surfaces_classified_error() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::Query, "Nonexistent");
        descriptor.key_condition_expression = Some("customer_id = :cid".to_string());
        descriptor.expression_attribute_values =
            Some(values(&[(":cid", TypedValue::string("12345"))]));

        let err = executor.execute(&descriptor).await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ResourceNotFound);
        assert_eq!(err.descriptor, descriptor);
        assert!(!err.raw_detail.is_empty());
    }

    #[tokio::test]
    async fn test_get_item_miss_is_empty_result() {
        let executor = seeded_executor();
        let mut descriptor = QueryDescriptor::new(QueryOperation::GetItem, "Orders");
        descriptor.expression_attribute_values = Some(values(&[
            (":customer_id", TypedValue::string("00000")),
            (":order_date", TypedValue::string("2024-01-01")),
        ]));

        let result = executor.execute(&descriptor).await.unwrap();
        assert!(result.is_empty());
    }
}
