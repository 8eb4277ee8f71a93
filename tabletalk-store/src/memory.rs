//! In-memory store implementation.
//!
//! Implements the four `StoreClient` operations against tables held in
//! process memory, with real key-condition and filter evaluation. Used
//! by the pipeline's test suite and for local development; semantics
//! follow the real store where they matter to the pipeline: `limit`
//! bounds items examined before filtering, `scanned_count` reports
//! items examined, and malformed expressions surface as
//! `ExpressionError` faults the way a server-side rejection would.

use crate::expr::{self, Condition};
use crate::{
    BatchGetItemInput, GetItemInput, Key, QueryInput, ScanInput, StoreClient, StoreError,
    StoreOutput, StoreResult,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tabletalk_core::{Item, TableSchema, TypedValue};

struct MemoryTable {
    schema: TableSchema,
    items: Vec<Item>,
}

/// Thread-safe in-memory store keyed by table name.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemoryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from its schema. Replaces any existing table of
    /// the same name.
    pub fn create_table(&self, schema: TableSchema) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(
            schema.table_name.clone(),
            MemoryTable {
                schema,
                items: Vec::new(),
            },
        );
    }

    /// Insert an item. The item must carry the table's key attributes.
    pub fn put_item(&self, table_name: &str, item: Item) -> StoreResult<()> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::resource_not_found(format!("table {table_name}")))?;

        for key_name in table.schema.required_key_names() {
            if !item.contains_key(key_name) {
                return Err(StoreError::expression(format!(
                    "Missing key attribute {key_name} in item"
                )));
            }
        }

        // Same primary key replaces the existing item.
        let key_names: Vec<String> = table
            .schema
            .required_key_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        table
            .items
            .retain(|existing| key_names.iter().any(|k| existing.get(k) != item.get(k)));
        table.items.push(item);
        Ok(())
    }

    fn with_table<T>(
        &self,
        table_name: &str,
        f: impl FnOnce(&MemoryTable) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(table_name)
            .ok_or_else(|| StoreError::resource_not_found(format!("table {table_name}")))?;
        f(table)
    }
}

fn parse_condition(expression: &str) -> StoreResult<Condition> {
    expr::parse(expression).map_err(|e| StoreError::expression(e.to_string()))
}

fn eval_condition(
    condition: &Condition,
    item: &Item,
    names: Option<&BTreeMap<String, String>>,
    values: &BTreeMap<String, TypedValue>,
) -> StoreResult<bool> {
    condition
        .eval(item, names, values)
        .map_err(|e| StoreError::expression(e.to_string()))
}

/// Apply a projection expression to an item, keeping only the named
/// attributes. `#placeholders` resolve through the names map.
fn project(
    item: &Item,
    projection: Option<&str>,
    names: Option<&BTreeMap<String, String>>,
) -> StoreResult<Item> {
    let Some(projection) = projection else {
        return Ok(item.clone());
    };
    let refs = expr::extract_refs(projection).map_err(|e| StoreError::expression(e.to_string()))?;

    let mut wanted: Vec<String> = refs.attribute_names;
    for placeholder in &refs.name_placeholders {
        let resolved = names
            .and_then(|m| m.get(placeholder))
            .ok_or_else(|| {
                StoreError::expression(format!("Name placeholder {placeholder} is not defined"))
            })?;
        wanted.push(resolved.clone());
    }

    Ok(item
        .iter()
        .filter(|(k, _)| wanted.iter().any(|w| w == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}

fn matches_key(item: &Item, key: &Key) -> bool {
    key.iter().all(|(k, v)| item.get(k) == Some(v))
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> StoreResult<StoreOutput> {
        self.with_table(&input.table_name, |table| {
            let found = table.items.iter().find(|item| matches_key(item, &input.key));
            match found {
                Some(item) => {
                    let item = project(
                        item,
                        input.projection_expression.as_deref(),
                        input.expression_attribute_names.as_ref(),
                    )?;
                    Ok(StoreOutput::new(vec![item], 1))
                }
                None => Ok(StoreOutput::new(Vec::new(), 0)),
            }
        })
    }

    async fn query(&self, input: QueryInput) -> StoreResult<StoreOutput> {
        self.with_table(&input.table_name, |table| {
            if let Some(index_name) = &input.index_name {
                if table.schema.index(index_name).is_none() {
                    return Err(StoreError::resource_not_found(format!(
                        "index {index_name} on table {}",
                        input.table_name
                    )));
                }
            }

            let key_condition = parse_condition(&input.key_condition_expression)?;
            let filter = input
                .filter_expression
                .as_deref()
                .map(parse_condition)
                .transpose()?;
            let names = input.expression_attribute_names.as_ref();
            let limit = input.limit.map(|l| l as usize).unwrap_or(usize::MAX);

            let mut scanned = 0usize;
            let mut items = Vec::new();
            for item in &table.items {
                if scanned >= limit {
                    break;
                }
                if !eval_condition(&key_condition, item, names, &input.expression_attribute_values)?
                {
                    continue;
                }
                // Limit bounds key-matched items examined, before filtering.
                scanned += 1;
                let passes = match &filter {
                    Some(filter) => {
                        eval_condition(filter, item, names, &input.expression_attribute_values)?
                    }
                    None => true,
                };
                if passes {
                    items.push(project(
                        item,
                        input.projection_expression.as_deref(),
                        names,
                    )?);
                }
            }
            Ok(StoreOutput::new(items, scanned))
        })
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<StoreOutput> {
        self.with_table(&input.table_name, |table| {
            if let Some(index_name) = &input.index_name {
                if table.schema.index(index_name).is_none() {
                    return Err(StoreError::resource_not_found(format!(
                        "index {index_name} on table {}",
                        input.table_name
                    )));
                }
            }

            let filter = input
                .filter_expression
                .as_deref()
                .map(parse_condition)
                .transpose()?;
            let names = input.expression_attribute_names.as_ref();
            let limit = input.limit.map(|l| l as usize).unwrap_or(usize::MAX);

            let mut scanned = 0usize;
            let mut items = Vec::new();
            for item in &table.items {
                if scanned >= limit {
                    break;
                }
                scanned += 1;
                let passes = match &filter {
                    Some(filter) => {
                        eval_condition(filter, item, names, &input.expression_attribute_values)?
                    }
                    None => true,
                };
                if passes {
                    items.push(project(
                        item,
                        input.projection_expression.as_deref(),
                        names,
                    )?);
                }
            }
            Ok(StoreOutput::new(items, scanned))
        })
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<StoreOutput> {
        self.with_table(&input.table_name, |table| {
            let mut items = Vec::new();
            let mut scanned = 0usize;
            for key in &input.keys {
                scanned += 1;
                if let Some(item) = table.items.iter().find(|item| matches_key(item, key)) {
                    items.push(project(
                        item,
                        input.projection_expression.as_deref(),
                        input.expression_attribute_names.as_ref(),
                    )?);
                }
            }
            Ok(StoreOutput::new(items, scanned))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tabletalk_core::{ExecutionErrorKind, IndexDescription, KeySchema, KeyType};

    fn orders_schema() -> TableSchema {
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
            attributes: vec![],
            indexes: vec![IndexDescription {
                index_name: "status-index".to_string(),
                partition_key: KeySchema {
                    name: "status".to_string(),
                    key_type: KeyType::String,
                },
                sort_key: None,
                description: String::new(),
            }],
        }
    }

    fn order(customer: &str, date: &str, total: i64, status: &str) -> Item {
        BTreeMap::from([
            ("customer_id".to_string(), TypedValue::string(customer)),
            ("order_date".to_string(), TypedValue::string(date)),
            ("total".to_string(), TypedValue::number(total)),
            ("status".to_string(), TypedValue::string(status)),
        ])
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table(orders_schema());
        store
            .put_item("Orders", order("12345", "2024-01-10", 250, "shipped"))
            .unwrap();
        store
            .put_item("Orders", order("12345", "2024-02-20", 90, "pending"))
            .unwrap();
        store
            .put_item("Orders", order("99999", "2024-03-05", 1200, "shipped"))
            .unwrap();
        store
    }

    fn query_input(key_condition: &str, values: &[(&str, TypedValue)]) -> QueryInput {
        QueryInput {
            table_name: "Orders".to_string(),
            index_name: None,
            key_condition_expression: key_condition.to_string(),
            filter_expression: None,
            projection_expression: None,
            expression_attribute_values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            expression_attribute_names: None,
            limit: None,
        }
    }

    #[tokio::test]
    async fn test_get_item_hit_and_miss() {
        let store = seeded_store();
        let hit = store
            .get_item(GetItemInput {
                table_name: "Orders".to_string(),
                key: BTreeMap::from([
                    ("customer_id".to_string(), TypedValue::string("12345")),
                    ("order_date".to_string(), TypedValue::string("2024-01-10")),
                ]),
                projection_expression: None,
                expression_attribute_names: None,
            })
            .await
            .unwrap();
        assert_eq!(hit.count, 1);

        let miss = store
            .get_item(GetItemInput {
                table_name: "Orders".to_string(),
                key: BTreeMap::from([
                    ("customer_id".to_string(), TypedValue::string("00000")),
                    ("order_date".to_string(), TypedValue::string("2024-01-10")),
                ]),
                projection_expression: None,
                expression_attribute_names: None,
            })
            .await
            .unwrap();
        assert_eq!(miss.count, 0);
    }

    #[tokio::test]
    async fn test_query_by_partition_key() {
        let store = seeded_store();
        let output = store
            .query(query_input(
                "customer_id = :cid",
                &[(":cid", TypedValue::string("12345"))],
            ))
            .await
            .unwrap();
        assert_eq!(output.count, 2);
        assert_eq!(output.scanned_count, 2);
    }

    #[tokio::test]
    async fn test_query_with_filter_counts_scanned() {
        let store = seeded_store();
        let mut input = query_input(
            "customer_id = :cid",
            &[
                (":cid", TypedValue::string("12345")),
                (":min", TypedValue::number(100)),
            ],
        );
        input.filter_expression = Some("total >= :min".to_string());
        let output = store.query(input).await.unwrap();
        assert_eq!(output.count, 1);
        assert_eq!(output.scanned_count, 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_resource_not_found() {
        let store = seeded_store();
        let err = store
            .query(QueryInput {
                table_name: "Nope".to_string(),
                ..query_input("a = :v", &[(":v", TypedValue::string("x"))])
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_missing_index_is_resource_not_found() {
        let store = seeded_store();
        let mut input = query_input(
            "status = :s",
            &[(":s", TypedValue::string("shipped"))],
        );
        input.index_name = Some("missing-index".to_string());
        let err = store.query(input).await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_malformed_expression_is_expression_error() {
        let store = seeded_store();
        let err = store
            .query(query_input("customer_id == = :cid", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ExpressionError);
    }

    #[tokio::test]
    async fn test_scan_with_filter_and_limit() {
        let store = seeded_store();
        let output = store
            .scan(ScanInput {
                table_name: "Orders".to_string(),
                index_name: None,
                filter_expression: Some("status = :s".to_string()),
                projection_expression: None,
                expression_attribute_values: BTreeMap::from([(
                    ":s".to_string(),
                    TypedValue::string("shipped"),
                )]),
                expression_attribute_names: None,
                limit: Some(2),
            })
            .await
            .unwrap();
        // Limit bounds items examined, not items returned.
        assert_eq!(output.scanned_count, 2);
        assert!(output.count <= 2);
    }

    #[tokio::test]
    async fn test_batch_get_returns_found_items_only() {
        let store = seeded_store();
        let output = store
            .batch_get_item(BatchGetItemInput {
                table_name: "Orders".to_string(),
                keys: vec![
                    BTreeMap::from([
                        ("customer_id".to_string(), TypedValue::string("12345")),
                        ("order_date".to_string(), TypedValue::string("2024-01-10")),
                    ]),
                    BTreeMap::from([
                        ("customer_id".to_string(), TypedValue::string("missing")),
                        ("order_date".to_string(), TypedValue::string("2024-01-10")),
                    ]),
                ],
                projection_expression: None,
                expression_attribute_names: None,
            })
            .await
            .unwrap();
        assert_eq!(output.count, 1);
        assert_eq!(output.scanned_count, 2);
    }

    #[tokio::test]
    async fn test_projection_keeps_only_named_attributes() {
        let store = seeded_store();
        let mut input = query_input(
            "customer_id = :cid",
            &[(":cid", TypedValue::string("12345"))],
        );
        input.projection_expression = Some("order_date, total".to_string());
        let output = store.query(input).await.unwrap();
        for item in &output.items {
            assert!(item.contains_key("order_date"));
            assert!(item.contains_key("total"));
            assert!(!item.contains_key("customer_id"));
            assert!(!item.contains_key("status"));
        }
    }

    #[tokio::test]
    async fn test_put_item_requires_key_attributes() {
        let store = seeded_store();
        let err = store
            .put_item(
                "Orders",
                BTreeMap::from([("customer_id".to_string(), TypedValue::string("1"))]),
            )
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ExpressionError);
    }

    #[tokio::test]
    async fn test_put_item_replaces_same_key() {
        let store = seeded_store();
        store
            .put_item("Orders", order("12345", "2024-01-10", 300, "returned"))
            .unwrap();
        let output = store
            .query(query_input(
                "customer_id = :cid",
                &[(":cid", TypedValue::string("12345"))],
            ))
            .await
            .unwrap();
        assert_eq!(output.count, 2);
    }
}
