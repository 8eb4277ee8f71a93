//! End-to-end pipeline tests over the in-memory store and a scripted
//! model: the full generate, validate, execute, synthesize path,
//! including self-correction and conversation threading.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tabletalk_core::{
    AttributeSchema, AttributeType, Item, KeySchema, KeyType, PipelineConfig, SchemaDescription,
    TableSchema, TurnRole, TypedValue, UpstreamRetryConfig,
};
use tabletalk_llm::MockCompletionProvider;
use tabletalk_pipeline::{
    AnswerSynthesizer, ChatRequest, LlmQueryGenerator, Orchestrator, QueryExecutor, SchemaRegistry,
};
use tabletalk_store::MemoryStore;

fn orders_table() -> TableSchema {
    TableSchema {
        table_name: "Orders".to_string(),
        description: "Customer orders".to_string(),
        partition_key: KeySchema {
            name: "customer_id".to_string(),
            key_type: KeyType::String,
        },
        sort_key: Some(KeySchema {
            name: "order_date".to_string(),
            key_type: KeyType::String,
        }),
        attributes: vec![
            AttributeSchema {
                name: "total".to_string(),
                attr_type: AttributeType::Number,
                description: "Order total in cents".to_string(),
            },
            AttributeSchema {
                name: "status".to_string(),
                attr_type: AttributeType::String,
                description: "Fulfilment status".to_string(),
            },
        ],
        indexes: vec![],
    }
}

fn item(pairs: &[(&str, TypedValue)]) -> Item {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.create_table(orders_table());
    for (cid, date, total, status) in [
        ("12345", "2024-03-01", 1500, "shipped"),
        ("12345", "2024-03-15", 2250, "pending"),
        ("12345", "2024-04-02", 980, "shipped"),
        ("99999", "2024-02-10", 400, "shipped"),
    ] {
        store
            .put_item(
                "Orders",
                item(&[
                    ("customer_id", TypedValue::string(cid)),
                    ("order_date", TypedValue::string(date)),
                    ("total", TypedValue::number(total)),
                    ("status", TypedValue::string(status)),
                ]),
            )
            .unwrap();
    }
    store
}

fn orchestrator_with(mock: Arc<MockCompletionProvider>) -> Orchestrator {
    let config = PipelineConfig {
        upstream_retry: UpstreamRetryConfig {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        },
        ..PipelineConfig::default()
    };
    let schema = SchemaDescription {
        tables: vec![orders_table()],
    };
    Orchestrator::new(
        Arc::new(LlmQueryGenerator::new(mock.clone(), &config)),
        QueryExecutor::new(Arc::new(seeded_store())),
        AnswerSynthesizer::new(mock, &config),
        Arc::new(SchemaRegistry::new(schema).unwrap()),
        config,
    )
}

fn customer_query(cid: &str) -> String {
    serde_json::json!({
        "operation": "Query",
        "table_name": "Orders",
        "key_condition_expression": "customer_id = :cid",
        "expression_attribute_values": {":cid": {"S": cid}}
    })
    .to_string()
}

#[tokio::test]
async fn customer_orders_question_is_answered_from_store_data() {
    let mock = Arc::new(MockCompletionProvider::new());
    mock.push_response(customer_query("12345"));
    mock.push_response("Customer 12345 has three orders: $15.00, $22.50 and $9.80.");
    let orchestrator = orchestrator_with(mock.clone());

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "What orders does customer 12345 have?".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response.raw_result.as_ref().unwrap().count, 3);
    assert!(response.answer.contains("three orders"));

    // The synthesis prompt carried the actual store items.
    let synthesis_prompt = &mock.recorded_requests()[1].messages[0].content;
    assert!(synthesis_prompt.contains("3 matching items"));
    assert!(synthesis_prompt.contains("2024-03-15"));
    assert!(synthesis_prompt.contains(r#""N":"2250""#));
}

#[tokio::test]
async fn n_messages_leave_exactly_two_n_turns() {
    let mock = Arc::new(MockCompletionProvider::new());
    for _ in 0..3 {
        mock.push_response(customer_query("12345"));
        mock.push_response("Some answer.");
    }
    let orchestrator = orchestrator_with(mock);

    let first = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "orders for 12345?".to_string(),
        })
        .await
        .unwrap();
    let id = first.conversation_id;

    for message in ["what about totals?", "and statuses?"] {
        orchestrator
            .chat(ChatRequest {
                conversation_id: Some(id),
                message: message.to_string(),
            })
            .await
            .unwrap();
    }

    let conversation = orchestrator.conversation(id).unwrap();
    assert_eq!(conversation.turns.len(), 6);
    for pair in conversation.turns.chunks(2) {
        assert_eq!(pair[0].role, TurnRole::User);
        assert_eq!(pair[1].role, TurnRole::Assistant);
    }
}

#[tokio::test]
async fn correction_prompt_contains_failed_descriptor_and_error() {
    let mock = Arc::new(MockCompletionProvider::new());
    // First attempt queries a non-key attribute; second is corrected.
    let bad = serde_json::json!({
        "operation": "Query",
        "table_name": "Orders",
        "key_condition_expression": "total > :min",
        "expression_attribute_values": {":min": {"N": "100"}}
    })
    .to_string();
    mock.push_response(bad.clone());
    mock.push_response(customer_query("12345"));
    mock.push_response("Three orders.");
    let orchestrator = orchestrator_with(mock.clone());

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "big orders for 12345?".to_string(),
        })
        .await
        .unwrap();

    assert!(response.error_detail.is_none());
    assert_eq!(response.answer, "Three orders.");

    let retry_prompt = &mock.recorded_requests()[1].messages[0].content;
    assert!(retry_prompt.contains("previous query attempt failed"));
    assert!(retry_prompt.contains("total > :min"));
    assert!(retry_prompt.contains("not a key attribute"));
}

#[tokio::test]
async fn exhausted_budget_returns_answer_and_error_detail() {
    let mock = Arc::new(MockCompletionProvider::new());
    for _ in 0..3 {
        mock.push_response("I don't know how to query that.");
    }
    let orchestrator = orchestrator_with(mock.clone());

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "orders for 12345?".to_string(),
        })
        .await
        .unwrap();

    assert!(!response.answer.is_empty());
    let detail = response.error_detail.unwrap();
    assert_eq!(detail.stage, "generation");
    assert!(response.raw_result.is_none());
    // Exactly max_attempts generation calls, no synthesis call.
    assert_eq!(mock.call_count(), 3);
    // The failed exchange still counts as a turn pair.
    assert_eq!(response.history.len(), 2);
}

#[tokio::test]
async fn zero_item_result_answers_without_calling_model() {
    let mock = Arc::new(MockCompletionProvider::new());
    mock.push_response(customer_query("00000"));
    let orchestrator = orchestrator_with(mock.clone());

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "orders for customer 00000?".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response.raw_result.unwrap().count, 0);
    assert!(response.answer.contains("no matching records"));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn execution_failure_feeds_raw_store_error_back() {
    let mock = Arc::new(MockCompletionProvider::new());
    // Schema/store mismatch: the registry knows "Archive" but the store
    // does not, so validation passes and the store call faults.
    let archive = serde_json::json!({
        "operation": "Scan",
        "table_name": "Archive"
    })
    .to_string();
    mock.push_response(archive);
    mock.push_response(customer_query("12345"));
    mock.push_response("Three orders.");

    let config = PipelineConfig {
        upstream_retry: UpstreamRetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        },
        ..PipelineConfig::default()
    };
    let schema = SchemaDescription {
        tables: vec![
            orders_table(),
            TableSchema {
                table_name: "Archive".to_string(),
                description: String::new(),
                partition_key: KeySchema {
                    name: "id".to_string(),
                    key_type: KeyType::String,
                },
                sort_key: None,
                attributes: vec![],
                indexes: vec![],
            },
        ],
    };
    let orchestrator = Orchestrator::new(
        Arc::new(LlmQueryGenerator::new(mock.clone(), &config)),
        QueryExecutor::new(Arc::new(seeded_store())),
        AnswerSynthesizer::new(mock.clone(), &config),
        Arc::new(SchemaRegistry::new(schema).unwrap()),
        config,
    );

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "anything archived?".to_string(),
        })
        .await
        .unwrap();

    // The store fault was fed back and the second attempt succeeded.
    assert_eq!(response.answer, "Three orders.");
    let retry_prompt = &mock.recorded_requests()[1].messages[0].content;
    assert!(retry_prompt.contains("resource_not_found"));
    assert!(retry_prompt.contains("Archive"));
}

#[tokio::test]
async fn failure_answer_keeps_store_diagnostics_in_error_detail() {
    let mock = Arc::new(MockCompletionProvider::new());
    // Every attempt scans a table the registry knows but the store
    // lacks, so the budget exhausts on execution faults.
    let archive = serde_json::json!({
        "operation": "Scan",
        "table_name": "Archive"
    })
    .to_string();
    for _ in 0..3 {
        mock.push_response(archive.clone());
    }

    let config = PipelineConfig {
        upstream_retry: UpstreamRetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        },
        ..PipelineConfig::default()
    };
    let schema = SchemaDescription {
        tables: vec![
            orders_table(),
            TableSchema {
                table_name: "Archive".to_string(),
                description: String::new(),
                partition_key: KeySchema {
                    name: "id".to_string(),
                    key_type: KeyType::String,
                },
                sort_key: None,
                attributes: vec![],
                indexes: vec![],
            },
        ],
    };
    let orchestrator = Orchestrator::new(
        Arc::new(LlmQueryGenerator::new(mock.clone(), &config)),
        QueryExecutor::new(Arc::new(seeded_store())),
        AnswerSynthesizer::new(mock.clone(), &config),
        Arc::new(SchemaRegistry::new(schema).unwrap()),
        config,
    );

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "anything archived?".to_string(),
        })
        .await
        .unwrap();

    // The diagnostic surfaces in error_detail only; the answer stays
    // free of store error text.
    let detail = response.error_detail.unwrap();
    assert_eq!(detail.stage, "execution");
    assert!(detail.message.contains("not found"));
    assert!(!response.answer.is_empty());
    assert!(!response.answer.to_lowercase().contains("not found"));
    assert!(!response.answer.contains("Archive"));
}

#[tokio::test]
async fn conversation_fetch_and_delete() {
    let mock = Arc::new(MockCompletionProvider::new());
    mock.push_response(customer_query("12345"));
    mock.push_response("Three orders.");
    let orchestrator = orchestrator_with(mock);

    let response = orchestrator
        .chat(ChatRequest {
            conversation_id: None,
            message: "orders for 12345?".to_string(),
        })
        .await
        .unwrap();
    let id = response.conversation_id;

    let conversation = orchestrator.conversation(id).unwrap();
    assert_eq!(conversation.id, id);
    assert_eq!(conversation.turns.len(), 2);
    assert!(conversation.turns[0].timestamp <= conversation.turns[1].timestamp);

    orchestrator.delete_conversation(id).unwrap();
    assert!(orchestrator.conversation(id).is_err());
}
