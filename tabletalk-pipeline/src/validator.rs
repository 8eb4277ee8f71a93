//! Structural validation of generated query descriptors.
//!
//! Deterministic, schema-driven, and strictly ordered: the first
//! violated rule wins, so a correction prompt always talks about one
//! problem. A descriptor that passes here will not bounce off the store
//! with an expression or resource error; anything the store could
//! reject statically is rejected statically, before spending a call.

use tabletalk_core::{
    KeySchema, KeyType, QueryDescriptor, QueryOperation, SchemaDescription, TableSchema,
    TypedValue, ValidationError, ValidationRule,
};
use tabletalk_store::expr::{self, Comparator, Condition, Operand};
use tracing::debug;

/// Validates descriptors against the active schema snapshot.
///
/// Stateless; the schema is passed per call so a reload between
/// attempts is picked up naturally.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    /// Run every rule in order and return the first violation.
    pub fn validate(
        &self,
        descriptor: &QueryDescriptor,
        schema: &SchemaDescription,
    ) -> Result<(), ValidationError> {
        let table = self.check_table(descriptor, schema)?;
        self.check_index(descriptor, table)?;
        self.check_operation_shape(descriptor)?;
        let key_condition = self.check_expression_syntax(descriptor)?;

        match descriptor.operation {
            QueryOperation::Query => {
                self.check_key_condition(descriptor, table, key_condition)?;
            }
            QueryOperation::GetItem | QueryOperation::BatchGetItem => {
                self.check_key_bindings(descriptor, table)?;
            }
            QueryOperation::Scan => {}
        }

        self.check_placeholders(descriptor)?;
        self.check_limit(descriptor)?;

        debug!(
            operation = %descriptor.operation,
            table = %descriptor.table_name,
            "descriptor passed validation"
        );
        Ok(())
    }

    fn check_table<'a>(
        &self,
        descriptor: &QueryDescriptor,
        schema: &'a SchemaDescription,
    ) -> Result<&'a TableSchema, ValidationError> {
        schema.table(&descriptor.table_name).ok_or_else(|| {
            let known: Vec<&str> = schema
                .tables
                .iter()
                .map(|t| t.table_name.as_str())
                .collect();
            ValidationError::new(
                ValidationRule::TableExists,
                format!(
                    "Table '{}' is not in the schema; known tables: {}",
                    descriptor.table_name,
                    known.join(", ")
                ),
            )
        })
    }

    fn check_index(
        &self,
        descriptor: &QueryDescriptor,
        table: &TableSchema,
    ) -> Result<(), ValidationError> {
        let Some(index_name) = &descriptor.index_name else {
            return Ok(());
        };
        if table.index(index_name).is_none() {
            let known: Vec<&str> = table.indexes.iter().map(|i| i.index_name.as_str()).collect();
            return Err(ValidationError::new(
                ValidationRule::IndexExists,
                format!(
                    "Index '{index_name}' does not exist on table '{}'; known indexes: {}",
                    table.table_name,
                    if known.is_empty() {
                        "(none)".to_string()
                    } else {
                        known.join(", ")
                    }
                ),
            ));
        }
        Ok(())
    }

    fn check_operation_shape(&self, descriptor: &QueryDescriptor) -> Result<(), ValidationError> {
        match descriptor.operation {
            QueryOperation::Query => Ok(()),
            QueryOperation::Scan => {
                if descriptor.key_condition_expression.is_some() {
                    return Err(ValidationError::new(
                        ValidationRule::OperationSupported,
                        "Scan does not take a key_condition_expression; use Query for key-based access",
                    ));
                }
                Ok(())
            }
            QueryOperation::GetItem | QueryOperation::BatchGetItem => {
                if descriptor.index_name.is_some() {
                    return Err(ValidationError::new(
                        ValidationRule::OperationSupported,
                        format!(
                            "{} reads from the table's primary key and cannot target an index",
                            descriptor.operation
                        ),
                    ));
                }
                if descriptor.key_condition_expression.is_some() {
                    return Err(ValidationError::new(
                        ValidationRule::OperationSupported,
                        format!(
                            "{} binds keys in expression_attribute_values, not a key_condition_expression",
                            descriptor.operation
                        ),
                    ));
                }
                if descriptor.filter_expression.is_some() {
                    return Err(ValidationError::new(
                        ValidationRule::OperationSupported,
                        format!("{} does not support a filter_expression", descriptor.operation),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Parse every expression up front. Returns the parsed key condition
    /// so the key-usage rules don't parse twice.
    fn check_expression_syntax(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Result<Option<Condition>, ValidationError> {
        let key_condition = match &descriptor.key_condition_expression {
            Some(text) => Some(expr::parse(text).map_err(|e| {
                ValidationError::new(
                    ValidationRule::ExpressionSyntax,
                    format!("key_condition_expression is malformed: {e}"),
                )
            })?),
            None => None,
        };

        if let Some(text) = &descriptor.filter_expression {
            expr::parse(text).map_err(|e| {
                ValidationError::new(
                    ValidationRule::ExpressionSyntax,
                    format!("filter_expression is malformed: {e}"),
                )
            })?;
        }

        if let Some(text) = &descriptor.projection_expression {
            expr::extract_refs(text).map_err(|e| {
                ValidationError::new(
                    ValidationRule::ExpressionSyntax,
                    format!("projection_expression is malformed: {e}"),
                )
            })?;
        }

        Ok(key_condition)
    }

    fn check_key_condition(
        &self,
        descriptor: &QueryDescriptor,
        table: &TableSchema,
        key_condition: Option<Condition>,
    ) -> Result<(), ValidationError> {
        let condition = key_condition.ok_or_else(|| {
            ValidationError::new(
                ValidationRule::KeyConditionRequired,
                "Query requires a key_condition_expression",
            )
        })?;

        // Effective keys come from the targeted index when one is named.
        let (partition_key, sort_key) = effective_keys(descriptor, table)?;

        let mut clauses = Vec::new();
        flatten_key_clauses(&condition, &mut clauses)?;

        let mut partition_bound = false;
        for clause in clauses {
            let (operand, usage) = match clause {
                Condition::Compare {
                    operand,
                    comparator,
                    value,
                } => (operand, KeyUsage::Compare(*comparator, value)),
                Condition::Between { operand, low, high } => {
                    (operand, KeyUsage::Between(low, high))
                }
                Condition::BeginsWith { operand, value } => {
                    (operand, KeyUsage::BeginsWith(value))
                }
                Condition::Contains { .. } => {
                    return Err(ValidationError::new(
                        ValidationRule::KeyConditionAttributes,
                        "contains() is not allowed in a key condition; move it to filter_expression",
                    ));
                }
                Condition::And(..) | Condition::Or(..) => unreachable!("flattened above"),
            };

            let attr = resolve_operand(descriptor, operand)?;

            if attr == partition_key.name {
                match usage {
                    KeyUsage::Compare(Comparator::Eq, value) => {
                        partition_bound = true;
                        self.check_key_value(descriptor, partition_key, value)?;
                    }
                    _ => {
                        return Err(ValidationError::new(
                            ValidationRule::KeyConditionAttributes,
                            format!(
                                "Partition key '{}' must use an equality condition",
                                partition_key.name
                            ),
                        ));
                    }
                }
            } else if let Some(sk) = sort_key.filter(|sk| attr == sk.name) {
                match usage {
                    KeyUsage::Compare(_, value) | KeyUsage::BeginsWith(value) => {
                        self.check_key_value(descriptor, sk, value)?;
                    }
                    KeyUsage::Between(low, high) => {
                        self.check_key_value(descriptor, sk, low)?;
                        self.check_key_value(descriptor, sk, high)?;
                    }
                }
            } else {
                return Err(ValidationError::new(
                    ValidationRule::KeyConditionAttributes,
                    format!(
                        "'{attr}' is not a key attribute of this {}; key conditions may only reference the partition and sort key",
                        if descriptor.index_name.is_some() { "index" } else { "table" }
                    ),
                ));
            }
        }

        if !partition_bound {
            return Err(ValidationError::new(
                ValidationRule::KeyConditionAttributes,
                format!(
                    "Key condition must constrain partition key '{}' with equality",
                    partition_key.name
                ),
            ));
        }

        Ok(())
    }

    /// A bound key value must exist and carry the key's declared type.
    /// Absent bindings are left for the global placeholder rule so its
    /// message names the placeholder.
    fn check_key_value(
        &self,
        descriptor: &QueryDescriptor,
        key: &KeySchema,
        placeholder: &str,
    ) -> Result<(), ValidationError> {
        let Some(value) = descriptor.value_binding(placeholder) else {
            return Ok(());
        };
        let expected = key_type_tag(key.key_type);
        if value.type_tag() != expected {
            return Err(ValidationError::new(
                ValidationRule::KeyValueType,
                format!(
                    "Key '{}' is declared {} ({expected}) but {placeholder} is bound to a {} value",
                    key.name,
                    key.key_type.as_str(),
                    value.type_tag()
                ),
            ));
        }
        Ok(())
    }

    /// GetItem/BatchGetItem must bind every primary-key attribute in
    /// `expression_attribute_values`, either under the bare attribute
    /// name or under `:name`, and nothing else. An extra binding would
    /// otherwise flow into the lookup key and silently miss the item.
    fn check_key_bindings(
        &self,
        descriptor: &QueryDescriptor,
        table: &TableSchema,
    ) -> Result<(), ValidationError> {
        if let Some(bindings) = &descriptor.expression_attribute_values {
            for name in bindings.keys() {
                let bare = name.strip_prefix(':').unwrap_or(name);
                if !primary_keys(table).iter().any(|k| k.name == bare) {
                    return Err(ValidationError::new(
                        ValidationRule::KeyAttributesBound,
                        format!(
                            "'{name}' does not name a key attribute of table '{}'; {} binds exactly the primary key",
                            table.table_name, descriptor.operation
                        ),
                    ));
                }
            }
        }
        for key in primary_keys(table) {
            let Some(value) = bound_key_value(descriptor, &key.name) else {
                return Err(ValidationError::new(
                    ValidationRule::KeyAttributesBound,
                    format!(
                        "{} requires key attribute '{}' bound in expression_attribute_values",
                        descriptor.operation, key.name
                    ),
                ));
            };

            let expected = key_type_tag(key.key_type);
            match value {
                // BatchGetItem accepts a list of key values; each entry
                // must still carry the key's type.
                TypedValue::L(entries) if descriptor.operation == QueryOperation::BatchGetItem => {
                    if entries.is_empty() {
                        return Err(ValidationError::new(
                            ValidationRule::KeyAttributesBound,
                            format!("Key attribute '{}' is bound to an empty list", key.name),
                        ));
                    }
                    for entry in entries {
                        if entry.type_tag() != expected {
                            return Err(ValidationError::new(
                                ValidationRule::KeyValueType,
                                format!(
                                    "Key '{}' is declared {} ({expected}) but the bound list contains a {} value",
                                    key.name,
                                    key.key_type.as_str(),
                                    entry.type_tag()
                                ),
                            ));
                        }
                    }
                }
                scalar => {
                    if scalar.type_tag() != expected {
                        return Err(ValidationError::new(
                            ValidationRule::KeyValueType,
                            format!(
                                "Key '{}' is declared {} ({expected}) but is bound to a {} value",
                                key.name,
                                key.key_type.as_str(),
                                scalar.type_tag()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Every `#name` in any expression must be mapped, and every
    /// `:value` in a condition expression must be bound.
    fn check_placeholders(&self, descriptor: &QueryDescriptor) -> Result<(), ValidationError> {
        for expression in descriptor.expressions() {
            // Syntax was already checked; refs cannot fail here, but the
            // error path stays honest rather than unwrapping.
            let refs = expr::extract_refs(expression).map_err(|e| {
                ValidationError::new(
                    ValidationRule::ExpressionSyntax,
                    format!("expression is malformed: {e}"),
                )
            })?;

            for placeholder in &refs.name_placeholders {
                if descriptor.name_binding(placeholder).is_none() {
                    return Err(ValidationError::new(
                        ValidationRule::NamePlaceholdersResolved,
                        format!(
                            "{placeholder} is used in '{expression}' but missing from expression_attribute_names"
                        ),
                    ));
                }
            }
            for placeholder in &refs.value_placeholders {
                if descriptor.value_binding(placeholder).is_none() {
                    return Err(ValidationError::new(
                        ValidationRule::ValuePlaceholdersResolved,
                        format!(
                            "{placeholder} is used in '{expression}' but missing from expression_attribute_values"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_limit(&self, descriptor: &QueryDescriptor) -> Result<(), ValidationError> {
        if descriptor.limit == Some(0) {
            return Err(ValidationError::new(
                ValidationRule::PositiveLimit,
                "limit must be a positive integer",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// KEY RESOLUTION HELPERS
// ============================================================================

enum KeyUsage<'a> {
    Compare(Comparator, &'a str),
    Between(&'a str, &'a str),
    BeginsWith(&'a str),
}

/// The partition/sort keys a Query is addressed against: the index's
/// when an index is named, the table's otherwise.
fn effective_keys<'a>(
    descriptor: &QueryDescriptor,
    table: &'a TableSchema,
) -> Result<(&'a KeySchema, Option<&'a KeySchema>), ValidationError> {
    match &descriptor.index_name {
        Some(index_name) => {
            let index = table.index(index_name).ok_or_else(|| {
                let known: Vec<&str> =
                    table.indexes.iter().map(|i| i.index_name.as_str()).collect();
                ValidationError::new(
                    ValidationRule::IndexExists,
                    format!(
                        "Index '{index_name}' does not exist on table '{}'; known indexes: {}",
                        table.table_name,
                        if known.is_empty() {
                            "(none)".to_string()
                        } else {
                            known.join(", ")
                        }
                    ),
                )
            })?;
            Ok((&index.partition_key, index.sort_key.as_ref()))
        }
        None => Ok((&table.partition_key, table.sort_key.as_ref())),
    }
}

fn primary_keys(table: &TableSchema) -> Vec<&KeySchema> {
    let mut keys = vec![&table.partition_key];
    if let Some(sk) = &table.sort_key {
        keys.push(sk);
    }
    keys
}

/// Key values for targeted lookups may be bound under the bare
/// attribute name or the conventional `:name` spelling.
fn bound_key_value<'a>(
    descriptor: &'a QueryDescriptor,
    key_name: &str,
) -> Option<&'a TypedValue> {
    let values = descriptor.expression_attribute_values.as_ref()?;
    values
        .get(&format!(":{key_name}"))
        .or_else(|| values.get(key_name))
}

fn resolve_operand<'a>(
    descriptor: &'a QueryDescriptor,
    operand: &'a Operand,
) -> Result<&'a str, ValidationError> {
    match operand {
        Operand::Name(name) => Ok(name),
        Operand::Placeholder(placeholder) => {
            descriptor.name_binding(placeholder).ok_or_else(|| {
                ValidationError::new(
                    ValidationRule::NamePlaceholdersResolved,
                    format!(
                        "{placeholder} is used in the key condition but missing from expression_attribute_names"
                    ),
                )
            })
        }
    }
}

/// Key conditions are a conjunction of simple clauses; OR has no
/// meaning against a key range.
fn flatten_key_clauses<'a>(
    condition: &'a Condition,
    out: &mut Vec<&'a Condition>,
) -> Result<(), ValidationError> {
    match condition {
        Condition::And(left, right) => {
            flatten_key_clauses(left, out)?;
            flatten_key_clauses(right, out)
        }
        Condition::Or(..) => Err(ValidationError::new(
            ValidationRule::KeyConditionAttributes,
            "OR is not allowed in a key condition",
        )),
        other => {
            out.push(other);
            Ok(())
        }
    }
}

fn key_type_tag(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::String => "S",
        KeyType::Number => "N",
        KeyType::Binary => "B",
    }
}

// ============================================================================
// TESTS
// ============================================================================
