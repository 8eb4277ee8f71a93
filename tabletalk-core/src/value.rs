//! Typed attribute values in the store's wire format.
//!
//! The store tags every attribute value with its type. `TypedValue`
//! mirrors those tags exactly so values round-trip losslessly between
//! the wire JSON, a query descriptor, and a result item. Numbers stay
//! string-encoded (the store's convention) so precision is never lost
//! in transit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A store attribute value, tagged with its wire type.
///
/// Serializes to the store's externally-tagged JSON form, e.g.
/// `{"S": "hello"}`, `{"N": "42"}`, `{"M": {"k": {"BOOL": true}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    /// String
    S(String),
    /// Number, string-encoded on the wire
    N(String),
    /// Boolean
    #[serde(rename = "BOOL")]
    Bool(bool),
    /// Binary, base64-encoded on the wire
    #[serde(with = "base64_bytes")]
    B(Vec<u8>),
    /// List of values
    L(Vec<TypedValue>),
    /// Map of attribute name to value
    M(BTreeMap<String, TypedValue>),
    /// String set
    SS(Vec<String>),
    /// Number set, string-encoded members
    NS(Vec<String>),
    /// Binary set, base64-encoded members
    #[serde(with = "base64_bytes_vec")]
    BS(Vec<Vec<u8>>),
    /// Explicit null (the wire form is `{"NULL": true}`)
    #[serde(rename = "NULL")]
    Null(bool),
}

impl TypedValue {
    /// Build a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::S(s.into())
    }

    /// Build a number value from anything displayable as a number.
    pub fn number(n: impl ToString) -> Self {
        Self::N(n.to_string())
    }

    /// The wire type tag for this value.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::Bool(_) => "BOOL",
            Self::B(_) => "B",
            Self::L(_) => "L",
            Self::M(_) => "M",
            Self::SS(_) => "SS",
            Self::NS(_) => "NS",
            Self::BS(_) => "BS",
            Self::Null(_) => "NULL",
        }
    }

    /// String content, if this is an `S` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Parsed numeric content, if this is an `N` value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// A human-readable rendering used when serializing result sets into
    /// synthesizer prompts. Scalar values render bare; composites render
    /// as compact JSON.
    pub fn display_text(&self) -> String {
        match self {
            Self::S(s) => s.clone(),
            Self::N(n) => n.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Null(_) => "null".to_string(),
            other => serde_json::to_string(other).unwrap_or_else(|_| format!("{:?}", other)),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_vec {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&STANDARD.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_wire_form() {
        let v = TypedValue::string("hello");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"S":"hello"}"#);
    }

    #[test]
    fn test_number_wire_form_is_string_encoded() {
        let v = TypedValue::number(42);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"N":"42"}"#);
    }

    #[test]
    fn test_bool_and_null_wire_forms() {
        assert_eq!(
            serde_json::to_string(&TypedValue::Bool(true)).unwrap(),
            r#"{"BOOL":true}"#
        );
        assert_eq!(
            serde_json::to_string(&TypedValue::Null(true)).unwrap(),
            r#"{"NULL":true}"#
        );
    }

    #[test]
    fn test_binary_is_base64_on_the_wire() {
        let v = TypedValue::B(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"B":"3q2+7w=="}"#);
        let back: TypedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_nested_map_roundtrip() {
        let mut inner = BTreeMap::new();
        inner.insert("name".to_string(), TypedValue::string("widget"));
        inner.insert("qty".to_string(), TypedValue::number(3));
        let v = TypedValue::L(vec![TypedValue::M(inner), TypedValue::Bool(false)]);

        let json = serde_json::to_string(&v).unwrap();
        let back: TypedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_as_number_parses_n() {
        assert_eq!(TypedValue::number(12.5).as_number(), Some(12.5));
        assert_eq!(TypedValue::string("12.5").as_number(), None);
    }

    #[test]
    fn test_display_text_scalars_render_bare() {
        assert_eq!(TypedValue::string("x").display_text(), "x");
        assert_eq!(TypedValue::number(7).display_text(), "7");
        assert_eq!(TypedValue::Bool(true).display_text(), "true");
        assert_eq!(TypedValue::Null(true).display_text(), "null");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
