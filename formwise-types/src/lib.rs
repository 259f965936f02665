//! Shared types for formwise
//!
//! This crate provides the identifiers and value types used across the
//! formwise workspace: field, page and job identifiers, the dynamic field
//! value representation, and change records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic field value.
///
/// Field values are schemaless JSON values; the field's type tag decides
/// how validators interpret them.
pub type Value = serde_json::Value;

/// Snapshot of all field values keyed by field id.
pub type Values = BTreeMap<FieldId, Value>;

/// Field identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub String);

impl FieldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(id: &str) -> Self {
        FieldId(id.to_string())
    }
}

impl From<String> for FieldId {
    fn from(id: String) -> Self {
        FieldId(id)
    }
}

impl std::borrow::Borrow<str> for FieldId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Page identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        PageId(id.to_string())
    }
}

/// Background job identifier, assigned by the bulk-suggest collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        JobId(id.to_string())
    }
}

/// Who produced a value write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Typed or picked by the person filling the form
    User,
    /// Taken from a machine suggestion
    Suggested,
    /// Written by the host application (defaults, imports, restores)
    System,
}

/// A field whose value differs from the last saved (or initial) snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field_id: FieldId,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub source: ValueSource,
}

/// Whether a value counts as "empty" for required checks and suggestion triggers.
///
/// Null, the empty string, whitespace-only strings and empty arrays/objects are empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_id_serializes_as_plain_string() {
        let id = FieldId::new("email");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"email\"");
        assert_eq!(id.to_string(), "email");
    }

    #[test]
    fn test_values_lookup_by_str() {
        let mut values = Values::new();
        values.insert(FieldId::new("name"), json!("Jane"));
        assert_eq!(values.get("name"), Some(&json!("Jane")));
    }

    #[test]
    fn test_empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!("   ")));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("x")));
    }
}
