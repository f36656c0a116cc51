use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;

/// Field name to value, ordered so encodings and diffs are deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// The stable key distinguishing one record from another: entity type plus
/// the values of its key fields, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub entity: String,
    pub key: Vec<FieldValue>,
}

impl Identity {
    pub fn new(entity: impl Into<String>, key: Vec<FieldValue>) -> Self {
        Self {
            entity: entity.into(),
            key,
        }
    }

    /// Single-field key shorthand.
    pub fn of(entity: impl Into<String>, key: impl Into<FieldValue>) -> Self {
        Self::new(entity, vec![key.into()])
    }

    pub fn is_complete(&self) -> bool {
        !self.key.is_empty() && self.key.iter().all(|v| !v.is_null())
    }

    pub fn key_to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(&self.key).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn key_from_msgpack(entity: &str, bytes: &[u8]) -> Result<Self, CoreError> {
        let key: Vec<FieldValue> =
            rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self::new(entity, key))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.entity)?;
        for (i, part) in self.key.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

/// An application-level value: an entity type name and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub entity: String,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: FieldMap::new(),
        }
    }

    pub fn from_fields(entity: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            entity: entity.into(),
            fields,
        }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Values of `fields` in order; a missing field reads as `Null`.
    pub fn values_of(&self, fields: &[String]) -> Vec<FieldValue> {
        fields
            .iter()
            .map(|f| self.fields.get(f).cloned().unwrap_or(FieldValue::Null))
            .collect()
    }

    pub fn fields_to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(&self.fields).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn fields_from_msgpack(bytes: &[u8]) -> Result<FieldMap, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_lists_key_parts() {
        let id = Identity::new("Line", vec![FieldValue::Integer(4), "b".into()]);
        assert_eq!(id.to_string(), "Line(4, \"b\")");
    }

    #[test]
    fn null_key_part_is_incomplete() {
        assert!(Identity::of("Author", 1).is_complete());
        assert!(!Identity::new("Author", vec![FieldValue::Null]).is_complete());
        assert!(!Identity::new("Author", vec![]).is_complete());
    }

    #[test]
    fn missing_fields_read_as_null() {
        let record = Record::new("Post").with("id", 9);
        let values = record.values_of(&["id".to_string(), "author_id".to_string()]);
        assert_eq!(values, vec![FieldValue::Integer(9), FieldValue::Null]);
    }

    #[test]
    fn key_msgpack_roundtrip() {
        let id = Identity::new("Line", vec![FieldValue::Integer(4), "b".into()]);
        let bytes = id.key_to_msgpack().unwrap();
        assert_eq!(Identity::key_from_msgpack("Line", &bytes).unwrap(), id);
    }
}
