use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::record::{Identity, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStrategy {
    /// The application supplies every key field.
    Assigned,
    /// A single key field filled with a UUIDv7 when a new record is added without one.
    Generated,
}

/// A declared foreign-key relationship: `fields` on the referencing record
/// hold the key values of a `target` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub fields: Vec<String>,
    pub target: String,
    pub required: bool,
}

impl Reference {
    /// Identity this reference points at, or `None` when any FK component is null.
    pub fn target_identity(&self, record: &Record) -> Option<Identity> {
        let key = record.values_of(&self.fields);
        let id = Identity::new(self.target.clone(), key);
        id.is_complete().then_some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
    pub name: String,
    pub key_fields: Vec<String>,
    pub key_strategy: KeyStrategy,
    pub references: Vec<Reference>,
}

impl EntityModel {
    pub fn new(name: &str, key_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_fields: key_fields.iter().map(|f| f.to_string()).collect(),
            key_strategy: KeyStrategy::Assigned,
            references: Vec::new(),
        }
    }

    pub fn generated_key(mut self) -> Self {
        self.key_strategy = KeyStrategy::Generated;
        self
    }

    /// Declare a required reference.
    pub fn references(self, name: &str, fields: &[&str], target: &str) -> Self {
        self.reference(name, fields, target, true)
    }

    pub fn optional_reference(self, name: &str, fields: &[&str], target: &str) -> Self {
        self.reference(name, fields, target, false)
    }

    fn reference(mut self, name: &str, fields: &[&str], target: &str, required: bool) -> Self {
        self.references.push(Reference {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            target: target.to_string(),
            required,
        });
        self
    }

    pub fn is_key_field(&self, field: &str) -> bool {
        self.key_fields.iter().any(|k| k == field)
    }

    pub fn required_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(|r| r.required)
    }

    /// Extract the identity of `record`. Every key field must be present and non-null.
    pub fn identity_of(&self, record: &Record) -> Result<Identity, CoreError> {
        let mut key = Vec::with_capacity(self.key_fields.len());
        for field in &self.key_fields {
            match record.get(field) {
                None => {
                    return Err(CoreError::MissingKeyField {
                        entity: self.name.clone(),
                        field: field.clone(),
                    });
                }
                Some(FieldValue::Null) => return Err(CoreError::IncompleteKey(self.name.clone())),
                Some(value) => key.push(value.clone()),
            }
        }
        Ok(Identity::new(self.name.clone(), key))
    }
}

/// Registry of entity types known to a tracker or store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    entities: BTreeMap<String, EntityModel>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity: EntityModel) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn get(&self, name: &str) -> Result<&EntityModel, CoreError> {
        self.entities
            .get(name)
            .ok_or_else(|| CoreError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    pub fn identity_of(&self, record: &Record) -> Result<Identity, CoreError> {
        self.get(&record.entity)?.identity_of(record)
    }
}
