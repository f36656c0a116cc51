use std::fmt;

use thiserror::Error;
use tracksmith_core::{
    field_value::FieldValue,
    model::EntityModel,
    operations::OperationBatch,
    record::{FieldMap, Identity},
};

use crate::error::StorageError;

/// A row as handed back by a store: field name to value.
pub type RawRecord = FieldMap;

/// Result of one operation in a batch. `Ok` carries the values now persisted
/// (`None` for deletes).
pub type OperationOutcome = Result<Option<FieldMap>, OperationFailure>;

/// Minimal retrieval request: an entity type plus field equality filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub entity: String,
    pub filters: Vec<(String, FieldValue)>,
}

impl Query {
    pub fn all(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn by_identity(model: &EntityModel, identity: &Identity) -> Self {
        let filters = model
            .key_fields
            .iter()
            .cloned()
            .zip(identity.key.iter().cloned())
            .collect();
        Self {
            entity: identity.entity.clone(),
            filters,
        }
    }

    pub fn filter_eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, fields: &FieldMap) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| fields.get(field).unwrap_or(&FieldValue::Null) == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A record with the same identity already exists.
    Conflict,
    NotFound,
    ConstraintViolation,
    /// Undone because another operation in the same atomic batch failed.
    RolledBack,
    /// Any other store-side failure, including batch-level I/O errors.
    Store,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::NotFound => "not found",
            Self::ConstraintViolation => "constraint violation",
            Self::RolledBack => "rolled back",
            Self::Store => "store failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation rejection reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rolled_back(cause: &Identity) -> Self {
        Self::new(
            FailureKind::RolledBack,
            format!("batch rolled back after failure of {cause}"),
        )
    }
}

/// The external store collaborator. Stores own persistence layout, key
/// uniqueness and referential integrity; the tracker only hands them batches.
pub trait Store {
    fn fetch(&self, query: &Query) -> Result<Vec<RawRecord>, StorageError>;

    /// Execute `batch` in order. Must return exactly one outcome per operation,
    /// in batch order. When `batch.atomic` is set and any operation fails,
    /// nothing may remain applied. A returned `Err` means no operation was
    /// acknowledged.
    fn execute(&mut self, batch: &OperationBatch) -> Result<Vec<OperationOutcome>, StorageError>;
}

/// Outcomes for an atomic batch that stopped at `failed_index`: everything
/// else is reported as rolled back.
pub fn rolled_back_outcomes(
    batch: &OperationBatch,
    failed_index: usize,
    failure: OperationFailure,
) -> Vec<OperationOutcome> {
    let cause = &batch.operations[failed_index].identity;
    (0..batch.len())
        .map(|i| {
            if i == failed_index {
                Err(failure.clone())
            } else {
                Err(OperationFailure::rolled_back(cause))
            }
        })
        .collect()
}
