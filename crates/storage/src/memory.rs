use std::collections::HashMap;

use tracing::debug;
use tracksmith_core::{
    model::Model,
    operations::{OperationBatch, OperationKind, PendingOperation},
    record::{FieldMap, Identity},
};

use crate::error::StorageError;
use crate::traits::{
    rolled_back_outcomes, FailureKind, OperationFailure, OperationOutcome, Query, RawRecord, Store,
};

/// In-process store holding rows in a map. Enforces the same rules as
/// [`SqliteStore`](crate::SqliteStore): unique identities, existing targets
/// for required references, and no deletes of referenced rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    model: Model,
    rows: HashMap<Identity, Row>,
    next_seq: u64,
    batches: u64,
}

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    fields: FieldMap,
}

impl MemoryStore {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn get(&self, identity: &Identity) -> Option<&FieldMap> {
        self.rows.get(identity).map(|row| &row.fields)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn batch_count(&self) -> u64 {
        self.batches
    }

    fn referrer_of(&self, target: &Identity) -> Option<&Identity> {
        self.rows.iter().find_map(|(identity, row)| {
            let entity = self.model.get(&identity.entity).ok()?;
            let record = tracksmith_core::Record::from_fields(identity.entity.clone(), row.fields.clone());
            entity
                .required_references()
                .any(|r| r.target_identity(&record).as_ref() == Some(target))
                .then_some(identity)
        })
    }

    fn check_refs(&self, op: &PendingOperation) -> Result<(), OperationFailure> {
        let entity = self
            .model
            .get(&op.identity.entity)
            .map_err(|e| OperationFailure::new(FailureKind::Store, e.to_string()))?;
        let record = op.record();
        for reference in entity.required_references() {
            match reference.target_identity(&record) {
                Some(target) if self.rows.contains_key(&target) => {}
                Some(target) => {
                    return Err(OperationFailure::new(
                        FailureKind::ConstraintViolation,
                        format!("required reference {} points at missing {target}", reference.name),
                    ));
                }
                None => {
                    return Err(OperationFailure::new(
                        FailureKind::ConstraintViolation,
                        format!("required reference {} of {} is null", reference.name, entity.name),
                    ));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: &PendingOperation) -> OperationOutcome {
        let exists = self.rows.contains_key(&op.identity);
        match op.kind {
            OperationKind::Insert => {
                if exists {
                    return Err(OperationFailure::new(
                        FailureKind::Conflict,
                        format!("{} already exists", op.identity),
                    ));
                }
                self.check_refs(op)?;
                let seq = self.next_seq;
                self.next_seq += 1;
                self.rows.insert(
                    op.identity.clone(),
                    Row {
                        seq,
                        fields: op.fields.clone(),
                    },
                );
                Ok(Some(op.fields.clone()))
            }
            OperationKind::Update => {
                if !exists {
                    return Err(OperationFailure::new(
                        FailureKind::NotFound,
                        format!("{} does not exist", op.identity),
                    ));
                }
                self.check_refs(op)?;
                if let Some(row) = self.rows.get_mut(&op.identity) {
                    row.fields = op.fields.clone();
                }
                Ok(Some(op.fields.clone()))
            }
            OperationKind::Delete => {
                if !exists {
                    return Err(OperationFailure::new(
                        FailureKind::NotFound,
                        format!("{} does not exist", op.identity),
                    ));
                }
                if let Some(referrer) = self.referrer_of(&op.identity) {
                    return Err(OperationFailure::new(
                        FailureKind::ConstraintViolation,
                        format!("{} is still referenced by {referrer}", op.identity),
                    ));
                }
                self.rows.remove(&op.identity);
                Ok(None)
            }
        }
    }
}

impl Store for MemoryStore {
    fn fetch(&self, query: &Query) -> Result<Vec<RawRecord>, StorageError> {
        let mut rows: Vec<&Row> = self
            .rows
            .iter()
            .filter(|(identity, row)| identity.entity == query.entity && query.matches(&row.fields))
            .map(|(_, row)| row)
            .collect();
        rows.sort_by_key(|row| row.seq);
        Ok(rows.into_iter().map(|row| row.fields.clone()).collect())
    }

    fn execute(&mut self, batch: &OperationBatch) -> Result<Vec<OperationOutcome>, StorageError> {
        batch.verify_checksum()?;
        let before = batch.atomic.then(|| (self.rows.clone(), self.next_seq));
        let mut outcomes = Vec::with_capacity(batch.len());

        for (index, op) in batch.operations.iter().enumerate() {
            let outcome = self.apply(op);
            if let (Err(failure), Some((rows, next_seq))) = (&outcome, &before) {
                self.rows = rows.clone();
                self.next_seq = *next_seq;
                return Ok(rolled_back_outcomes(batch, index, failure.clone()));
            }
            outcomes.push(outcome);
        }

        self.batches += 1;
        debug!(batch = %batch.batch_id, ops = batch.len(), "memory batch executed");
        Ok(outcomes)
    }
}
