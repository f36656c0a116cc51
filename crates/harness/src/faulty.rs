use std::collections::HashMap;

use tracksmith_core::{Identity, OperationBatch};
use tracksmith_storage::{
    rolled_back_outcomes, OperationFailure, OperationOutcome, Query, RawRecord, StorageError, Store,
};

/// Wraps a store and rejects chosen operations, or whole batches, before they
/// reach it. Operations that are not rejected go to the inner store.
pub struct FaultyStore<S> {
    inner: S,
    rejections: HashMap<Identity, OperationFailure>,
    unavailable: Option<String>,
    batches_seen: usize,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            rejections: HashMap::new(),
            unavailable: None,
            batches_seen: 0,
        }
    }

    /// Reject every operation on `identity` with `failure`.
    pub fn reject(&mut self, identity: Identity, failure: OperationFailure) {
        self.rejections.insert(identity, failure);
    }

    pub fn clear_rejections(&mut self) {
        self.rejections.clear();
    }

    /// Fail the next batch as a whole, as an interrupted or lost connection would.
    pub fn fail_next_batch(&mut self, reason: &str) {
        self.unavailable = Some(reason.to_string());
    }

    pub fn batches_seen(&self) -> usize {
        self.batches_seen
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Store> Store for FaultyStore<S> {
    fn fetch(&self, query: &Query) -> Result<Vec<RawRecord>, StorageError> {
        self.inner.fetch(query)
    }

    fn execute(&mut self, batch: &OperationBatch) -> Result<Vec<OperationOutcome>, StorageError> {
        self.batches_seen += 1;
        if let Some(reason) = self.unavailable.take() {
            return Err(StorageError::Unavailable(reason));
        }

        let rejected: Vec<Option<&OperationFailure>> = batch
            .operations
            .iter()
            .map(|op| self.rejections.get(&op.identity))
            .collect();
        if rejected.iter().all(Option::is_none) {
            return self.inner.execute(batch);
        }

        if batch.atomic {
            if let Some((index, failure)) = rejected
                .iter()
                .enumerate()
                .find_map(|(i, r)| r.map(|f| (i, f.clone())))
            {
                return Ok(rolled_back_outcomes(batch, index, failure));
            }
        }

        let passed: Vec<_> = batch
            .operations
            .iter()
            .zip(&rejected)
            .filter(|(_, r)| r.is_none())
            .map(|(op, _)| op.clone())
            .collect();
        let mut inner_outcomes = if passed.is_empty() {
            Vec::new()
        } else {
            self.inner.execute(&OperationBatch::new(passed, false)?)?
        }
        .into_iter();

        let mut outcomes = Vec::with_capacity(batch.len());
        for failure in rejected {
            match failure {
                Some(failure) => outcomes.push(Err(failure.clone())),
                None => outcomes.push(inner_outcomes.next().ok_or_else(|| {
                    StorageError::InvalidResponse("inner store dropped an outcome".into())
                })?),
            }
        }
        Ok(outcomes)
    }
}
