use tracing::{debug, info, warn};
use tracksmith_core::{
    BatchId, FieldMap, Identity, Model, OperationBatch, OperationKind, PendingOperation,
};
use tracksmith_storage::{FailureKind, OperationFailure, OperationOutcome, StorageError, Store};

use crate::config::TrackerConfig;
use crate::detect;
use crate::error::TrackerError;
use crate::graph;
use crate::identity_map::{Entry, IdentityMap};
use crate::snapshot::Snapshot;
use crate::state::{self, EntityState, Next, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOperation {
    pub identity: Identity,
    pub kind: OperationKind,
}

#[derive(Debug)]
pub struct FailedOperation {
    pub identity: Identity,
    pub kind: OperationKind,
    /// Always [`TrackerError::StoreExecution`].
    pub error: TrackerError,
}

impl FailedOperation {
    fn new(op: &PendingOperation, failure: OperationFailure) -> Self {
        Self {
            identity: op.identity.clone(),
            kind: op.kind,
            error: TrackerError::StoreExecution {
                identity: op.identity.clone(),
                kind: op.kind,
                failure,
            },
        }
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        match &self.error {
            TrackerError::StoreExecution { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Per-operation outcome of a commit. Operations appear in execution order.
#[derive(Debug, Default)]
pub struct CommitResult {
    /// `None` when there was nothing to commit and the store was not called.
    pub batch_id: Option<BatchId>,
    pub succeeded: Vec<CommittedOperation>,
    pub failed: Vec<FailedOperation>,
}

impl CommitResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }
}

fn pending_operation(entry: &Entry) -> Option<PendingOperation> {
    let identity = entry.identity().clone();
    let fields = entry.record().fields.clone();
    let original = entry.snapshot().map(|s| s.fields().clone());
    match entry.state() {
        EntityState::Added => Some(PendingOperation::insert(entry.seq(), identity, fields)),
        EntityState::Modified => {
            let snapshot = entry.snapshot()?;
            let changed = snapshot.differing_fields(&fields);
            Some(PendingOperation::update(
                entry.seq(),
                identity,
                fields,
                snapshot.fields().clone(),
                changed,
            ))
        }
        EntityState::Deleted => Some(PendingOperation::delete(entry.seq(), identity, fields, original)),
        EntityState::Unchanged | EntityState::Detached => None,
    }
}

/// Run the detection pass over every entry, then collect and order one
/// operation per added, modified or deleted entry.
pub(crate) fn prepare(
    map: &mut IdentityMap,
    model: &Model,
) -> Result<Vec<PendingOperation>, TrackerError> {
    for identity in map.identities() {
        if let Some(entry) = map.resolve_mut(&identity) {
            if matches!(entry.state(), EntityState::Unchanged | EntityState::Modified) {
                detect::refresh(entry);
            }
        }
    }

    let operations: Vec<PendingOperation> = map
        .entries()
        .into_iter()
        .filter_map(pending_operation)
        .collect();
    graph::order(operations, model)
}

fn commit_transition(kind: OperationKind) -> Transition {
    match kind {
        OperationKind::Insert => Transition::CommitInsert,
        OperationKind::Update => Transition::CommitUpdate,
        OperationKind::Delete => Transition::CommitDelete,
    }
}

/// Apply a store acknowledgement to the entry behind `op`.
fn reconcile(map: &mut IdentityMap, op: &PendingOperation, persisted: Option<FieldMap>) {
    let Some(entry) = map.resolve_mut(&op.identity) else {
        warn!(identity = %op.identity, "acknowledged operation has no entry");
        return;
    };
    let from = entry.state();
    match state::next(from, commit_transition(op.kind)) {
        Some(Next::State(to)) => {
            if let Some(fields) = persisted {
                entry.record_mut().fields = fields;
            }
            let snapshot = Snapshot::capture(entry.record());
            entry.set_snapshot(Some(snapshot));
            entry.set_state(to);
        }
        Some(Next::Removed) => {
            map.remove(&op.identity);
        }
        None => {
            warn!(identity = %op.identity, state = from.as_str(), kind = %op.kind, "acknowledged operation does not match entry state");
        }
    }
}

/// Index of the operation that made a batch fail. Stores that already expanded
/// an atomic failure report the others as rolled back, so those are skipped.
fn failure_cause(outcomes: &[OperationOutcome]) -> Option<usize> {
    outcomes
        .iter()
        .position(|o| matches!(o, Err(f) if f.kind != FailureKind::RolledBack))
        .or_else(|| outcomes.iter().position(|o| o.is_err()))
}

/// Commit pipeline: detect, collect, order, execute, then reconcile entries
/// with what the store acknowledged.
pub(crate) fn run<S: Store + ?Sized>(
    map: &mut IdentityMap,
    model: &Model,
    config: &TrackerConfig,
    store: &mut S,
) -> Result<CommitResult, TrackerError> {
    let operations = prepare(map, model)?;
    if operations.is_empty() {
        debug!("nothing to commit");
        return Ok(CommitResult::default());
    }

    let batch = OperationBatch::new(operations, config.is_atomic())?;
    info!(
        batch = %batch.batch_id,
        atomic = batch.atomic,
        inserts = batch.count(OperationKind::Insert),
        updates = batch.count(OperationKind::Update),
        deletes = batch.count(OperationKind::Delete),
        "committing batch"
    );

    let mut result = CommitResult {
        batch_id: Some(batch.batch_id),
        ..CommitResult::default()
    };

    let outcomes: Vec<OperationOutcome> = match store.execute(&batch) {
        Ok(outcomes) if outcomes.len() == batch.len() => outcomes,
        Ok(outcomes) => {
            return Err(StorageError::InvalidResponse(format!(
                "{} outcomes for {} operations",
                outcomes.len(),
                batch.len()
            ))
            .into());
        }
        Err(e) => {
            warn!(batch = %batch.batch_id, error = %e, "batch failed before acknowledgement");
            let failure = OperationFailure::new(FailureKind::Store, e.to_string());
            result.failed = batch
                .operations
                .iter()
                .map(|op| FailedOperation::new(op, failure.clone()))
                .collect();
            return Ok(result);
        }
    };

    // An atomic batch stands or falls as a whole, whatever the store claims.
    if batch.atomic {
        if let Some(index) = failure_cause(&outcomes) {
            let cause = &batch.operations[index].identity;
            for (op, outcome) in batch.operations.iter().zip(outcomes) {
                let failure = outcome
                    .err()
                    .unwrap_or_else(|| OperationFailure::rolled_back(cause));
                result.failed.push(FailedOperation::new(op, failure));
            }
            warn!(batch = %batch.batch_id, cause = %cause, "atomic batch rolled back");
            return Ok(result);
        }
    }

    for (op, outcome) in batch.operations.iter().zip(outcomes) {
        match outcome {
            Ok(persisted) => {
                reconcile(map, op, persisted);
                result.succeeded.push(CommittedOperation {
                    identity: op.identity.clone(),
                    kind: op.kind,
                });
            }
            Err(failure) => {
                warn!(identity = %op.identity, kind = %op.kind, %failure, "operation failed");
                result.failed.push(FailedOperation::new(op, failure));
            }
        }
    }

    info!(
        batch = %batch.batch_id,
        succeeded = result.succeeded.len(),
        failed = result.failed.len(),
        "batch committed"
    );
    Ok(result)
}
