use thiserror::Error;
use tracksmith_core::{CoreError, Identity, OperationKind};
use tracksmith_storage::{OperationFailure, StorageError};

use crate::state::{EntityState, Transition};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("identity {0} is already tracked with a different record")]
    DuplicateIdentity(Identity),

    #[error("cannot apply {transition:?} to {identity} in state {from:?}")]
    InvalidStateTransition {
        identity: Identity,
        from: EntityState,
        transition: Transition,
    },

    #[error("dependency cycle between {}", display_list(.0))]
    CyclicDependency(Vec<Identity>),

    #[error("{kind} of {identity} failed: {failure}")]
    StoreExecution {
        identity: Identity,
        kind: OperationKind,
        failure: OperationFailure,
    },

    #[error("tracking scope has been disposed")]
    ScopeDisposed,

    #[error("{0} is not tracked in this scope")]
    NotTracked(Identity),

    #[error("key field {field} of {identity} cannot change once persisted")]
    KeyFieldImmutable { identity: Identity, field: String },
}

fn display_list(ids: &[Identity]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}
