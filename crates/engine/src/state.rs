use serde::{Deserialize, Serialize};

/// Lifecycle state of an entry. `Detached` is the state of anything the scope
/// does not hold; entries only ever carry the other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    Detached,
    Unchanged,
    Modified,
    Added,
    Deleted,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Unchanged => "unchanged",
            Self::Modified => "modified",
            Self::Added => "added",
            Self::Deleted => "deleted",
        }
    }

    /// States that yield a pending operation at commit.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Retrieved from the store and registered with tracking enabled.
    Retrieve,
    MarkAdded,
    DriftDetected,
    /// Detection found a modified entry back at its snapshot values.
    DriftCleared,
    Revert,
    MarkDeleted,
    Undelete,
    /// Field assignment; valid only while the entry is live.
    Mutate,
    CommitInsert,
    CommitUpdate,
    CommitDelete,
    Untrack,
}

/// Where a transition leaves an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    State(EntityState),
    Removed,
}

/// Pure transition table, so the scope can validate before mutating anything.
/// Returns `None` when `transition` is not allowed from `from`.
pub fn next(from: EntityState, transition: Transition) -> Option<Next> {
    use EntityState::*;
    use Transition::*;

    let next = match (from, transition) {
        (Detached, Retrieve) => Next::State(Unchanged),
        (Detached, MarkAdded) => Next::State(Added),

        (Unchanged | Modified, DriftDetected) => Next::State(Modified),
        (Modified, DriftCleared) => Next::State(Unchanged),
        (Unchanged | Modified, Revert) => Next::State(Unchanged),
        (Unchanged | Modified | Added, Mutate) => Next::State(from),

        (Unchanged | Modified, MarkDeleted) => Next::State(Deleted),
        // Deleting something never persisted just forgets it.
        (Added, MarkDeleted) => Next::Removed,
        (Deleted, Undelete) => Next::State(Unchanged),

        (Added, CommitInsert) => Next::State(Unchanged),
        (Modified, CommitUpdate) => Next::State(Unchanged),
        (Deleted, CommitDelete) => Next::Removed,

        (Unchanged | Modified | Added | Deleted, Untrack) => Next::Removed,

        _ => return None,
    };
    Some(next)
}
