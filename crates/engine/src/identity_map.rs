use std::collections::HashMap;
use std::collections::hash_map::Entry as Slot;

use tracksmith_core::{Identity, Record};

use crate::error::TrackerError;
use crate::snapshot::Snapshot;
use crate::state::EntityState;

/// Tracking wrapper pairing one record with its state and snapshot.
#[derive(Debug, Clone)]
pub struct Entry {
    seq: u64,
    identity: Identity,
    record: Record,
    state: EntityState,
    snapshot: Option<Snapshot>,
}

impl Entry {
    /// Registration order within the scope.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub(crate) fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Option<Snapshot>) {
        self.snapshot = snapshot;
    }
}

/// Identity to entry, at most one entry per identity.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<Identity, Entry>,
    next_seq: u64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, identity: &Identity) -> Option<&Entry> {
        self.entries.get(identity)
    }

    pub(crate) fn resolve_mut(&mut self, identity: &Identity) -> Option<&mut Entry> {
        self.entries.get_mut(identity)
    }

    /// Register `record` under `identity`. Registering an equal record again
    /// returns the existing entry untouched; a different record under the same
    /// identity is refused.
    pub fn register(
        &mut self,
        identity: Identity,
        record: Record,
        state: EntityState,
        snapshot: Option<Snapshot>,
    ) -> Result<&mut Entry, TrackerError> {
        match self.entries.entry(identity) {
            Slot::Occupied(slot) => {
                if slot.get().record == record {
                    Ok(slot.into_mut())
                } else {
                    Err(TrackerError::DuplicateIdentity(slot.key().clone()))
                }
            }
            Slot::Vacant(slot) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                let identity = slot.key().clone();
                Ok(slot.insert(Entry {
                    seq,
                    identity,
                    record,
                    state,
                    snapshot,
                }))
            }
        }
    }

    pub fn remove(&mut self, identity: &Identity) -> Option<Entry> {
        self.entries.remove(identity)
    }

    /// Move an entry to a new identity, keeping its registration order.
    pub(crate) fn rekey(&mut self, from: &Identity, to: Identity) -> Result<(), TrackerError> {
        if self.entries.contains_key(&to) {
            return Err(TrackerError::DuplicateIdentity(to));
        }
        let mut entry = self
            .entries
            .remove(from)
            .ok_or_else(|| TrackerError::NotTracked(from.clone()))?;
        entry.identity = to.clone();
        self.entries.insert(to, entry);
        Ok(())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities in registration order.
    pub fn identities(&self) -> Vec<Identity> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.identity.clone()).collect()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
