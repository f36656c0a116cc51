use std::sync::Arc;

use tracing::debug;
use tracksmith_core::{
    generate_key, FieldValue, Identity, KeyStrategy, Model, PendingOperation, Record, ScopeId,
};
use tracksmith_storage::{Query, Store};

use crate::commit::{self, CommitResult};
use crate::config::TrackerConfig;
use crate::detect::{self, Detection};
use crate::error::TrackerError;
use crate::identity_map::{Entry, IdentityMap};
use crate::snapshot::Snapshot;
use crate::state::{self, EntityState, Next, Transition};

/// How a retrieved record is handed to a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    Tracked,
    /// Validated but not registered; the caller keeps the only copy.
    Detached,
}

/// One unit of work: the identity map and every entry registered in it.
///
/// Not meant to be shared between threads; every operation takes `&mut self`
/// or `&self` and nothing inside locks.
#[derive(Debug)]
pub struct TrackingScope {
    id: ScopeId,
    model: Arc<Model>,
    config: TrackerConfig,
    map: IdentityMap,
    disposed: bool,
}

impl TrackingScope {
    pub(crate) fn new(model: Arc<Model>, config: TrackerConfig) -> Self {
        Self {
            id: ScopeId::new(),
            model,
            config,
            map: IdentityMap::new(),
            disposed: false,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<(), TrackerError> {
        if self.disposed {
            Err(TrackerError::ScopeDisposed)
        } else {
            Ok(())
        }
    }

    fn entry_mut(&mut self, identity: &Identity) -> Result<&mut Entry, TrackerError> {
        self.map
            .resolve_mut(identity)
            .ok_or_else(|| TrackerError::NotTracked(identity.clone()))
    }

    /// Validate `transition` for the entry at `identity` and apply it.
    fn apply(&mut self, identity: &Identity, transition: Transition) -> Result<Next, TrackerError> {
        let entry = self.entry_mut(identity)?;
        let from = entry.state();
        let next = state::next(from, transition).ok_or_else(|| TrackerError::InvalidStateTransition {
            identity: identity.clone(),
            from,
            transition,
        })?;
        match next {
            Next::State(to) => entry.set_state(to),
            Next::Removed => {
                self.map.remove(identity);
            }
        }
        debug!(scope = %self.id, %identity, ?transition, from = from.as_str(), ?next, "transition");
        Ok(next)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Hand a retrieved record to the scope. In tracked mode it is registered
    /// as `Unchanged` with a snapshot of its current values. In detached mode
    /// nothing is registered and the state of the identity as the scope sees
    /// it is returned: `Detached`, or the state of an entry already tracked
    /// under it.
    pub fn track(&mut self, record: Record, mode: TrackingMode) -> Result<EntityState, TrackerError> {
        self.ensure_live()?;
        let identity = self.model.identity_of(&record)?;
        match mode {
            TrackingMode::Detached => Ok(self
                .map
                .resolve(&identity)
                .map_or(EntityState::Detached, Entry::state)),
            TrackingMode::Tracked => {
                let snapshot = Snapshot::capture(&record);
                let entry = self.map.register(identity, record, EntityState::Unchanged, Some(snapshot))?;
                debug!(scope = %self.id, identity = %entry.identity(), state = entry.state().as_str(), "tracked");
                Ok(entry.state())
            }
        }
    }

    /// Fetch rows from `store` and hand each to the scope. Rows whose identity
    /// is already tracked resolve to the tracked record, which wins over the
    /// fetched values.
    pub fn load<S: Store + ?Sized>(
        &mut self,
        store: &S,
        query: &Query,
        mode: TrackingMode,
    ) -> Result<Vec<Record>, TrackerError> {
        self.ensure_live()?;
        let rows = store.fetch(query)?;
        let mut records = Vec::with_capacity(rows.len());
        for fields in rows {
            let record = Record::from_fields(query.entity.clone(), fields);
            let identity = self.model.identity_of(&record)?;
            if mode == TrackingMode::Tracked {
                if let Some(entry) = self.map.resolve(&identity) {
                    records.push(entry.record().clone());
                    continue;
                }
            }
            self.track(record.clone(), mode)?;
            records.push(record);
        }
        debug!(scope = %self.id, entity = %query.entity, rows = records.len(), "loaded");
        Ok(records)
    }

    /// Track a new record for insertion. Entities with generated keys get a
    /// fresh key when theirs is missing or null.
    pub fn mark_added(&mut self, mut record: Record) -> Result<Identity, TrackerError> {
        self.ensure_live()?;
        let entity = self.model.get(&record.entity)?;
        if entity.key_strategy == KeyStrategy::Generated {
            if let [key_field] = entity.key_fields.as_slice() {
                if record.get(key_field).is_none_or(FieldValue::is_null) {
                    record.set(key_field, FieldValue::Uuid(generate_key()));
                }
            }
        }
        let identity = entity.identity_of(&record)?;

        if let Some(existing) = self.map.resolve(&identity) {
            if existing.record() != &record {
                return Err(TrackerError::DuplicateIdentity(identity));
            }
            if existing.state() != EntityState::Added {
                return Err(TrackerError::InvalidStateTransition {
                    identity,
                    from: existing.state(),
                    transition: Transition::MarkAdded,
                });
            }
            return Ok(identity);
        }

        self.map.register(identity.clone(), record, EntityState::Added, None)?;
        debug!(scope = %self.id, %identity, "added");
        Ok(identity)
    }

    pub fn mark_deleted(&mut self, identity: &Identity) -> Result<(), TrackerError> {
        self.ensure_live()?;
        self.apply(identity, Transition::MarkDeleted)?;
        Ok(())
    }

    /// Bring a deleted entry back. Its state is recomputed against the
    /// snapshot, so pending edits made before the delete survive.
    pub fn undelete(&mut self, identity: &Identity) -> Result<EntityState, TrackerError> {
        self.ensure_live()?;
        self.apply(identity, Transition::Undelete)?;
        let entry = self.entry_mut(identity)?;
        detect::refresh(entry);
        Ok(entry.state())
    }

    /// Discard edits, restoring the snapshot values.
    pub fn revert(&mut self, identity: &Identity) -> Result<(), TrackerError> {
        self.ensure_live()?;
        let entry = self.entry_mut(identity)?;
        let from = entry.state();
        if state::next(from, Transition::Revert).is_none() {
            return Err(TrackerError::InvalidStateTransition {
                identity: identity.clone(),
                from,
                transition: Transition::Revert,
            });
        }
        let restored = entry
            .snapshot()
            .map(|s| s.to_record(&identity.entity))
            .ok_or_else(|| TrackerError::NotTracked(identity.clone()))?;
        *entry.record_mut() = restored;
        self.apply(identity, Transition::Revert)?;
        Ok(())
    }

    /// Stop tracking, returning the record. Untracking an added entry
    /// cancels its insert.
    pub fn untrack(&mut self, identity: &Identity) -> Result<Record, TrackerError> {
        self.ensure_live()?;
        let record = self.entry_mut(identity)?.record().clone();
        self.apply(identity, Transition::Untrack)?;
        Ok(record)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Assign a field. Key fields may only change while the entry is `Added`,
    /// which re-keys it in the identity map.
    pub fn set_field(
        &mut self,
        identity: &Identity,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), TrackerError> {
        self.mutate(identity, field, Some(value.into()))
    }

    pub fn clear_field(&mut self, identity: &Identity, field: &str) -> Result<(), TrackerError> {
        self.mutate(identity, field, None)
    }

    fn mutate(
        &mut self,
        identity: &Identity,
        field: &str,
        value: Option<FieldValue>,
    ) -> Result<(), TrackerError> {
        self.ensure_live()?;
        let model = Arc::clone(&self.model);
        let entity = model.get(&identity.entity)?;
        let entry = self.entry_mut(identity)?;
        let from = entry.state();
        if state::next(from, Transition::Mutate).is_none() {
            return Err(TrackerError::InvalidStateTransition {
                identity: identity.clone(),
                from,
                transition: Transition::Mutate,
            });
        }

        if !entity.is_key_field(field) {
            match value {
                Some(value) => entry.record_mut().set(field, value),
                None => {
                    entry.record_mut().remove(field);
                }
            }
            return Ok(());
        }

        if from != EntityState::Added {
            return Err(TrackerError::KeyFieldImmutable {
                identity: identity.clone(),
                field: field.to_string(),
            });
        }
        let mut rekeyed = entry.record().clone();
        match value {
            Some(value) => rekeyed.set(field, value),
            None => {
                rekeyed.remove(field);
            }
        }
        let new_identity = entity.identity_of(&rekeyed)?;
        if &new_identity != identity {
            self.map.rekey(identity, new_identity.clone())?;
            debug!(scope = %self.id, from = %identity, to = %new_identity, "re-keyed");
        }
        *self.entry_mut(&new_identity)?.record_mut() = rekeyed;
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn record(&self, identity: &Identity) -> Result<&Record, TrackerError> {
        self.ensure_live()?;
        self.map
            .resolve(identity)
            .map(Entry::record)
            .ok_or_else(|| TrackerError::NotTracked(identity.clone()))
    }

    pub fn entry(&self, identity: &Identity) -> Result<Option<&Entry>, TrackerError> {
        self.ensure_live()?;
        Ok(self.map.resolve(identity))
    }

    /// State of `identity`; `Detached` when the scope does not hold it. With
    /// `detect_on_read` the entry is checked for drift first.
    pub fn current_state(&mut self, identity: &Identity) -> Result<EntityState, TrackerError> {
        self.ensure_live()?;
        let detect_on_read = self.config.detect_on_read;
        match self.map.resolve_mut(identity) {
            None => Ok(EntityState::Detached),
            Some(entry) => {
                if detect_on_read {
                    detect::refresh(entry);
                }
                Ok(entry.state())
            }
        }
    }

    /// Run the change detector for one entry and apply the transition it implies.
    pub fn detect(&mut self, identity: &Identity) -> Result<Detection, TrackerError> {
        self.ensure_live()?;
        Ok(detect::refresh(self.entry_mut(identity)?))
    }

    /// Detection pass over every entry. Returns how many are now `Modified`.
    pub fn detect_changes(&mut self) -> Result<usize, TrackerError> {
        self.ensure_live()?;
        let mut modified = 0;
        for identity in self.map.identities() {
            if let Some(entry) = self.map.resolve_mut(&identity) {
                detect::refresh(entry);
                if entry.state() == EntityState::Modified {
                    modified += 1;
                }
            }
        }
        Ok(modified)
    }

    /// The ordered operations a commit would execute right now.
    pub fn pending_operations(&mut self) -> Result<Vec<PendingOperation>, TrackerError> {
        self.ensure_live()?;
        commit::prepare(&mut self.map, &self.model)
    }

    pub fn has_changes(&mut self) -> Result<bool, TrackerError> {
        self.detect_changes()?;
        Ok(self.map.entries().iter().any(|e| e.state().is_pending()))
    }

    pub fn identities(&self) -> Result<Vec<Identity>, TrackerError> {
        self.ensure_live()?;
        Ok(self.map.identities())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // ========================================================================
    // Commit / dispose
    // ========================================================================

    /// Detect, order and execute every pending change against `store`, then
    /// reconcile entries with what the store acknowledged.
    pub fn commit<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<CommitResult, TrackerError> {
        self.ensure_live()?;
        let span = tracing::info_span!("commit", scope = %self.id);
        let _guard = span.enter();
        commit::run(&mut self.map, &self.model, &self.config, store)
    }

    /// Release every entry. Any later call fails with `ScopeDisposed`.
    pub fn dispose(&mut self) {
        if !self.disposed {
            debug!(scope = %self.id, entries = self.map.len(), "disposed");
        }
        self.map.clear();
        self.disposed = true;
    }
}
