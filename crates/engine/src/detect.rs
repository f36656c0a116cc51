use std::collections::BTreeSet;

use tracing::debug;

use crate::identity_map::Entry;
use crate::state::{self, EntityState, Next, Transition};

/// Result of comparing an entry against its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub changed: bool,
    pub changed_fields: BTreeSet<String>,
}

impl Detection {
    fn unchanged() -> Self {
        Self {
            changed: false,
            changed_fields: BTreeSet::new(),
        }
    }

    fn whole(entry: &Entry) -> Self {
        Self {
            changed: true,
            changed_fields: entry.record().fields.keys().cloned().collect(),
        }
    }

    /// The transition detection implies for `state`, if any.
    pub fn transition_for(&self, state: EntityState) -> Option<Transition> {
        match (state, self.changed) {
            (EntityState::Unchanged, true) => Some(Transition::DriftDetected),
            (EntityState::Modified, false) => Some(Transition::DriftCleared),
            _ => None,
        }
    }
}

/// Compare an entry's live fields against its snapshot by value. Foreign keys
/// are plain scalar fields, so a reference only counts as changed when its key
/// values do. Added and deleted entries are changed as a whole.
pub fn detect(entry: &Entry) -> Detection {
    match entry.state() {
        EntityState::Added | EntityState::Deleted => Detection::whole(entry),
        EntityState::Detached => Detection::unchanged(),
        EntityState::Unchanged | EntityState::Modified => match entry.snapshot() {
            Some(snapshot) => {
                let changed_fields = snapshot.differing_fields(&entry.record().fields);
                Detection {
                    changed: !changed_fields.is_empty(),
                    changed_fields,
                }
            }
            // Unreachable while snapshots stay coherent with state; treat the
            // whole record as drifted rather than losing writes.
            None => Detection::whole(entry),
        },
    }
}

/// Detect and apply the implied transition to the entry.
pub(crate) fn refresh(entry: &mut Entry) -> Detection {
    let detection = detect(entry);
    let from = entry.state();
    if let Some(Next::State(to)) = detection
        .transition_for(from)
        .and_then(|t| state::next(from, t))
    {
        if to != from {
            debug!(identity = %entry.identity(), from = from.as_str(), to = to.as_str(), "state changed by detection");
        }
        entry.set_state(to);
    }
    detection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_map::IdentityMap;
    use crate::snapshot::Snapshot;
    use tracksmith_core::{FieldValue, Identity, Record};

    fn tracked(map: &mut IdentityMap, state: EntityState) -> Identity {
        let record = Record::new("Author").with("id", 1).with("name", "X");
        let snapshot = (state != EntityState::Added).then(|| Snapshot::capture(&record));
        let id = Identity::of("Author", 1);
        map.register(id.clone(), record, state, snapshot).unwrap();
        id
    }

    #[test]
    fn untouched_entry_is_unchanged() {
        let mut map = IdentityMap::new();
        let id = tracked(&mut map, EntityState::Unchanged);
        let detection = detect(map.resolve(&id).unwrap());
        assert!(!detection.changed);
        assert_eq!(detection.transition_for(EntityState::Unchanged), None);
    }

    #[test]
    fn drift_is_reported_and_idempotent() {
        let mut map = IdentityMap::new();
        let id = tracked(&mut map, EntityState::Unchanged);
        map.resolve_mut(&id)
            .unwrap()
            .record_mut()
            .set("name", FieldValue::Text("Y".into()));

        let first = detect(map.resolve(&id).unwrap());
        let second = detect(map.resolve(&id).unwrap());
        assert_eq!(first, second);
        assert!(first.changed);
        assert_eq!(first.changed_fields, BTreeSet::from(["name".to_string()]));
        assert_eq!(
            first.transition_for(EntityState::Unchanged),
            Some(Transition::DriftDetected)
        );
    }

    #[test]
    fn refresh_promotes_then_demotes() {
        let mut map = IdentityMap::new();
        let id = tracked(&mut map, EntityState::Unchanged);
        let entry = map.resolve_mut(&id).unwrap();

        entry.record_mut().set("name", FieldValue::Text("Y".into()));
        refresh(entry);
        assert_eq!(entry.state(), EntityState::Modified);

        entry.record_mut().set("name", FieldValue::Text("X".into()));
        refresh(entry);
        assert_eq!(entry.state(), EntityState::Unchanged);
    }

    #[test]
    fn modified_back_to_original_clears() {
        let mut map = IdentityMap::new();
        let id = tracked(&mut map, EntityState::Modified);
        let detection = detect(map.resolve(&id).unwrap());
        assert_eq!(
            detection.transition_for(EntityState::Modified),
            Some(Transition::DriftCleared)
        );
    }

    #[test]
    fn added_entries_are_changed_as_a_whole() {
        let mut map = IdentityMap::new();
        let id = tracked(&mut map, EntityState::Added);
        let detection = detect(map.resolve(&id).unwrap());
        assert!(detection.changed);
        assert_eq!(detection.changed_fields.len(), 2);
        assert_eq!(detection.transition_for(EntityState::Added), None);
    }
}
