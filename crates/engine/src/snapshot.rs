use std::collections::BTreeSet;

use tracksmith_core::{FieldMap, FieldValue, Record};

/// Field values as last known to the store. Never mutated in place: a commit
/// replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    fields: FieldMap,
}

impl Snapshot {
    pub fn capture(record: &Record) -> Self {
        Self {
            fields: record.fields.clone(),
        }
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Names of fields whose live value differs from the snapshot. A field
    /// present on only one side counts as different.
    pub fn differing_fields(&self, live: &FieldMap) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, value) in live {
            if self.fields.get(name) != Some(value) {
                changed.insert(name.clone());
            }
        }
        for name in self.fields.keys() {
            if !live.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        changed
    }

    pub fn to_record(&self, entity: &str) -> Record {
        Record::from_fields(entity, self.fields.clone())
    }
}
