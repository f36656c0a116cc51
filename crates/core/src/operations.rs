use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::BatchId;
use crate::record::{FieldMap, Identity, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A to-be-executed write derived from one tracked entry at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Registration sequence of the originating entry; the stable tie-break.
    pub seq: u64,
    pub kind: OperationKind,
    pub identity: Identity,
    /// Live field values. For deletes, the values at the time of deletion.
    pub fields: FieldMap,
    /// Snapshot the entry was diffed against. `None` for inserts.
    pub original: Option<FieldMap>,
    /// Fields that differ from `original`. Only populated for updates.
    pub changed_fields: BTreeSet<String>,
}

impl PendingOperation {
    pub fn insert(seq: u64, identity: Identity, fields: FieldMap) -> Self {
        Self {
            seq,
            kind: OperationKind::Insert,
            identity,
            fields,
            original: None,
            changed_fields: BTreeSet::new(),
        }
    }

    pub fn update(
        seq: u64,
        identity: Identity,
        fields: FieldMap,
        original: FieldMap,
        changed_fields: BTreeSet<String>,
    ) -> Self {
        Self {
            seq,
            kind: OperationKind::Update,
            identity,
            fields,
            original: Some(original),
            changed_fields,
        }
    }

    pub fn delete(seq: u64, identity: Identity, fields: FieldMap, original: Option<FieldMap>) -> Self {
        Self {
            seq,
            kind: OperationKind::Delete,
            identity,
            fields,
            original,
            changed_fields: BTreeSet::new(),
        }
    }

    pub fn record(&self) -> Record {
        Record::from_fields(self.identity.entity.clone(), self.fields.clone())
    }

    /// Record as last persisted, falling back to the live values.
    pub fn original_record(&self) -> Record {
        let fields = self.original.as_ref().unwrap_or(&self.fields).clone();
        Record::from_fields(self.identity.entity.clone(), fields)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// The ordered, checksummed set of writes handed to a store in one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationBatch {
    pub batch_id: BatchId,
    /// All-or-nothing when set; otherwise each operation stands alone.
    pub atomic: bool,
    pub operations: Vec<PendingOperation>,
    pub checksum: [u8; 32],
}

impl OperationBatch {
    pub fn new(operations: Vec<PendingOperation>, atomic: bool) -> Result<Self, CoreError> {
        let checksum = Self::compute_checksum(&operations)?;
        Ok(Self {
            batch_id: BatchId::new(),
            atomic,
            operations,
            checksum,
        })
    }

    fn compute_checksum(operations: &[PendingOperation]) -> Result<[u8; 32], CoreError> {
        let mut hasher = blake3::Hasher::new();
        for op in operations {
            hasher.update(&op.to_msgpack()?);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    pub fn verify_checksum(&self) -> Result<(), CoreError> {
        if Self::compute_checksum(&self.operations)? == self.checksum {
            Ok(())
        } else {
            Err(CoreError::InvalidData(format!(
                "checksum mismatch for batch {}",
                self.batch_id
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|op| op.kind == kind).count()
    }
}
