use rusqlite::{Connection, InterruptHandle, OptionalExtension};
use tracing::{debug, warn};

use tracksmith_core::{
    model::{EntityModel, Model},
    operations::{OperationBatch, OperationKind, PendingOperation},
    record::{FieldMap, Identity, Record},
};

use crate::error::StorageError;
use crate::traits::{
    rolled_back_outcomes, FailureKind, OperationFailure, OperationOutcome, Query, RawRecord, Store,
};

/// SQLite-backed store. Records are kept as MessagePack blobs keyed by
/// `(entity, key)`; required references are mirrored into `record_refs` so
/// inserts of dangling references and deletes of referenced rows are refused.
pub struct SqliteStore {
    conn: Connection,
    model: Model,
}

impl SqliteStore {
    pub fn open(path: &str, model: Model) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn, model })
    }

    pub fn open_in_memory(model: Model) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn, model })
    }

    /// Handle that aborts the statement currently running on this store from
    /// another thread. An interrupted batch rolls back and surfaces as `Err`.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    pub fn get(&self, identity: &Identity) -> Result<Option<FieldMap>, StorageError> {
        let key = identity.key_to_msgpack()?;
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT fields FROM records WHERE entity = ?1 AND key = ?2",
                rusqlite::params![identity.entity, key],
                |row| row.get(0),
            )
            .optional()?;
        bytes
            .map(|b| Record::fields_from_msgpack(&b).map_err(StorageError::from))
            .transpose()
    }

    pub fn count(&self, entity: &str) -> Result<u64, StorageError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE entity = ?1",
            rusqlite::params![entity],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn batch_count(&self) -> Result<u64, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM batches", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn record_exists(conn: &Connection, entity: &str, key: &[u8]) -> Result<bool, StorageError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM records WHERE entity = ?1 AND key = ?2",
            rusqlite::params![entity, key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Verify that every required reference of `record` resolves, then rewrite
/// its rows in `record_refs`.
fn write_refs(
    conn: &Connection,
    entity: &EntityModel,
    key: &[u8],
    record: &Record,
) -> Result<Result<(), OperationFailure>, StorageError> {
    conn.execute(
        "DELETE FROM record_refs WHERE entity = ?1 AND key = ?2",
        rusqlite::params![entity.name, key],
    )?;
    for reference in entity.required_references() {
        let Some(target) = reference.target_identity(record) else {
            return Ok(Err(OperationFailure::new(
                FailureKind::ConstraintViolation,
                format!("required reference {} of {} is null", reference.name, entity.name),
            )));
        };
        let target_key = target.key_to_msgpack()?;
        if !record_exists(conn, &target.entity, &target_key)? {
            return Ok(Err(OperationFailure::new(
                FailureKind::ConstraintViolation,
                format!("required reference {} points at missing {target}", reference.name),
            )));
        }
        conn.execute(
            "INSERT INTO record_refs (entity, key, ref_name, target_entity, target_key) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![entity.name, key, reference.name, target.entity, target_key],
        )?;
    }
    Ok(Ok(()))
}

/// Apply one operation. The outer `Result` is an infrastructure failure that
/// aborts the whole batch; the inner one is a per-operation rejection.
fn apply_op(
    conn: &Connection,
    model: &Model,
    op: &PendingOperation,
    batch: &OperationBatch,
) -> Result<OperationOutcome, StorageError> {
    let entity = match model.get(&op.identity.entity) {
        Ok(entity) => entity,
        Err(e) => return Ok(Err(OperationFailure::new(FailureKind::Store, e.to_string()))),
    };
    let key = op.identity.key_to_msgpack()?;

    match op.kind {
        OperationKind::Insert => {
            if record_exists(conn, &entity.name, &key)? {
                return Ok(Err(OperationFailure::new(
                    FailureKind::Conflict,
                    format!("{} already exists", op.identity),
                )));
            }
            if let Err(failure) = write_refs(conn, entity, &key, &op.record())? {
                return Ok(Err(failure));
            }
            conn.execute(
                "INSERT INTO records (entity, key, fields, written_in_batch) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    entity.name,
                    key,
                    op.record().fields_to_msgpack()?,
                    batch.batch_id.as_uuid().as_bytes().as_slice(),
                ],
            )?;
            Ok(Ok(Some(op.fields.clone())))
        }

        OperationKind::Update => {
            if !record_exists(conn, &entity.name, &key)? {
                return Ok(Err(OperationFailure::new(
                    FailureKind::NotFound,
                    format!("{} does not exist", op.identity),
                )));
            }
            if let Err(failure) = write_refs(conn, entity, &key, &op.record())? {
                return Ok(Err(failure));
            }
            conn.execute(
                "UPDATE records SET fields = ?1, written_in_batch = ?2 WHERE entity = ?3 AND key = ?4",
                rusqlite::params![
                    op.record().fields_to_msgpack()?,
                    batch.batch_id.as_uuid().as_bytes().as_slice(),
                    entity.name,
                    key,
                ],
            )?;
            Ok(Ok(Some(op.fields.clone())))
        }

        OperationKind::Delete => {
            if !record_exists(conn, &entity.name, &key)? {
                return Ok(Err(OperationFailure::new(
                    FailureKind::NotFound,
                    format!("{} does not exist", op.identity),
                )));
            }
            let referrer: Option<(String, String)> = conn
                .query_row(
                    "SELECT entity, ref_name FROM record_refs WHERE target_entity = ?1 AND target_key = ?2 LIMIT 1",
                    rusqlite::params![entity.name, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((referrer, ref_name)) = referrer {
                return Ok(Err(OperationFailure::new(
                    FailureKind::ConstraintViolation,
                    format!("{} is still referenced by {referrer}.{ref_name}", op.identity),
                )));
            }
            conn.execute(
                "DELETE FROM record_refs WHERE entity = ?1 AND key = ?2",
                rusqlite::params![entity.name, key],
            )?;
            conn.execute(
                "DELETE FROM records WHERE entity = ?1 AND key = ?2",
                rusqlite::params![entity.name, key],
            )?;
            Ok(Ok(None))
        }
    }
}

fn log_batch(conn: &Connection, batch: &OperationBatch, applied: usize) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO batches (batch_id, checksum, atomic, op_count, applied_count) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            batch.batch_id.as_uuid().as_bytes().as_slice(),
            &batch.checksum[..],
            batch.atomic,
            batch.len() as i64,
            applied as i64,
        ],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn fetch(&self, query: &Query) -> Result<Vec<RawRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fields FROM records WHERE entity = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(rusqlite::params![query.entity], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;

        let mut result = Vec::new();
        for row in rows {
            let fields = Record::fields_from_msgpack(&row?)?;
            if query.matches(&fields) {
                result.push(fields);
            }
        }
        Ok(result)
    }

    fn execute(&mut self, batch: &OperationBatch) -> Result<Vec<OperationOutcome>, StorageError> {
        batch.verify_checksum()?;
        self.execute_batch(batch).map_err(StorageError::interrupted)
    }
}

impl SqliteStore {
    fn execute_batch(&mut self, batch: &OperationBatch) -> Result<Vec<OperationOutcome>, StorageError> {
        let mut tx = self.conn.transaction()?;
        let mut outcomes = Vec::with_capacity(batch.len());

        if batch.atomic {
            for (index, op) in batch.operations.iter().enumerate() {
                match apply_op(&tx, &self.model, op, batch)? {
                    Ok(persisted) => outcomes.push(Ok(persisted)),
                    Err(failure) => {
                        warn!(batch = %batch.batch_id, identity = %op.identity, %failure, "atomic batch rejected");
                        tx.rollback()?;
                        return Ok(rolled_back_outcomes(batch, index, failure));
                    }
                }
            }
        } else {
            for op in &batch.operations {
                let sp = tx.savepoint()?;
                match apply_op(&sp, &self.model, op, batch)? {
                    Ok(persisted) => {
                        sp.commit()?;
                        outcomes.push(Ok(persisted));
                    }
                    Err(failure) => {
                        warn!(batch = %batch.batch_id, identity = %op.identity, %failure, "operation rejected");
                        sp.finish()?;
                        outcomes.push(Err(failure));
                    }
                }
            }
        }

        let applied = outcomes.iter().filter(|o| o.is_ok()).count();
        log_batch(&tx, batch, applied)?;
        tx.commit()?;
        debug!(batch = %batch.batch_id, ops = batch.len(), applied, "batch executed");
        Ok(outcomes)
    }
}
