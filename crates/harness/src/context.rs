use tempfile::TempDir;
use tracksmith_core::{FieldMap, Identity, Model, Record};
use tracksmith_engine::{Tracker, TrackerConfig, TrackingScope};
use tracksmith_storage::{SqliteStore, StorageError};

use crate::fixtures::blog_model;

/// A tracker over the blog model plus a SQLite store to commit into.
pub struct TestContext {
    pub tracker: Tracker,
    pub store: SqliteStore,
    dir: Option<TempDir>,
}

impl TestContext {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Result<Self, StorageError> {
        Self::with_model(blog_model(), config)
    }

    pub fn with_model(model: Model, config: TrackerConfig) -> Result<Self, StorageError> {
        let store = SqliteStore::open_in_memory(model.clone())?;
        Ok(Self {
            tracker: Tracker::new(model, config),
            store,
            dir: None,
        })
    }

    /// Same as [`TestContext::new`] but the store lives in a temporary file,
    /// so [`TestContext::reopen`] can check what was really persisted.
    pub fn file_backed() -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let model = blog_model();
        let store = SqliteStore::open(&Self::db_path(&dir), model.clone())?;
        Ok(Self {
            tracker: Tracker::new(model, TrackerConfig::default()),
            store,
            dir: Some(dir),
        })
    }

    fn db_path(dir: &TempDir) -> String {
        dir.path().join("tracksmith.db").to_string_lossy().into_owned()
    }

    /// Drop the connection and open the database file again.
    pub fn reopen(&mut self) -> Result<(), StorageError> {
        let Some(dir) = &self.dir else {
            return Err(StorageError::Unavailable("in-memory store cannot be reopened".into()));
        };
        self.store = SqliteStore::open(&Self::db_path(dir), self.tracker.model().clone())?;
        Ok(())
    }

    pub fn scope(&self) -> TrackingScope {
        self.tracker.begin_scope()
    }

    /// Insert `records` through a throwaway scope.
    pub fn seed(&mut self, records: Vec<Record>) -> Result<(), Box<dyn std::error::Error>> {
        let mut scope = self.scope();
        for record in records {
            scope.mark_added(record)?;
        }
        let result = scope.commit(&mut self.store)?;
        scope.dispose();
        match result.failed.into_iter().next() {
            Some(failed) => Err(failed.error.into()),
            None => Ok(()),
        }
    }

    pub fn stored(&self, identity: &Identity) -> Result<Option<FieldMap>, StorageError> {
        self.store.get(identity)
    }
}
