pub mod commit;
pub mod config;
pub mod detect;
pub mod error;
pub mod graph;
pub mod identity_map;
pub mod scope;
pub mod snapshot;
pub mod state;

pub use commit::{CommitResult, CommittedOperation, FailedOperation};
pub use config::{ExecutionMode, TrackerConfig};
pub use detect::Detection;
pub use error::TrackerError;
pub use identity_map::{Entry, IdentityMap};
pub use scope::{TrackingMode, TrackingScope};
pub use snapshot::Snapshot;
pub use state::{EntityState, Next, Transition};

use std::sync::Arc;

use tracing::debug;
use tracksmith_core::Model;

/// Entry point: holds the model and configuration and hands out scopes.
///
/// Scopes share the model but nothing else, so independent scopes may live on
/// different threads.
#[derive(Debug, Clone)]
pub struct Tracker {
    model: Arc<Model>,
    config: TrackerConfig,
}

impl Tracker {
    pub fn new(model: Model, config: TrackerConfig) -> Self {
        Self {
            model: Arc::new(model),
            config,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn begin_scope(&self) -> TrackingScope {
        let scope = TrackingScope::new(Arc::clone(&self.model), self.config.clone());
        debug!(scope = %scope.id(), "scope started");
        scope
    }
}
