use serde::{Deserialize, Serialize};

/// How a commit batch is handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One all-or-nothing transaction: any failure leaves every entry untouched.
    #[default]
    Atomic,
    /// Each operation stands alone; successes apply even when others fail.
    PerOperation,
}

/// Options shared by every scope a [`Tracker`](crate::Tracker) begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub execution: ExecutionMode,
    /// Run change detection for an entry whenever its state is read.
    pub detect_on_read: bool,
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self {
            execution: ExecutionMode::Atomic,
            detect_on_read: true,
        }
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_detect_on_read(mut self, enabled: bool) -> Self {
        self.detect_on_read = enabled;
        self
    }

    pub fn is_atomic(&self) -> bool {
        self.execution == ExecutionMode::Atomic
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}
