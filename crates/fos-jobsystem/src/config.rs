//! Job System Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job system configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsystemConfig {
    /// Prefix for worker thread names (`<prefix>-<queue>`)
    pub thread_name_prefix: String,

    /// Worker stack size in bytes (`None` keeps the platform default)
    pub stack_size: Option<usize>,

    /// Upper bound on a single idle wait, so a stop request is always seen
    pub idle_timeout: Duration,

    /// Rescan interval while every pending task waits on another queue
    pub stall_backoff: Duration,
}

impl Default for JobsystemConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "fos".to_string(),
            stack_size: None,
            idle_timeout: Duration::from_millis(100),
            stall_backoff: Duration::from_millis(1),
        }
    }
}

impl JobsystemConfig {
    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Set the idle wait bound
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the stalled-queue rescan interval
    pub fn with_stall_backoff(mut self, backoff: Duration) -> Self {
        self.stall_backoff = backoff;
        self
    }

    /// Name of the worker thread servicing `queue`
    pub fn thread_name(&self, queue: &str) -> String {
        format!("{}-{}", self.thread_name_prefix, queue)
    }
}
