//! Job System Errors

use crate::task::TaskId;

/// Errors returned by the job system API
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Queue closed: {queue}")]
    QueueClosed { queue: String },

    #[error("Task {task} is already pending on queue {queue}")]
    AlreadyQueued { task: TaskId, queue: String },

    #[error("Task {task} has already started")]
    AlreadyStarted { task: TaskId },

    #[error("Dependency {dependency} of task {task} would create a cycle")]
    DependencyCycle { task: TaskId, dependency: TaskId },

    #[error("Failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure outcome of a task, delivered to every joiner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task {task} panicked: {message}")]
    Panicked { task: TaskId, message: String },

    #[error("Task {task} skipped: dependency {dependency} failed")]
    DependencyFailed { task: TaskId, dependency: TaskId },

    #[error("Task {task} abandoned: its queue shut down before it ran")]
    Abandoned { task: TaskId },
}

impl TaskError {
    /// Task that produced this error
    pub fn task(&self) -> TaskId {
        match self {
            Self::Panicked { task, .. }
            | Self::DependencyFailed { task, .. }
            | Self::Abandoned { task } => *task,
        }
    }
}
