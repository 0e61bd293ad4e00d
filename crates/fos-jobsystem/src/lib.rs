//! fOS Job System
//!
//! Dependency-ordered task scheduler for the engine layer.
//!
//! # Model
//! - A [`Task`] wraps a closure, records non-owning edges to the tasks it
//!   depends on and publishes a broadcast completion signal.
//! - A [`WorkerQueue`] holds pending tasks and hands out the first one whose
//!   dependencies have started.
//! - A [`WorkerThread`] drains exactly one queue on a dedicated OS thread.
//! - The [`Jobsystem`] owns one queue/thread pair per [`QueueType`].
//!
//! A task body never runs before every dependency has completed, whatever
//! the submission order.
//!
//! # Example
//! ```rust,ignore
//! use fos_jobsystem::{Jobsystem, JobsystemConfig, QueueType, Task};
//!
//! let jobs = Jobsystem::new(JobsystemConfig::default())?;
//!
//! let load = Task::new(|| load_textures()).into_handle();
//! let upload = Task::new(|| upload_textures()).into_handle();
//! upload.add_dependency(&load)?;
//!
//! jobs.submit(QueueType::Render, upload.clone())?;
//! jobs.submit(QueueType::Loading, load)?;
//! upload.join()?;
//! ```

mod config;
mod error;
mod jobsystem;
mod queue;
mod task;
mod worker;

pub use config::JobsystemConfig;
pub use error::{JobError, TaskError};
pub use jobsystem::{Jobsystem, JobsystemStats, QueueStats, QueueType};
pub use queue::WorkerQueue;
pub use task::{Task, TaskFn, TaskHandle, TaskId, TaskResult, TaskStatus};
pub use worker::{WorkerStats, WorkerThread};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
