//! Worker Queue
//!
//! Pending tasks for a single worker thread. Any thread may submit; the
//! owning worker pops the first task whose dependencies have started.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::JobError;
use crate::task::TaskHandle;

/// Thread-safe holding area of pending tasks for one worker
pub struct WorkerQueue {
    /// Queue name (used in logs and thread names)
    name: String,
    /// Pending tasks in submission order
    pending: RwLock<VecDeque<TaskHandle>>,
    /// Submission generation, guards the condvar
    signal: Mutex<u64>,
    /// Condition variable for waiting
    condvar: Condvar,
    /// Shutdown flag
    closed: AtomicBool,
}

impl std::fmt::Debug for WorkerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerQueue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WorkerQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: RwLock::new(VecDeque::new()),
            signal: Mutex::new(0),
            condvar: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Get queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a task and wake the consumer
    pub fn add_task(&self, task: TaskHandle) -> Result<(), JobError> {
        {
            let mut pending = self.pending.write();

            if self.is_closed() {
                return Err(JobError::QueueClosed {
                    queue: self.name.clone(),
                });
            }
            if pending.iter().any(|queued| Arc::ptr_eq(queued, &task)) {
                return Err(JobError::AlreadyQueued {
                    task: task.id(),
                    queue: self.name.clone(),
                });
            }

            tracing::trace!("Queue {}: submitted task {} ({})", self.name, task.id(), task.name());
            pending.push_back(task);
        }

        *self.signal.lock() += 1;
        self.condvar.notify_one();
        Ok(())
    }

    /// Check if no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }

    /// Get pending task count
    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    /// Check if the queue has been destroyed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove the first task, in submission order, whose dependencies have
    /// all started. Ineligible tasks keep their position.
    pub fn pop_next_task(&self) -> Option<TaskHandle> {
        let mut pending = self.pending.write();
        let index = pending
            .iter()
            .position(|task| task.check_dependencies_started())?;
        pending.remove(index)
    }

    /// Block until a task is pending or the queue is closed
    pub fn wait_for_task(&self) {
        let mut generation = self.signal.lock();
        while self.is_empty() && !self.is_closed() {
            self.condvar.wait(&mut generation);
        }
    }

    /// Like `wait_for_task`, but gives up after `timeout`.
    ///
    /// Returns true if a task is pending.
    pub fn wait_for_task_timeout(&self, timeout: Duration) -> bool {
        let mut generation = self.signal.lock();
        if self.is_empty() && !self.is_closed() {
            self.condvar.wait_for(&mut generation, timeout);
        }
        !self.is_empty()
    }

    /// Current submission generation
    pub fn generation(&self) -> u64 {
        *self.signal.lock()
    }

    /// Sleep until a submission newer than `seen`, a wake-up, or `timeout`.
    ///
    /// Used when tasks are pending but none is eligible yet.
    pub fn wait_for_submission(&self, seen: u64, timeout: Duration) {
        let mut generation = self.signal.lock();
        if *generation == seen {
            self.condvar.wait_for(&mut generation, timeout);
        }
    }

    /// Wake every waiter without changing queue state
    pub fn wake_all(&self) {
        let _generation = self.signal.lock();
        self.condvar.notify_all();
    }

    /// Close the queue: reject new submissions and release every waiter.
    ///
    /// Tasks already pending stay queued until drained.
    pub fn destroy(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Queue {} closed with {} pending tasks", self.name, self.len());
        }
        self.wake_all();
    }

    /// Remove and return every pending task
    pub fn drain(&self) -> Vec<TaskHandle> {
        self.pending.write().drain(..).collect()
    }
}
