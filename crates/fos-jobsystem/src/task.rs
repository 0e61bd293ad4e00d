//! Task
//!
//! A unit of deferred work: a stored callable, non-owning dependency edges,
//! a tri-state status and a broadcast completion signal.
//!
//! Dependencies are held as `Weak` references. A task never keeps the tasks
//! it depends on alive, and an edge whose target has been dropped no longer
//! constrains anything.

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::{JobError, TaskError};

/// Task ID counter
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Serializes edge insertion so the cycle check sees a stable graph
static GRAPH_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task body. `FnMut` so a reset task can run it again.
pub type TaskFn = Box<dyn FnMut() + Send + 'static>;

/// Shared handle to a task (submitter, queue and dependents)
pub type TaskHandle = Arc<Task>;

/// Outcome of one execution
pub type TaskResult = Result<(), TaskError>;

/// Execution status of a Task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    NotStarted = 0,
    Started = 1,
    Done = 2,
}

impl TaskStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Started,
            _ => Self::Done,
        }
    }

    /// Get status name
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Started => "started",
            Self::Done => "done",
        }
    }
}

/// Completion signal state
#[derive(Default)]
struct Completion {
    /// Bumped by every reset; joiners of an older cycle stop waiting
    cycle: u64,
    /// Outcome of the current cycle
    outcome: Option<TaskResult>,
    /// Outcome of the cycle retired by the last reset
    retired: Option<TaskResult>,
}

/// A unit of work with dependency edges and a completion signal
pub struct Task {
    id: TaskId,
    name: String,
    body: Mutex<TaskFn>,
    status: AtomicU8,
    /// Set by the first `execute` of a cycle
    claimed: AtomicBool,
    completion: Mutex<Completion>,
    completed: Condvar,
    dependencies: Mutex<Vec<Weak<Task>>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("dependencies", &self.dependencies.lock().len())
            .finish()
    }
}

impl Task {
    /// Create a new task wrapping `body`
    pub fn new<F>(body: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let id = TaskId::next();
        Self {
            id,
            name: format!("task-{}", id.0),
            body: Mutex::new(Box::new(body)),
            status: AtomicU8::new(TaskStatus::NotStarted as u8),
            claimed: AtomicBool::new(false),
            completion: Mutex::new(Completion::default()),
            completed: Condvar::new(),
            dependencies: Mutex::new(Vec::new()),
        }
    }

    /// Set the name used in logs and errors
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Wrap into a shared handle for submission
    pub fn into_handle(self) -> TaskHandle {
        Arc::new(self)
    }

    /// Get task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status, without blocking
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// True once the body has begun (or finished)
    pub fn has_started(&self) -> bool {
        self.status() != TaskStatus::NotStarted
    }

    /// True once completion has been published
    pub fn is_done(&self) -> bool {
        self.status() == TaskStatus::Done
    }

    /// Number of recorded dependency edges, resolvable or not
    pub fn dependency_count(&self) -> usize {
        self.dependencies.lock().len()
    }

    /// Record that this task must not run before `dependency` completes.
    ///
    /// The edge is non-owning. Adding an edge that is already present is a
    /// no-op; an edge that would close a cycle is rejected. Edge insertion
    /// is serialized process-wide, so concurrent callers cannot close a
    /// cycle between them.
    pub fn add_dependency(&self, dependency: &TaskHandle) -> Result<(), JobError> {
        if self.claimed.load(Ordering::Acquire) || self.has_started() {
            return Err(JobError::AlreadyStarted { task: self.id });
        }

        let _graph = GRAPH_LOCK.lock();

        if ptr::eq(Arc::as_ptr(dependency), self) || dependency.depends_on(self) {
            return Err(JobError::DependencyCycle {
                task: self.id,
                dependency: dependency.id,
            });
        }

        let mut dependencies = self.dependencies.lock();
        let target = Arc::as_ptr(dependency);
        if !dependencies.iter().any(|edge| ptr::eq(edge.as_ptr(), target)) {
            dependencies.push(Arc::downgrade(dependency));
        }
        Ok(())
    }

    /// True if every still-resolvable dependency has at least started.
    ///
    /// Governs queue eligibility only; `execute` still waits for each
    /// dependency to finish before running the body.
    pub fn check_dependencies_started(&self) -> bool {
        self.dependencies
            .lock()
            .iter()
            .all(|edge| edge.upgrade().is_none_or(|dependency| dependency.has_started()))
    }

    /// Run the task on the calling thread.
    ///
    /// Blocks on every unfinished dependency first. The body runs at most
    /// once per cycle; a repeated call waits for the first one's outcome.
    pub fn execute(&self) -> TaskResult {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return self.join();
        }

        let outcome = match self.wait_for_dependencies() {
            Ok(()) => {
                self.status.store(TaskStatus::Started as u8, Ordering::Release);
                tracing::trace!("Running task {} ({})", self.id, self.name);
                self.run_body()
            }
            Err(err) => {
                tracing::debug!("{}", err);
                self.status.store(TaskStatus::Started as u8, Ordering::Release);
                Err(err)
            }
        };

        self.publish(outcome.clone());
        outcome
    }

    /// Block until this task's current cycle completes.
    ///
    /// Returns immediately when already done. Every joiner receives the same
    /// outcome.
    pub fn join(&self) -> TaskResult {
        let mut completion = self.completion.lock();
        let mut cycle = completion.cycle;

        loop {
            if let Some(outcome) = &completion.outcome {
                return outcome.clone();
            }
            if completion.cycle != cycle {
                // A cycle retired before it ran has no outcome; follow the
                // new cycle instead.
                match &completion.retired {
                    Some(outcome) => return outcome.clone(),
                    None => cycle = completion.cycle,
                }
            }
            self.completed.wait(&mut completion);
        }
    }

    /// Recycle the task: clears status, completion and dependencies, keeps
    /// the body.
    ///
    /// Ignored while an execution is still in flight.
    pub fn reset(&self) {
        let mut completion = self.completion.lock();
        if self.claimed.load(Ordering::Acquire) && completion.outcome.is_none() {
            tracing::warn!("Ignoring reset of task {} while it is executing", self.id);
            return;
        }

        self.dependencies.lock().clear();
        completion.retired = completion.outcome.take();
        completion.cycle += 1;
        self.status.store(TaskStatus::NotStarted as u8, Ordering::Release);
        self.claimed.store(false, Ordering::Release);
        drop(completion);
        self.completed.notify_all();
    }

    /// Complete a task that will never run, releasing its joiners.
    ///
    /// No-op if an execution has already claimed this cycle.
    pub(crate) fn abandon(&self) -> bool {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.status.store(TaskStatus::Started as u8, Ordering::Release);
        self.publish(Err(TaskError::Abandoned { task: self.id }));
        true
    }

    fn wait_for_dependencies(&self) -> TaskResult {
        for dependency in self.resolved_dependencies() {
            if dependency.join().is_err() {
                return Err(TaskError::DependencyFailed {
                    task: self.id,
                    dependency: dependency.id,
                });
            }
        }
        Ok(())
    }

    fn run_body(&self) -> TaskResult {
        let mut guard = self.body.lock();
        let body = &mut **guard;
        panic::catch_unwind(AssertUnwindSafe(|| body())).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!("Task {} ({}) panicked: {}", self.id, self.name, message);
            TaskError::Panicked {
                task: self.id,
                message,
            }
        })
    }

    fn publish(&self, outcome: TaskResult) {
        let mut completion = self.completion.lock();
        completion.outcome = Some(outcome);
        self.status.store(TaskStatus::Done as u8, Ordering::Release);
        drop(completion);
        self.completed.notify_all();
    }

    fn resolved_dependencies(&self) -> Vec<TaskHandle> {
        self.dependencies
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// True if `target` is reachable through this task's dependency edges
    fn depends_on(&self, target: &Task) -> bool {
        let mut pending = self.resolved_dependencies();
        let mut visited = HashSet::new();

        while let Some(task) = pending.pop() {
            if ptr::eq(Arc::as_ptr(&task), target) {
                return true;
            }
            if visited.insert(Arc::as_ptr(&task) as usize) {
                pending.extend(task.resolved_dependencies());
            }
        }
        false
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
