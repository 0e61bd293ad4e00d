//! Worker Thread
//!
//! A dedicated OS thread bound to one `WorkerQueue`. It waits for eligible
//! tasks and executes them one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::JobsystemConfig;
use crate::error::JobError;
use crate::queue::WorkerQueue;

/// Execution counters shared with the worker thread
#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
}

/// Snapshot of a worker's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tasks executed, including failed ones
    pub executed: u64,
    /// Tasks whose outcome was an error
    pub failed: u64,
    /// Tasks currently executing (0 or 1)
    pub active: usize,
}

/// Wait bounds for the worker loop
#[derive(Clone, Copy)]
struct Timing {
    idle_timeout: Duration,
    stall_backoff: Duration,
}

/// One OS thread draining one queue
pub struct WorkerThread {
    /// Thread name
    name: String,
    /// Queue serviced by this thread
    queue: Arc<WorkerQueue>,
    /// Running flag
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    /// Thread handle
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("queue", &self.queue.name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WorkerThread {
    /// Create a stopped worker for `queue`
    pub fn new(name: impl Into<String>, queue: Arc<WorkerQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            thread: None,
        }
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue this thread drains
    pub fn queue(&self) -> &Arc<WorkerQueue> {
        &self.queue
    }

    /// Spawn the native thread. Starting a running worker is a no-op.
    pub fn start(&mut self, config: &JobsystemConfig) -> Result<(), JobError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let timing = Timing {
            idle_timeout: config.idle_timeout,
            stall_backoff: config.stall_backoff,
        };

        self.running.store(true, Ordering::Release);
        let thread = builder
            .spawn(move || Self::run_loop(&queue, &running, &counters, timing))
            .map_err(|source| {
                self.running.store(false, Ordering::Release);
                JobError::Spawn {
                    name: self.name.clone(),
                    source,
                }
            })?;

        tracing::debug!("Worker {} started on queue {}", self.name, self.queue.name());
        self.thread = Some(thread);
        Ok(())
    }

    /// Check if the thread is running
    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Get execution counters
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            executed: self.counters.executed.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            active: self.counters.active.load(Ordering::Acquire),
        }
    }

    /// Stop the loop and join the thread.
    ///
    /// Waits for a task already executing; pending tasks stay in the queue.
    pub fn destroy(&mut self) {
        self.running.store(false, Ordering::Release);
        self.queue.wake_all();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Worker {} terminated abnormally", self.name);
            }
            tracing::debug!("Worker {} stopped", self.name);
        }
    }

    /// Worker thread main loop
    fn run_loop(queue: &WorkerQueue, running: &AtomicBool, counters: &Counters, timing: Timing) {
        while running.load(Ordering::Acquire) {
            if !queue.wait_for_task_timeout(timing.idle_timeout) {
                if queue.is_closed() {
                    break;
                }
                continue;
            }

            let seen = queue.generation();
            let Some(task) = queue.pop_next_task() else {
                // Everything pending waits on tasks owned by other queues.
                queue.wait_for_submission(seen, timing.stall_backoff);
                continue;
            };

            counters.active.fetch_add(1, Ordering::AcqRel);
            let outcome = task.execute();
            counters.active.fetch_sub(1, Ordering::AcqRel);

            counters.executed.fetch_add(1, Ordering::AcqRel);
            if outcome.is_err() {
                counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use parking_lot::Mutex;

    fn start_worker(name: &str) -> WorkerThread {
        let queue = Arc::new(WorkerQueue::new(name));
        let mut worker = WorkerThread::new(format!("test-{name}"), queue);
        worker.start(&JobsystemConfig::default()).unwrap();
        worker
    }

    #[test]
    fn test_worker_executes_task() {
        let mut worker = start_worker("exec");
        let flag = Arc::new(AtomicBool::new(false));

        let flag_clone = Arc::clone(&flag);
        let task = Task::new(move || flag_clone.store(true, Ordering::SeqCst)).into_handle();
        worker.queue().add_task(Arc::clone(&task)).unwrap();

        task.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
        assert!(task.is_done());

        worker.destroy();
        assert!(!worker.is_running());
        assert_eq!(worker.stats().executed, 1);
    }

    #[test]
    fn test_worker_thread_name() {
        let worker = start_worker("named");
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = Arc::clone(&seen);
        let task = Task::new(move || {
            *seen_clone.lock() = thread::current().name().map(str::to_string);
        })
        .into_handle();
        worker.queue().add_task(Arc::clone(&task)).unwrap();
        task.join().unwrap();

        assert_eq!(seen.lock().as_deref(), Some("test-named"));
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let mut worker = start_worker("panic");

        let bad = Task::new(|| panic!("bad mesh")).into_handle();
        let good = Task::new(|| {}).into_handle();
        worker.queue().add_task(Arc::clone(&bad)).unwrap();
        worker.queue().add_task(Arc::clone(&good)).unwrap();

        assert!(bad.join().is_err());
        assert!(good.join().is_ok());
        assert!(worker.is_running());

        worker.destroy();
        let stats = worker.stats();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_cross_queue_dependency() {
        let upstream = start_worker("upstream");
        let downstream = start_worker("downstream");
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        let a = Task::new(move || {
            thread::sleep(Duration::from_millis(20));
            order_a.lock().push("a");
        })
        .into_handle();
        let order_b = Arc::clone(&order);
        let b = Task::new(move || order_b.lock().push("b")).into_handle();
        b.add_dependency(&a).unwrap();

        downstream.queue().add_task(Arc::clone(&b)).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(!b.has_started());

        upstream.queue().add_task(Arc::clone(&a)).unwrap();
        b.join().unwrap();

        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut worker = start_worker("stop");
        assert!(worker.is_running());

        worker.destroy();
        worker.destroy();

        assert!(!worker.is_running());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut worker = start_worker("twice");
        worker.start(&JobsystemConfig::default()).unwrap();

        assert!(worker.is_running());
        assert_eq!(worker.name(), "test-twice");
    }
}
