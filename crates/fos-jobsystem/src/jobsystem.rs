//! Jobsystem
//!
//! Fixed set of (queue, worker) pairs, one per queue type. Render work is
//! confined to its own thread, loading work to another, and everything else
//! to the general worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::JobsystemConfig;
use crate::error::JobError;
use crate::queue::WorkerQueue;
use crate::task::TaskHandle;
use crate::worker::{WorkerStats, WorkerThread};

/// Queue affinity of submitted work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Work that must run on the render thread (owns the graphics context)
    Render,
    /// Asset streaming and other blocking loads
    Loading,
    /// Any other background work
    Worker,
}

impl QueueType {
    /// Every queue type, in slot order
    pub const ALL: [QueueType; 3] = [Self::Render, Self::Loading, Self::Worker];

    /// Get queue name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Loading => "loading",
            Self::Worker => "worker",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_type: QueueType,
    pub pending: usize,
    pub worker: WorkerStats,
}

/// Job system statistics
#[derive(Debug, Clone, Default)]
pub struct JobsystemStats {
    pub queues: Vec<QueueStats>,
}

impl JobsystemStats {
    /// Pending tasks across all queues
    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.pending).sum()
    }

    /// Tasks executed across all workers
    pub fn total_executed(&self) -> u64 {
        self.queues.iter().map(|q| q.worker.executed).sum()
    }

    /// Failed tasks across all workers
    pub fn total_failed(&self) -> u64 {
        self.queues.iter().map(|q| q.worker.failed).sum()
    }

    /// Tasks executing right now
    pub fn total_active(&self) -> usize {
        self.queues.iter().map(|q| q.worker.active).sum()
    }
}

struct Slot {
    queue_type: QueueType,
    queue: Arc<WorkerQueue>,
    worker: WorkerThread,
}

/// Owns one queue and one worker thread per `QueueType`
pub struct Jobsystem {
    slots: Vec<Slot>,
    config: JobsystemConfig,
    stopped: bool,
}

impl std::fmt::Debug for Jobsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jobsystem")
            .field("workers", &self.slots.iter().map(|s| &s.worker).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl Jobsystem {
    /// Create every queue and start every worker thread
    pub fn new(config: JobsystemConfig) -> Result<Self, JobError> {
        let mut jobsystem = Self {
            slots: Vec::with_capacity(QueueType::ALL.len()),
            config,
            stopped: false,
        };

        for queue_type in QueueType::ALL {
            let queue = Arc::new(WorkerQueue::new(queue_type.name()));
            let mut worker = WorkerThread::new(
                jobsystem.config.thread_name(queue_type.name()),
                Arc::clone(&queue),
            );
            // Already started workers are stopped by Drop on error.
            worker.start(&jobsystem.config)?;

            jobsystem.slots.push(Slot {
                queue_type,
                queue,
                worker,
            });
        }

        tracing::info!("Jobsystem started with {} worker threads", jobsystem.slots.len());
        Ok(jobsystem)
    }

    /// Get job system configuration
    pub fn config(&self) -> &JobsystemConfig {
        &self.config
    }

    /// Queue servicing `queue_type`
    pub fn queue(&self, queue_type: QueueType) -> &Arc<WorkerQueue> {
        &self.slot(queue_type).queue
    }

    /// Submit a task to the queue for `queue_type`
    pub fn submit(&self, queue_type: QueueType, task: TaskHandle) -> Result<(), JobError> {
        self.queue(queue_type).add_task(task)
    }

    /// Worker thread servicing `queue_type`
    pub fn worker(&self, queue_type: QueueType) -> &WorkerThread {
        &self.slot(queue_type).worker
    }

    /// Get job system statistics
    pub fn stats(&self) -> JobsystemStats {
        JobsystemStats {
            queues: self
                .slots
                .iter()
                .map(|slot| QueueStats {
                    queue_type: slot.queue_type,
                    pending: slot.queue.len(),
                    worker: slot.worker.stats(),
                })
                .collect(),
        }
    }

    /// True if nothing is pending or executing
    pub fn is_idle(&self) -> bool {
        let stats = self.stats();
        stats.total_pending() == 0 && stats.total_active() == 0
    }

    /// Close every queue and stop every worker.
    ///
    /// Tasks still pending never run; they complete with
    /// `TaskError::Abandoned` so their joiners return.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        for slot in &self.slots {
            slot.queue.destroy();
        }

        let mut abandoned = 0;
        for slot in &mut self.slots {
            slot.worker.destroy();
            for task in slot.queue.drain() {
                if task.abandon() {
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            tracing::warn!("Jobsystem shut down with {} tasks never run", abandoned);
        }
        tracing::info!("Jobsystem stopped");
    }

    fn slot(&self, queue_type: QueueType) -> &Slot {
        &self.slots[queue_type.index()]
    }
}

impl Drop for Jobsystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn test_queue_lookup() {
        let jobsystem = Jobsystem::new(JobsystemConfig::default()).unwrap();

        for queue_type in QueueType::ALL {
            assert_eq!(jobsystem.queue(queue_type).name(), queue_type.name());
            assert!(jobsystem.worker(queue_type).is_running());
            assert_eq!(
                jobsystem.worker(queue_type).name(),
                format!("fos-{}", queue_type.name())
            );
        }
    }

    #[test]
    fn test_submit_runs_on_affined_thread() {
        let jobsystem = Jobsystem::new(JobsystemConfig::default()).unwrap();
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let tasks: Vec<_> = QueueType::ALL
            .iter()
            .map(|&queue_type| {
                let names = Arc::clone(&names);
                let task = Task::new(move || {
                    let name = thread::current().name().unwrap_or_default().to_string();
                    names.lock().push((queue_type, name));
                })
                .into_handle();
                jobsystem.submit(queue_type, Arc::clone(&task)).unwrap();
                task
            })
            .collect();

        for task in &tasks {
            task.join().unwrap();
        }

        for (queue_type, name) in names.lock().iter() {
            assert_eq!(*name, format!("fos-{}", queue_type.name()));
        }
        assert_eq!(names.lock().len(), 3);
    }

    #[test]
    fn test_stats_and_idle() {
        let mut jobsystem = Jobsystem::new(JobsystemConfig::default()).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let task = Task::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .into_handle();
                jobsystem.submit(QueueType::Worker, Arc::clone(&task)).unwrap();
                task
            })
            .collect();

        for task in &tasks {
            task.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(jobsystem.stats().total_pending(), 0);

        jobsystem.shutdown();
        assert!(jobsystem.is_idle());
    }

    #[test]
    fn test_shutdown_rejects_submissions() {
        let mut jobsystem = Jobsystem::new(JobsystemConfig::default()).unwrap();
        let queue = Arc::clone(jobsystem.queue(QueueType::Loading));

        jobsystem.shutdown();
        jobsystem.shutdown();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.add_task(Task::new(|| {}).into_handle()),
            Err(JobError::QueueClosed { .. })
        ));
    }

    #[test]
    fn test_queue_type_names() {
        assert_eq!(QueueType::Render.name(), "render");
        assert_eq!(QueueType::ALL[QueueType::Loading.index()], QueueType::Loading);
    }
}
