//! Execution pools for inbound processing and callbacks.

use crate::util::{lock, panic_message};
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Unit of work accepted by an [`ExecutionPool`]
pub type Task = BoxFuture<'static, ()>;

/// Submission refused by a saturated or closed pool.
///
/// Carries the task back so the caller decides what happens to it; dropping
/// it drops everything it owns.
pub struct RejectedTask {
    pub task: Task,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    Closed,
}

impl std::fmt::Debug for RejectedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectedTask")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for RejectedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason {
            RejectReason::QueueFull => write!(f, "execution pool queue is full"),
            RejectReason::Closed => write!(f, "execution pool is closed"),
        }
    }
}

/// Where the dispatcher runs processing work and where callbacks may run.
///
/// `submit` must not block: it either accepts the task or rejects it at once.
pub trait ExecutionPool: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), RejectedTask>;

    fn name(&self) -> &str;
}

/// Runs every task on its own tokio task; never rejects.
#[derive(Debug, Clone)]
pub struct SpawnPool {
    name: String,
}

impl SpawnPool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl ExecutionPool for SpawnPool {
    fn submit(&self, task: Task) -> Result<(), RejectedTask> {
        tokio::spawn(task);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fixed number of workers draining a bounded queue.
///
/// Submissions beyond the queue capacity are rejected instead of buffered.
pub struct TaskPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: usize,
    queue_capacity: usize,
    completed: Arc<AtomicUsize>,
}

impl TaskPool {
    /// Start `workers` worker tasks on the current tokio runtime
    pub fn new(name: &str, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<Task>(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let completed = Arc::new(AtomicUsize::new(0));

        for worker in 0..workers {
            let receiver = Arc::clone(&receiver);
            let completed = Arc::clone(&completed);
            let pool_name = name.to_string();
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(task) = next else {
                        break;
                    };
                    if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                        warn!(
                            "{}-{} task panicked: {}",
                            pool_name,
                            worker,
                            panic_message(payload.as_ref())
                        );
                    }
                    completed.fetch_add(1, Ordering::Relaxed);
                }
                debug!("{}-{} stopped", pool_name, worker);
            });
        }

        Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers,
            queue_capacity,
            completed,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        match lock(&self.sender).as_ref() {
            Some(sender) => self.queue_capacity - sender.capacity(),
            None => 0,
        }
    }

    /// Tasks that finished (including panicked ones)
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Stop accepting work; queued tasks still run
    pub fn close(&self) {
        lock(&self.sender).take();
    }
}

impl ExecutionPool for TaskPool {
    fn submit(&self, task: Task) -> Result<(), RejectedTask> {
        let guard = lock(&self.sender);
        let Some(sender) = guard.as_ref() else {
            return Err(RejectedTask {
                task,
                reason: RejectReason::Closed,
            });
        };
        sender.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(task) => RejectedTask {
                task,
                reason: RejectReason::QueueFull,
            },
            mpsc::error::TrySendError::Closed(task) => RejectedTask {
                task,
                reason: RejectReason::Closed,
            },
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("queued", &self.queued())
            .finish()
    }
}
