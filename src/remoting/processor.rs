use crate::protocol::Command;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Business handler for inbound requests of one or more command codes.
///
/// Besides processing, a processor owns an admission gate: the dispatcher
/// calls [`try_acquire_failure`](Self::try_acquire_failure) before queueing
/// work and answers `SYSTEM_BUSY` when it returns `true`. Every successful
/// acquisition is paired with exactly one [`release`](Self::release).
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    /// Handle `command`, optionally producing a response.
    ///
    /// The returned command is tagged with the request's opaque and the
    /// reply flag by the dispatcher. Errors become `SYSTEM_ERROR` replies.
    async fn process_command(&self, command: Command) -> anyhow::Result<Option<Command>>;

    /// Try to take a concurrency slot, waiting at most `timeout`.
    ///
    /// Returns `true` when the slot could NOT be acquired.
    async fn try_acquire_failure(&self, timeout: Duration) -> bool;

    /// Return a slot taken by a successful `try_acquire_failure`
    fn release(&self);
}

/// Counting gate bounding concurrent executions of a processor.
///
/// Processors typically embed one and forward their admission methods to it.
#[derive(Debug)]
pub struct AdmissionGate {
    permits: Semaphore,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Semaphore::new(capacity),
            capacity,
        }
    }

    /// See [`CommandProcessor::try_acquire_failure`]
    pub async fn try_acquire_failure(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => {
                // Returned explicitly through `release`.
                permit.forget();
                false
            }
            _ => true,
        }
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

/// An acquired admission slot, released when dropped.
///
/// Owned by the unit of work submitted to an execution pool, so the slot goes
/// back on every exit path: normal completion, processing failure, panic, and
/// a pool that drops the task without running it.
pub struct AdmissionSlot {
    processor: Arc<dyn CommandProcessor>,
}

impl AdmissionSlot {
    /// Wrap a slot already acquired from `processor`
    pub(crate) fn acquired(processor: Arc<dyn CommandProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Arc<dyn CommandProcessor> {
        &self.processor
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.processor.release();
    }
}
