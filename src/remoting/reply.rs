//! Single-assignment reply slot for an outstanding request.
//!
//! A [`ReplyFuture`] leaves the pending state exactly once, through
//! [`ReplyFuture::complete`]. Whoever wins that transition (the receive path,
//! a send failure, the reaper or shutdown) owns the follow-up work: waking
//! waiters and, for callback-style futures, running the callback.

use crate::core::TransportError;
use crate::protocol::Command;
use crate::util::{lock, panic_message};
use log::warn;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Callback run once when a callback-style future completes.
pub type ReplyCallback = Box<dyn FnOnce(&ReplyFuture) + Send + 'static>;

/// Whether the request carried by a future reached the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Unknown,
    Sent,
    Failed,
}

impl SendState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Sent,
            2 => Self::Failed,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Sent => 1,
            Self::Failed => 2,
        }
    }
}

pub struct ReplyFuture {
    opaque: u64,
    timeout: Duration,
    created_at: Instant,
    begin_wait: OnceLock<Instant>,
    completed: AtomicBool,
    sent: AtomicU8,
    response: Mutex<Option<Command>>,
    cause: Mutex<Option<TransportError>>,
    callback: Mutex<Option<ReplyCallback>>,
    async_callback: bool,
    notify: Notify,
}

impl ReplyFuture {
    /// Future for a caller that waits with [`wait_for`](Self::wait_for)
    pub fn new(opaque: u64, timeout: Duration) -> Self {
        Self::build(opaque, timeout, None)
    }

    /// Future that runs `callback` on completion instead of being awaited
    pub fn with_callback<F>(opaque: u64, timeout: Duration, callback: F) -> Self
    where
        F: FnOnce(&ReplyFuture) + Send + 'static,
    {
        Self::build(opaque, timeout, Some(Box::new(callback)))
    }

    fn build(opaque: u64, timeout: Duration, callback: Option<ReplyCallback>) -> Self {
        Self {
            opaque,
            timeout,
            created_at: Instant::now(),
            begin_wait: OnceLock::new(),
            completed: AtomicBool::new(false),
            sent: AtomicU8::new(SendState::Unknown.as_u8()),
            response: Mutex::new(None),
            cause: Mutex::new(None),
            async_callback: callback.is_some(),
            callback: Mutex::new(callback),
            notify: Notify::new(),
        }
    }

    pub fn opaque(&self) -> u64 {
        self.opaque
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When a waiter first started waiting, if any did
    pub fn begin_wait_at(&self) -> Option<Instant> {
        self.begin_wait.get().copied()
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the future is older than its timeout plus `guard`
    ///
    /// A timeout too large to add the guard to never expires.
    pub fn is_expired(&self, guard: Duration) -> bool {
        self.elapsed() > self.timeout.saturating_add(guard)
    }

    pub fn is_async_callback(&self) -> bool {
        self.async_callback
    }

    pub fn send_state(&self) -> SendState {
        SendState::from_u8(self.sent.load(Ordering::Acquire))
    }

    pub fn is_sent(&self) -> bool {
        self.send_state() == SendState::Sent
    }

    pub fn set_sent(&self, sent: bool) {
        let state = if sent { SendState::Sent } else { SendState::Failed };
        self.sent.store(state.as_u8(), Ordering::Release);
    }

    pub fn cause(&self) -> Option<TransportError> {
        lock(&self.cause).clone()
    }

    pub fn set_cause(&self, cause: TransportError) {
        *lock(&self.cause) = Some(cause);
    }

    /// The reply, if the future completed with one
    pub fn response(&self) -> Option<Command> {
        lock(&self.response).clone()
    }

    pub fn is_done(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Move out of the pending state.
    ///
    /// `None` completes the future without a reply (send failure, timeout,
    /// shutdown). Returns `false` if the future had already completed, in
    /// which case nothing changes.
    pub fn complete(&self, response: Option<Command>) -> bool {
        // Held across the flag flip so readers that see `completed` also see the reply.
        let mut slot = lock(&self.response);
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *slot = response;
        drop(slot);
        self.notify.notify_waiters();
        true
    }

    /// Wait until the future completes or `timeout` elapses.
    ///
    /// Returns the reply, or `None` if the future completed without one or
    /// the deadline passed first. The deadline is local to this call and does
    /// not depend on the reaper. A timeout past the clock's range waits for
    /// completion only.
    pub async fn wait_for(&self, timeout: Duration) -> Option<Command> {
        let _ = self.begin_wait.set(Instant::now());
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done() {
                return self.response();
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return if self.is_done() { self.response() } else { None };
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Run the stored callback if it has not run yet.
    ///
    /// A panicking callback is logged and contained. Returns whether a
    /// callback ran.
    pub fn invoke_callback(&self) -> bool {
        let callback = lock(&self.callback).take();
        let Some(callback) = callback else {
            return false;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
            warn!(
                "reply callback for opaque {} panicked: {}",
                self.opaque,
                panic_message(payload.as_ref())
            );
        }
        true
    }
}

impl std::fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("opaque", &self.opaque)
            .field("timeout", &self.timeout)
            .field("elapsed", &self.elapsed())
            .field("sent", &self.send_state())
            .field("done", &self.is_done())
            .field("async_callback", &self.async_callback)
            .finish()
    }
}

impl std::fmt::Display for ReplyFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ReplyFuture[opaque={}, timeout={}ms, elapsed={}ms, sent={:?}]",
            self.opaque,
            self.timeout.as_millis(),
            self.elapsed().as_millis(),
            self.send_state()
        )
    }
}
