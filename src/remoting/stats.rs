use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the dispatcher, the reaper and the invocation paths
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub late_replies: AtomicU64,
    pub reaped: AtomicU64,
    pub busy_rejections: AtomicU64,
    pub unsupported: AtomicU64,
    pub processing_failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: usize) -> RemotingStats {
        RemotingStats {
            in_flight,
            late_replies: self.late_replies.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a service's correlation and dispatch activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemotingStats {
    /// Requests still waiting for a reply
    pub in_flight: usize,
    /// Replies that found no waiter
    pub late_replies: u64,
    /// Futures evicted by the reaper
    pub reaped: u64,
    /// Requests answered with `SYSTEM_BUSY`
    pub busy_rejections: u64,
    /// Requests answered with `COMMAND_CODE_NOT_SUPPORTED`
    pub unsupported: u64,
    /// Requests answered with `SYSTEM_ERROR`
    pub processing_failures: u64,
}

impl std::fmt::Display for RemotingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Remoting Stats: {} in flight, {} late replies, {} reaped, {} busy, {} unsupported, {} failed",
            self.in_flight,
            self.late_replies,
            self.reaped,
            self.busy_rejections,
            self.unsupported,
            self.processing_failures
        )
    }
}
