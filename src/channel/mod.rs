//! Transport-facing seam of the remoting core.
//!
//! A [`Channel`] is an asynchronous write capability plus a peer address.
//! Writes return a [`WriteFuture`] that resolves once the command has been
//! flushed (or failed); the core attaches completion observers to it rather
//! than awaiting it on the caller's path.

pub mod memory;
pub mod tcp;

use crate::core::TransportError;
use crate::protocol::Command;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Completion signal of a single write
pub type WriteFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Shared handle to a connection
pub type ChannelRef = Arc<dyn Channel>;

pub trait Channel: Send + Sync {
    /// Queue `command` for writing and flushing
    fn write_and_flush(&self, command: Command) -> WriteFuture;

    /// Printable peer address, empty when unknown
    fn remote_address(&self) -> String;
}

/// Run `observer` once `write` completes.
///
/// A write that has already completed is observed inline on the calling task,
/// so immediate failures are visible before the caller returns. Pending writes
/// are observed from a spawned task and never block the caller.
pub(crate) fn observe_write<F>(write: WriteFuture, observer: F)
where
    F: FnOnce(Result<(), TransportError>) + Send + 'static,
{
    let mut write = write;
    match (&mut write).now_or_never() {
        Some(result) => observer(result),
        None => {
            tokio::spawn(async move {
                observer(write.await);
            });
        }
    }
}

/// A write future that has already completed with `result`
pub fn ready_write(result: Result<(), TransportError>) -> WriteFuture {
    futures::future::ready(result).boxed()
}
