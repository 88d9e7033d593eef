//! The remoting service: invocation primitives on top of the reply table,
//! plus the inbound dispatcher and the timeout reaper.

use super::dispatcher::Dispatcher;
use super::pool::ExecutionPool;
use super::processor::CommandProcessor;
use super::reaper::TimeoutReaper;
use super::registry::ProcessorRegistry;
use super::reply::ReplyFuture;
use super::stats::{Counters, RemotingStats};
use super::table::ReplyTable;
use crate::channel::{ChannelRef, observe_write};
use crate::config::RemotingConfig;
use crate::core::{RemotingError, Result, TransportError};
use crate::protocol::{Command, ProtocolFactorySelector, ProtocolRegistry};
use futures::FutureExt;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Builder for [`RemotingService`]
///
/// Processor registrations happen here; the registry is frozen by
/// [`build`](Self::build).
pub struct RemotingServiceBuilder {
    config: RemotingConfig,
    registry: ProcessorRegistry,
    protocols: Option<Arc<dyn ProtocolFactorySelector>>,
    callback_pool: Option<Arc<dyn ExecutionPool>>,
}

impl RemotingServiceBuilder {
    /// Route `code` to `processor`, running on `pool`
    pub fn processor(
        mut self,
        code: i32,
        processor: Arc<dyn CommandProcessor>,
        pool: Arc<dyn ExecutionPool>,
    ) -> Self {
        self.registry.register(code, processor, pool);
        self
    }

    /// Route unregistered codes to `processor`
    pub fn default_processor(
        mut self,
        processor: Arc<dyn CommandProcessor>,
        pool: Arc<dyn ExecutionPool>,
    ) -> Self {
        self.registry.set_default(processor, pool);
        self
    }

    /// Pool for callbacks of asynchronous invocations
    ///
    /// Without one, callbacks run on the task that observed completion.
    pub fn callback_pool(mut self, pool: Arc<dyn ExecutionPool>) -> Self {
        self.callback_pool = Some(pool);
        self
    }

    pub fn protocols(mut self, protocols: Arc<dyn ProtocolFactorySelector>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    /// Validate the configuration and start the reaper.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<RemotingService> {
        self.config.validate()?;

        let replies = Arc::new(ReplyTable::new());
        let counters = Arc::new(Counters::default());
        let protocols = self
            .protocols
            .unwrap_or_else(|| Arc::new(ProtocolRegistry::with_defaults()));

        let dispatcher = Dispatcher::new(
            Arc::new(self.registry),
            Arc::clone(&replies),
            protocols,
            self.callback_pool,
            self.config.admission_timeout,
            Arc::clone(&counters),
        );
        let reaper = TimeoutReaper::start(
            Arc::clone(&replies),
            Arc::clone(&counters),
            self.config.reaper_schedule(),
        );

        Ok(RemotingService {
            config: self.config,
            replies,
            dispatcher,
            reaper,
            counters,
            next_opaque: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Request/response engine shared by every channel of one endpoint.
///
/// # Examples
///
/// ```
/// use rpcmux::{RemotingConfig, RemotingService};
///
/// # tokio_test::block_on(async {
/// let service = RemotingService::builder(RemotingConfig::default()).build().unwrap();
/// assert_eq!(service.stats().in_flight, 0);
/// # });
/// ```
pub struct RemotingService {
    config: RemotingConfig,
    replies: Arc<ReplyTable>,
    dispatcher: Dispatcher,
    reaper: TimeoutReaper,
    counters: Arc<Counters>,
    next_opaque: AtomicU64,
    shut_down: AtomicBool,
}

impl RemotingService {
    pub fn builder(config: RemotingConfig) -> RemotingServiceBuilder {
        RemotingServiceBuilder {
            config,
            registry: ProcessorRegistry::new(),
            protocols: None,
            callback_pool: None,
        }
    }

    pub fn config(&self) -> &RemotingConfig {
        &self.config
    }

    /// A fresh opaque for callers that do not manage their own
    pub fn next_opaque(&self) -> u64 {
        self.next_opaque.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `request` and wait for its reply.
    ///
    /// Fails with [`RemotingError::SendRequest`] when the write failed (or
    /// had not completed by the deadline) and with [`RemotingError::Timeout`]
    /// when the write succeeded but no reply arrived within `timeout`.
    pub async fn invoke_sync(
        &self,
        channel: &ChannelRef,
        request: Command,
        timeout: Duration,
    ) -> Result<Command> {
        let addr = channel.remote_address();
        self.ensure_running(&addr)?;

        let future = Arc::new(ReplyFuture::new(request.opaque(), timeout));
        let _pending = PendingEntry::register(&self.replies, &future);
        self.ensure_running(&addr)?;

        let observed = Arc::clone(&future);
        let replies = Arc::clone(&self.replies);
        let peer = addr.clone();
        observe_write(channel.write_and_flush(request), move |result| match result {
            Ok(()) => observed.set_sent(true),
            Err(cause) => {
                observed.set_sent(false);
                replies.remove_exact(&observed);
                warn!("send command to channel <{}> Error: {}", peer, cause);
                observed.set_cause(cause);
                observed.complete(None);
            }
        });

        match future.wait_for(timeout).await {
            Some(response) => Ok(response),
            None if future.is_sent() => Err(RemotingError::Timeout {
                addr,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                cause: future.cause(),
            }),
            None => Err(RemotingError::SendRequest {
                addr,
                cause: future.cause(),
            }),
        }
    }

    /// Send `request` and return immediately; `callback` runs exactly once
    /// with the completed future.
    ///
    /// The callback sees a response on success. Without one, it can tell a
    /// failed write (`send_state() == Failed`, with a cause) from a timeout
    /// (`is_sent()`). A write that fails before this call returns runs the
    /// callback inline, as does a shutdown racing this call. Callbacks may run
    /// on any task and must not block.
    pub fn invoke_async<F>(
        &self,
        channel: &ChannelRef,
        request: Command,
        timeout: Duration,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(&ReplyFuture) + Send + 'static,
    {
        let addr = channel.remote_address();
        self.ensure_running(&addr)?;

        let future = Arc::new(ReplyFuture::with_callback(
            request.opaque(),
            timeout,
            callback,
        ));
        self.replies.register(Arc::clone(&future));
        if self.is_shut_down() {
            // Shutdown drained the table before this registration; whoever
            // removes the entry fails it.
            if self.replies.remove_exact(&future) {
                future.set_sent(false);
                future.set_cause(TransportError::Closed);
                if future.complete(None) {
                    future.invoke_callback();
                }
            }
            return Ok(());
        }

        let replies = Arc::clone(&self.replies);
        observe_write(channel.write_and_flush(request), move |result| match result {
            Ok(()) => future.set_sent(true),
            Err(cause) => {
                future.set_sent(false);
                replies.remove_exact(&future);
                warn!("send command to channel <{}> Error: {}", addr, cause);
                future.set_cause(cause);
                if future.complete(None) {
                    future.invoke_callback();
                }
            }
        });
        Ok(())
    }

    /// Send `request` without expecting a reply.
    ///
    /// Nothing is registered for correlation. A write that has already failed
    /// is returned as [`RemotingError::SendRequest`]; later failures are only
    /// logged.
    pub fn invoke_oneway(&self, channel: &ChannelRef, mut request: Command) -> Result<()> {
        let addr = channel.remote_address();
        self.ensure_running(&addr)?;

        request.set_oneway();
        let mut write = channel.write_and_flush(request);
        match (&mut write).now_or_never() {
            Some(Ok(())) => Ok(()),
            Some(Err(cause)) => {
                warn!("send oneway command to channel <{}> Error: {}", addr, cause);
                Err(RemotingError::SendRequest {
                    addr,
                    cause: Some(cause),
                })
            }
            None => {
                tokio::spawn(async move {
                    if let Err(cause) = write.await {
                        warn!("send oneway command to channel <{}> Error: {}", addr, cause);
                    }
                });
                Ok(())
            }
        }
    }

    /// Handle one inbound command; see [`Dispatcher::dispatch`]
    pub async fn dispatch(&self, channel: &ChannelRef, command: Option<Command>) {
        self.dispatcher.dispatch(channel, command).await;
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn replies(&self) -> &Arc<ReplyTable> {
        &self.replies
    }

    /// Whether a reply for `opaque` is still awaited
    pub fn is_pending(&self, opaque: u64) -> bool {
        self.replies.contains(opaque)
    }

    pub fn stats(&self) -> RemotingStats {
        self.counters.snapshot(self.replies.len())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the reaper and fail every outstanding request.
    ///
    /// Pending futures complete without a reply and with
    /// [`TransportError::Closed`] as cause; their callbacks fire. Further
    /// invocations fail with a send-request error.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reaper.stop();

        let pending = self.replies.drain();
        info!("remoting service shutting down, failing {} pending replies", pending.len());
        for future in pending {
            future.set_cause(TransportError::Closed);
            if future.complete(None) && future.is_async_callback() {
                future.invoke_callback();
            }
        }
    }

    fn ensure_running(&self, addr: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(RemotingError::SendRequest {
                addr: addr.to_string(),
                cause: Some(TransportError::Closed),
            });
        }
        Ok(())
    }
}

/// Registration of a waiting caller's future, removed when the caller is
/// done waiting, whether it got a reply, failed or was cancelled.
struct PendingEntry<'a> {
    table: &'a ReplyTable,
    future: Arc<ReplyFuture>,
}

impl<'a> PendingEntry<'a> {
    fn register(table: &'a ReplyTable, future: &Arc<ReplyFuture>) -> Self {
        table.register(Arc::clone(future));
        Self {
            table,
            future: Arc::clone(future),
        }
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.table.remove_exact(&self.future);
    }
}
