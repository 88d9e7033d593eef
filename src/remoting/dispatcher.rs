//! Entry point for every inbound command.
//!
//! Replies are matched against the reply table; everything else is routed
//! through the processor registry, admitted by the processor's gate and run
//! on the processor's pool. Nothing here returns an error to the I/O layer:
//! failures become status replies or log lines.

use super::pool::ExecutionPool;
use super::processor::AdmissionSlot;
use super::registry::ProcessorRegistry;
use super::reply::ReplyFuture;
use super::stats::Counters;
use super::table::ReplyTable;
use crate::channel::{ChannelRef, observe_write};
use crate::protocol::{Command, ProtocolFactory, ProtocolFactorySelector, command_code};
use crate::util::panic_message;
use futures::FutureExt;
use log::{error, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_BUSY_MESSAGE: &str = "system busy, start flow control for a while";

pub struct Dispatcher {
    registry: Arc<ProcessorRegistry>,
    replies: Arc<ReplyTable>,
    protocols: Arc<dyn ProtocolFactorySelector>,
    callback_pool: Option<Arc<dyn ExecutionPool>>,
    admission_timeout: Duration,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<ProcessorRegistry>,
        replies: Arc<ReplyTable>,
        protocols: Arc<dyn ProtocolFactorySelector>,
        callback_pool: Option<Arc<dyn ExecutionPool>>,
        admission_timeout: Duration,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            registry,
            replies,
            protocols,
            callback_pool,
            admission_timeout,
            counters,
        }
    }

    /// Handle one inbound command read from `channel`.
    ///
    /// `None` stands for a frame the codec could not turn into a command and
    /// is ignored.
    pub async fn dispatch(&self, channel: &ChannelRef, command: Option<Command>) {
        let Some(command) = command else {
            return;
        };
        if command.is_reply() {
            self.reply_command(channel, command);
            return;
        }
        self.received_command(channel, command).await;
    }

    fn reply_command(&self, channel: &ChannelRef, command: Command) {
        let opaque = command.opaque();
        match self.replies.resolve(command) {
            Some(future) => {
                if future.is_async_callback() {
                    self.invoke_callback(future);
                }
            }
            None => {
                Counters::bump(&self.counters.late_replies);
                warn!(
                    "receive reply {}, but not matched any request, {}",
                    opaque,
                    channel.remote_address()
                );
            }
        }
    }

    /// Run a completed future's callback on the callback pool, or inline when
    /// there is no pool or it refuses the work.
    fn invoke_callback(&self, future: Arc<ReplyFuture>) {
        if let Some(pool) = &self.callback_pool {
            let pooled = Arc::clone(&future);
            match pool.submit(
                async move {
                    pooled.invoke_callback();
                }
                .boxed(),
            ) {
                Ok(()) => return,
                Err(rejected) => {
                    warn!(
                        "invoke callback in {} failed, maybe executor busy: {}",
                        pool.name(),
                        rejected
                    );
                }
            }
        }
        future.invoke_callback();
    }

    async fn received_command(&self, channel: &ChannelRef, command: Command) {
        let code = command.code();
        let oneway = command.is_oneway();
        let protocol = self.protocols.select(command.protocol());
        let header = Command::request(code, command.opaque()).with_protocol(command.protocol());

        let Some(pair) = self.registry.lookup(code) else {
            Counters::bump(&self.counters.unsupported);
            let message = format!(" command code {} not supported", code);
            error!("{}{}", channel.remote_address(), message);
            if !oneway {
                let reply = status_reply(
                    &header,
                    command_code::COMMAND_CODE_NOT_SUPPORTED,
                    &message,
                    protocol.as_ref(),
                );
                write_reply(channel, reply);
            }
            return;
        };

        if pair.processor.try_acquire_failure(self.admission_timeout).await {
            Counters::bump(&self.counters.busy_rejections);
            if !oneway {
                let reply = status_reply(
                    &header,
                    command_code::SYSTEM_BUSY,
                    SYSTEM_BUSY_MESSAGE,
                    protocol.as_ref(),
                );
                write_reply(channel, reply);
            }
            return;
        }

        let slot = AdmissionSlot::acquired(Arc::clone(&pair.processor));
        let task = process_task(
            slot,
            Arc::clone(channel),
            command,
            Arc::clone(&protocol),
            Arc::clone(&self.counters),
        );

        if let Err(rejected) = pair.pool.submit(task.boxed()) {
            warn!(
                "{}, too many command and system thread pool busy, {} {}, command code: {}",
                channel.remote_address(),
                pair.pool.name(),
                rejected,
                code
            );
            // The unrun task owns the admission slot; dropping it releases the slot.
            drop(rejected);
            Counters::bump(&self.counters.busy_rejections);
            if !oneway {
                let reply = status_reply(
                    &header,
                    command_code::SYSTEM_BUSY,
                    SYSTEM_BUSY_MESSAGE,
                    protocol.as_ref(),
                );
                write_reply(channel, reply);
            }
        }
    }
}

/// Unit of work run on the processor's pool.
///
/// The admission slot lives for the whole task and is released when the task
/// finishes, fails, panics or is dropped without running.
async fn process_task(
    slot: AdmissionSlot,
    channel: ChannelRef,
    command: Command,
    protocol: Arc<dyn ProtocolFactory>,
    counters: Arc<Counters>,
) {
    let processor = Arc::clone(slot.processor());
    let opaque = command.opaque();
    let oneway = command.is_oneway();
    let header = Command::request(command.code(), opaque).with_protocol(command.protocol());

    let outcome = AssertUnwindSafe(processor.process_command(command))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(Some(mut response))) => {
            if !oneway {
                response.set_opaque(opaque);
                response.set_reply();
                write_reply(&channel, response);
            }
            None
        }
        Ok(Ok(None)) => None,
        Ok(Err(err)) => Some(format!("{:#}", err)),
        Err(payload) => Some(format!("panic: {}", panic_message(payload.as_ref()))),
    };

    if let Some(description) = failure {
        Counters::bump(&counters.processing_failures);
        error!(
            "process command {} from <{}> Error: {}",
            opaque,
            channel.remote_address(),
            description
        );
        if !oneway {
            let reply = status_reply(
                &header,
                command_code::SYSTEM_ERROR,
                &description,
                protocol.as_ref(),
            );
            write_reply(&channel, reply);
        }
    }

    drop(slot);
}

fn status_reply(
    request: &Command,
    code: i32,
    text: &str,
    protocol: &dyn ProtocolFactory,
) -> Command {
    Command::reply_to(request, code).with_body(protocol.encode(text))
}

/// Write a reply; failures are logged and never retried
fn write_reply(channel: &ChannelRef, reply: Command) {
    let opaque = reply.opaque();
    let code = reply.code();
    let addr = channel.remote_address();
    observe_write(channel.write_and_flush(reply), move |result| {
        if let Err(err) = result {
            error!(
                "write reply (opaque {}, code {}) to <{}> failed: {}",
                opaque, code, addr, err
            );
        }
    });
}
