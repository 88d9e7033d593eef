pub mod dispatcher;
pub mod pool;
pub mod processor;
pub mod reaper;
pub mod registry;
pub mod reply;
pub mod service;
mod stats;
pub mod table;

pub use dispatcher::Dispatcher;
pub use pool::{ExecutionPool, RejectReason, RejectedTask, SpawnPool, Task, TaskPool};
pub use processor::{AdmissionGate, AdmissionSlot, CommandProcessor};
pub use reaper::{ReaperSchedule, TimeoutReaper};
pub use registry::{ProcessorPair, ProcessorRegistry};
pub use reply::{ReplyCallback, ReplyFuture, SendState};
pub use service::{RemotingService, RemotingServiceBuilder};
pub use stats::RemotingStats;
pub use table::ReplyTable;
