// ============================================================================
// rpcmux Library
// ============================================================================

pub mod channel;
pub mod config;
pub mod core;
pub mod protocol;
pub mod remoting;
mod util;

// Re-export main types for convenience
pub use channel::{Channel, ChannelRef, WriteFuture};
pub use config::RemotingConfig;
pub use crate::core::{RemotingError, Result, TransportError};
pub use protocol::{Command, command_code};

// Re-export remoting API
pub use remoting::{
    AdmissionGate, CommandProcessor, ExecutionPool, RemotingService, RemotingStats, ReplyFuture,
    SendState, SpawnPool, TaskPool,
};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// High-level Client API
// ============================================================================

/// Remoting client bound to a single TCP connection
///
/// Assigns opaques itself and uses the configured default timeout.
///
/// # Examples
///
/// ```no_run
/// use rpcmux::{RemotingClient, RemotingConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RemotingClient::connect("127.0.0.1:9099", RemotingConfig::default()).await?;
///
/// let reply = client.call(1, b"hello".to_vec()).await?;
/// println!("{}", reply);
/// # Ok(())
/// # }
/// ```
pub struct RemotingClient {
    service: Arc<RemotingService>,
    channel: Arc<channel::tcp::TcpChannel>,
}

impl RemotingClient {
    /// Connect with a service that has no inbound processors
    pub async fn connect(addr: &str, config: RemotingConfig) -> Result<Self> {
        let service = Arc::new(RemotingService::builder(config).build()?);
        Self::connect_with_service(addr, service).await
    }

    /// Connect using a prepared service (e.g. one with processors for
    /// server-initiated requests)
    pub async fn connect_with_service(addr: &str, service: Arc<RemotingService>) -> Result<Self> {
        let channel = channel::tcp::connect(addr, Arc::clone(&service)).await?;
        Ok(Self { service, channel })
    }

    /// Send a request and wait for its reply with the default timeout
    pub async fn call(&self, code: i32, body: Vec<u8>) -> Result<Command> {
        let timeout = self.service.config().default_timeout;
        self.call_with_timeout(code, body, timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        code: i32,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Command> {
        let request = Command::request(code, self.service.next_opaque()).with_body(body);
        self.service
            .invoke_sync(&self.channel_ref(), request, timeout)
            .await
    }

    /// Send a request; `callback` runs once with the outcome
    pub fn call_async<F>(&self, code: i32, body: Vec<u8>, callback: F) -> Result<()>
    where
        F: FnOnce(&ReplyFuture) + Send + 'static,
    {
        let request = Command::request(code, self.service.next_opaque()).with_body(body);
        let timeout = self.service.config().default_timeout;
        self.service
            .invoke_async(&self.channel_ref(), request, timeout, callback)
    }

    /// Send a request without waiting for any reply
    pub fn send_oneway(&self, code: i32, body: Vec<u8>) -> Result<()> {
        let request = Command::request(code, self.service.next_opaque()).with_body(body);
        self.service.invoke_oneway(&self.channel_ref(), request)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.channel.peer_addr()
    }

    pub fn service(&self) -> &Arc<RemotingService> {
        &self.service
    }

    pub fn stats(&self) -> RemotingStats {
        self.service.stats()
    }

    /// Close the connection and fail pending requests
    pub fn close(&self) {
        self.channel.close();
        self.service.shutdown();
    }

    fn channel_ref(&self) -> ChannelRef {
        self.channel.clone()
    }
}
