//! TCP transport: one reader task and one writer task per connection.
//!
//! The reader decodes frames and hands them to the service's dispatcher,
//! in order, the way a connection-owning I/O thread would. The writer
//! drains a queue of outbound commands and acknowledges each write so
//! callers get a completion signal.

use super::{Channel, ChannelRef, WriteFuture, ready_write};
use crate::core::TransportError;
use crate::protocol::codec::{Frame, FrameCodec};
use crate::protocol::Command;
use crate::remoting::RemotingService;
use futures::FutureExt;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch};

type Outbound = (Command, oneshot::Sender<Result<(), TransportError>>);

pub struct TcpChannel {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
}

impl TcpChannel {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Stop both connection tasks; queued writes fail with `Closed`
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow() || self.outbound.is_closed()
    }
}

impl Channel for TcpChannel {
    fn write_and_flush(&self, command: Command) -> WriteFuture {
        if *self.shutdown.borrow() {
            return ready_write(Err(TransportError::Closed));
        }
        let (ack, done) = oneshot::channel();
        if self.outbound.send((command, ack)).is_err() {
            return ready_write(Err(TransportError::Closed));
        }
        async move { done.await.unwrap_or(Err(TransportError::Closed)) }.boxed()
    }

    fn remote_address(&self) -> String {
        self.peer.to_string()
    }
}

/// Open a connection whose inbound commands go to `service`
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    service: Arc<RemotingService>,
) -> Result<Arc<TcpChannel>, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    attach(stream, service)
}

/// Start the reader and writer tasks for an established stream
pub fn attach(
    stream: TcpStream,
    service: Arc<RemotingService>,
) -> Result<Arc<TcpChannel>, TransportError> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let codec = FrameCodec::new(service.config().max_frame_size);
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Outbound>();
    let (shutdown, _) = watch::channel(false);

    let mut writer_shutdown = shutdown.subscribe();
    let mut reader_shutdown = shutdown.subscribe();
    let channel = Arc::new(TcpChannel {
        peer,
        outbound,
        shutdown,
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.changed() => break,
                next = queue.recv() => {
                    let Some((command, ack)) = next else {
                        break;
                    };
                    let result = codec.write_frame(&mut writer, &command).await;
                    let fatal = matches!(result, Err(TransportError::Io(_) | TransportError::Closed));
                    if let Err(err) = &result {
                        warn!("write to <{}> failed: {}", peer, err);
                    }
                    let _ = ack.send(result);
                    if fatal {
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
        debug!("writer for <{}> stopped", peer);
    });

    let reply_path: ChannelRef = channel.clone();
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = reader_shutdown.changed() => break,
                frame = codec.read_frame(&mut reader) => frame,
            };
            match frame {
                Ok(Some(Frame::Command(command))) => {
                    service.dispatch(&reply_path, Some(command)).await;
                }
                Ok(Some(Frame::Malformed(reason))) => {
                    warn!("drop malformed frame from <{}>: {}", peer, reason);
                    service.dispatch(&reply_path, None).await;
                }
                Ok(None) => {
                    debug!("connection <{}> closed by peer", peer);
                    break;
                }
                Err(err) => {
                    warn!("read from <{}> failed: {}", peer, err);
                    break;
                }
            }
        }
    });

    Ok(channel)
}

/// Accept loop serving every connection with one [`RemotingService`]
pub struct RemotingServer {
    listener: TcpListener,
    service: Arc<RemotingService>,
    accepted: AtomicU64,
}

impl RemotingServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        service: Arc<RemotingService>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            accepted: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn service(&self) -> &Arc<RemotingService> {
        &self.service
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<(), TransportError> {
        info!("Remoting server listening on {}", self.local_addr()?);
        loop {
            let (socket, addr) = self.listener.accept().await?;
            let count = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Accepted new connection from {:?}", addr);
            if count % 1000 == 0 {
                info!("Remoting connections accepted: {}", count);
            }
            if let Err(err) = attach(socket, Arc::clone(&self.service)) {
                warn!("Connection setup for {} failed: {}", addr, err);
            }
        }
    }
}
