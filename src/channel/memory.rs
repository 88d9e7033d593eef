//! In-process channel pair.
//!
//! [`connect`] wires two services back to back: whatever one side writes is
//! dispatched by the other side's service from a dedicated reader task,
//! the way a socket reader would. Useful for tests and for co-located
//! endpoints.

use super::{Channel, WriteFuture, ready_write};
use crate::core::TransportError;
use crate::protocol::Command;
use crate::remoting::RemotingService;
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// One direction of an in-memory link
pub struct MemoryChannel {
    remote: String,
    peer: mpsc::UnboundedSender<Command>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryChannel {
    /// Close both directions; later writes fail with [`TransportError::Closed`]
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.peer.is_closed()
    }
}

impl Channel for MemoryChannel {
    fn write_and_flush(&self, command: Command) -> WriteFuture {
        if self.is_closed() {
            return ready_write(Err(TransportError::Closed));
        }
        ready_write(self.peer.send(command).map_err(|_| TransportError::Closed))
    }

    fn remote_address(&self) -> String {
        self.remote.clone()
    }
}

/// Link `a` and `b`.
///
/// Returns `(a_to_b, b_to_a)`: the channel `a` uses to reach `b` and the one
/// `b` uses to reach `a`. Each side's inbound commands are dispatched with its
/// own outbound channel as the reply path.
pub fn connect(
    a: Arc<RemotingService>,
    b: Arc<RemotingService>,
) -> (Arc<MemoryChannel>, Arc<MemoryChannel>) {
    let (closed, _) = watch::channel(false);
    let closed = Arc::new(closed);
    let (to_b, inbound_b) = mpsc::unbounded_channel();
    let (to_a, inbound_a) = mpsc::unbounded_channel();

    let a_to_b = Arc::new(MemoryChannel {
        remote: "memory:b".to_string(),
        peer: to_b,
        closed: Arc::clone(&closed),
    });
    let b_to_a = Arc::new(MemoryChannel {
        remote: "memory:a".to_string(),
        peer: to_a,
        closed: Arc::clone(&closed),
    });

    spawn_reader(b, Arc::clone(&b_to_a), inbound_b, closed.subscribe());
    spawn_reader(a, Arc::clone(&a_to_b), inbound_a, closed.subscribe());

    (a_to_b, b_to_a)
}

fn spawn_reader(
    service: Arc<RemotingService>,
    reply_path: Arc<MemoryChannel>,
    mut inbound: mpsc::UnboundedReceiver<Command>,
    mut closed: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let channel: Arc<dyn Channel> = reply_path;
        loop {
            tokio::select! {
                changed = closed.changed() => {
                    if changed.is_err() || *closed.borrow() {
                        break;
                    }
                }
                next = inbound.recv() => match next {
                    Some(command) => service.dispatch(&channel, Some(command)).await,
                    None => break,
                },
            }
        }
        debug!("memory reader for <{}> stopped", channel.remote_address());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemotingConfig;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_closed_channel_fails_writes() {
        let a = Arc::new(RemotingService::builder(RemotingConfig::default()).build().unwrap());
        let b = Arc::new(RemotingService::builder(RemotingConfig::default()).build().unwrap());
        let (a_to_b, b_to_a) = connect(a, b);

        assert!(a_to_b.write_and_flush(Command::request(1, 1)).now_or_never().unwrap().is_ok());

        a_to_b.close();
        assert!(a_to_b.is_closed());
        assert!(b_to_a.is_closed());
        let result = b_to_a.write_and_flush(Command::request(1, 2)).now_or_never().unwrap();
        assert_eq!(result, Err(TransportError::Closed));
    }

    #[test]
    fn test_remote_address_names_the_peer() {
        let (closed, _) = watch::channel(false);
        let (peer, _inbound) = mpsc::unbounded_channel();
        let channel = MemoryChannel {
            remote: "memory:b".to_string(),
            peer,
            closed: Arc::new(closed),
        };
        assert_eq!(channel.remote_address(), "memory:b");
        assert!(!channel.is_closed());
    }
}
