//! In-memory transport for exercising connections without a kernel.
//!
//! ```ignore
//! let (transport, mut peer) = MemoryTransport::new(1234);
//! let conn = Connection::new(transport, ConnectionConfig::default());
//!
//! let request = tokio::spawn(async move { conn.request(16, &[], RequestOptions::default()).await });
//! let sent = peer.next_sent().await.unwrap();
//! peer.inject(ack_for(&sent));
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::{Error, Result};
use super::message::{Message, parse_messages};
use super::socket::{Address, Datagram, MessageInfo, Transport};

/// A datagram written by the transport.
#[derive(Debug, Clone)]
pub struct Sent {
    pub data: Bytes,
    pub dest: Address,
}

impl Sent {
    /// Parse the messages in the datagram.
    pub fn messages(&self) -> Result<Vec<Message<'_>>> {
        parse_messages(&self.data)
    }
}

#[derive(Debug, Default)]
struct Shared {
    referenced: AtomicBool,
    fail_sends: AtomicBool,
    groups: Mutex<BTreeSet<u32>>,
}

/// Transport backed by channels.
#[derive(Debug)]
pub struct MemoryTransport {
    port: u32,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Sent>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Datagram>>>,
}

/// Test side of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Result<Datagram>>,
    outbound: mpsc::UnboundedReceiver<Sent>,
}

impl MemoryTransport {
    /// Create a transport bound to `port` and the peer that drives it.
    pub fn new(port: u32) -> (Self, MemoryPeer) {
        let shared = Arc::new(Shared::default());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                port,
                shared: shared.clone(),
                outbound: out_tx,
                inbound: tokio::sync::Mutex::new(in_rx),
            },
            MemoryPeer {
                shared,
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn local_port(&self) -> u32 {
        self.port
    }

    fn send(&self, data: &[u8], dest: Address) -> impl Future<Output = Result<()>> + Send {
        let result = if self.shared.fail_sends.load(Ordering::Relaxed) {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "send failed",
            )))
        } else {
            let sent = Sent {
                data: Bytes::copy_from_slice(data),
                dest,
            };
            self.outbound.send(sent).map_err(|_| Error::Closed)
        };
        std::future::ready(result)
    }

    fn recv(&self) -> impl Future<Output = Result<Datagram>> + Send {
        async move {
            let mut inbound = self.inbound.lock().await;
            match inbound.recv().await {
                Some(item) => item,
                None => Err(Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "peer dropped",
                ))),
            }
        }
    }

    fn add_membership(&self, group: u32) -> Result<()> {
        if let Ok(mut groups) = self.shared.groups.lock() {
            groups.insert(group);
        }
        Ok(())
    }

    fn drop_membership(&self, group: u32) -> Result<()> {
        if let Ok(mut groups) = self.shared.groups.lock() {
            groups.remove(&group);
        }
        Ok(())
    }

    fn set_referenced(&self, referenced: bool) {
        self.shared.referenced.store(referenced, Ordering::Relaxed);
    }
}

impl MemoryPeer {
    /// Deliver a datagram from the kernel.
    pub fn inject(&self, data: impl Into<Bytes>) {
        self.inject_with(data, MessageInfo::default());
    }

    /// Deliver a datagram with explicit sender metadata.
    pub fn inject_with(&self, data: impl Into<Bytes>, info: MessageInfo) {
        let _ = self.inbound.send(Ok(Datagram {
            data: data.into(),
            info,
        }));
    }

    /// Make the next receive fail.
    pub fn inject_error(&self, error: Error) {
        let _ = self.inbound.send(Err(error));
    }

    /// Wait for the next datagram the transport sent.
    pub async fn next_sent(&mut self) -> Option<Sent> {
        self.outbound.recv().await
    }

    /// Take a sent datagram if one is queued.
    pub fn try_sent(&mut self) -> Option<Sent> {
        self.outbound.try_recv().ok()
    }

    /// Make every send fail until reset.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Last liveness value pushed by the connection.
    pub fn is_referenced(&self) -> bool {
        self.shared.referenced.load(Ordering::Relaxed)
    }

    /// Groups currently joined.
    pub fn memberships(&self) -> Vec<u32> {
        self.shared
            .groups
            .lock()
            .map(|g| g.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (transport, mut peer) = MemoryTransport::new(42);
        assert_eq!(transport.local_port(), 42);

        transport.send(&[1, 2, 3], Address::KERNEL).await.unwrap();
        let sent = peer.next_sent().await.unwrap();
        assert_eq!(&sent.data[..], &[1, 2, 3]);
        assert_eq!(sent.dest, Address::KERNEL);

        peer.inject(vec![4, 5]);
        let datagram = transport.recv().await.unwrap();
        assert_eq!(&datagram.data[..], &[4, 5]);
    }

    #[tokio::test]
    async fn test_send_failure() {
        let (transport, peer) = MemoryTransport::new(1);
        peer.fail_sends(true);
        assert!(transport.send(&[0], Address::KERNEL).await.is_err());
    }

    #[test]
    fn test_memberships() {
        let (transport, peer) = MemoryTransport::new(1);
        transport.add_membership(3).unwrap();
        transport.add_membership(5).unwrap();
        transport.drop_membership(3).unwrap();
        assert_eq!(peer.memberships(), vec![5]);
    }
}
