//! High-level netlink connection with request/response handling.
//!
//! A [`Connection`] owns a transport and a background reader task. Requests
//! register a reply handler under their sequence number before the message
//! is sent; the reader feeds every datagram through the protocol engine,
//! which completes the matching request or publishes a [`SocketEvent`].
//!
//! # Example
//!
//! ```ignore
//! use nlwire::netlink::{Connection, Protocol, RequestOptions};
//! use nlwire::netlink::message::NLM_F_DUMP;
//! use std::time::Duration;
//!
//! let conn = Connection::open(Protocol::Generic)?;
//! let replies = conn
//!     .request(
//!         0x10,
//!         &[&payload],
//!         RequestOptions::new().flags(NLM_F_DUMP).timeout(Duration::from_secs(1)),
//!     )
//!     .await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::engine::{Engine, Reply};
use super::error::{Error, Result};
use super::message::{NLM_F_ACK, NLM_F_REQUEST, NlMsgHdr, OwnedMessage, format_message};
use super::port::PortAllocator;
use super::socket::{Address, NetlinkSocket, Protocol, SocketConfig, Transport};
use super::stream::{EventSender, NetlinkEvents, SocketEvent};

/// Connection-level options.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Keep the socket referenced even with no request in flight.
    pub persistent: bool,
    /// Capacity of the event channel; unbounded when `None`.
    pub event_capacity: Option<usize>,
}

impl ConnectionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the socket referenced while idle.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Bound the event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }
}

/// Options for sending a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Header flags.
    pub flags: u16,
    /// Sequence number; allocated when `None`.
    pub seq: Option<u32>,
    /// Port written into the header; the transport's port when `None`.
    pub local_port: Option<u32>,
    /// Destination address (the kernel by default).
    pub dest: Address,
}

impl SendOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set header flags.
    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Use a specific sequence number.
    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Override the port in the header.
    pub fn local_port(mut self, port: u32) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Send to another port.
    pub fn port(mut self, port: u32) -> Self {
        self.dest.port = port;
        self
    }

    /// Send to multicast groups.
    pub fn groups(mut self, groups: u32) -> Self {
        self.dest.groups = groups;
        self
    }
}

/// Options for a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    pub send: SendOptions,
    /// Fail with [`Error::Timeout`] if no reply arrives in time.
    pub timeout: Option<Duration>,
    /// Turn ERROR replies into errors and strip ACKs.
    pub check_error: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            send: SendOptions::default(),
            timeout: None,
            check_error: true,
        }
    }
}

impl RequestOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set header flags; REQUEST and ACK are always added.
    pub fn flags(mut self, flags: u16) -> Self {
        self.send.flags = flags;
        self
    }

    /// Use a specific sequence number.
    pub fn seq(mut self, seq: u32) -> Self {
        self.send.seq = Some(seq);
        self
    }

    /// Set the reply timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable ERROR checking.
    pub fn check_error(mut self, check: bool) -> Self {
        self.check_error = check;
        self
    }
}

struct Shared<T> {
    transport: T,
    engine: Mutex<Engine>,
    closed: AtomicBool,
}

impl<T: Transport> Shared<T> {
    /// Run `f` on the engine, then push any liveness change to the transport.
    fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let (result, change) = {
            let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut engine);
            (result, engine.liveness_change())
        };
        if let Some(referenced) = change {
            tracing::trace!(referenced, "liveness changed");
            self.transport.set_referenced(referenced);
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

/// Deregisters a request that is abandoned before it settles.
struct PendingGuard<'a, T: Transport> {
    shared: &'a Shared<T>,
    seq: u32,
    armed: bool,
}

impl<T: Transport> PendingGuard<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Transport> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let seq = self.seq;
            if self.shared.with_engine(|e| e.cancel(seq)) {
                tracing::debug!(seq, "request abandoned");
            }
        }
    }
}

/// High-level netlink connection.
pub struct Connection<T: Transport = NetlinkSocket> {
    shared: Arc<Shared<T>>,
    reader: JoinHandle<()>,
}

impl Connection<NetlinkSocket> {
    /// Open a socket for `protocol` with default options.
    pub fn open(protocol: Protocol) -> Result<Self> {
        Self::open_with(
            protocol,
            &SocketConfig::default(),
            &mut PortAllocator::for_process(),
            ConnectionConfig::default(),
        )
    }

    /// Open a socket with explicit socket and connection options.
    pub fn open_with(
        protocol: Protocol,
        socket: &SocketConfig,
        ports: &mut PortAllocator,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let socket = NetlinkSocket::open(protocol, socket, ports)?;
        Ok(Self::new(socket, config))
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap a transport and start reading from it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        let shared = Arc::new(Shared {
            transport,
            engine: Mutex::new(Engine::new(
                EventSender::new(config.event_capacity),
                config.persistent,
            )),
            closed: AtomicBool::new(false),
        });
        // Report initial liveness for persistent connections.
        shared.with_engine(|_| ());

        let reader = tokio::spawn(read_loop(shared.clone()));

        Self { shared, reader }
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Get the local port ID.
    pub fn local_port(&self) -> u32 {
        self.shared.transport.local_port()
    }

    /// Take the event stream. Returns `None` after the first call.
    ///
    /// Notifications received before the first call are not kept.
    pub fn events(&self) -> Option<NetlinkEvents> {
        self.shared.with_engine(|e| e.subscribe())
    }

    /// Subscribe to a multicast group.
    pub fn add_membership(&self, group: u32) -> Result<()> {
        self.shared.transport.add_membership(group)
    }

    /// Unsubscribe from a multicast group.
    pub fn drop_membership(&self, group: u32) -> Result<()> {
        self.shared.transport.drop_membership(group)
    }

    /// Keep the socket referenced while idle (e.g. while waiting for
    /// notifications).
    pub fn set_persistent(&self, persistent: bool) {
        self.shared.with_engine(|e| e.set_persistent(persistent));
    }

    /// Whether the socket is persistent or has requests in flight.
    pub fn is_referenced(&self) -> bool {
        self.shared.with_engine(|e| e.is_referenced())
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.with_engine(|e| e.pending_count())
    }

    /// Send a message without waiting for a reply.
    ///
    /// Returns the sequence number used.
    pub async fn send(&self, msg_type: u16, payload: &[&[u8]], opts: SendOptions) -> Result<u32> {
        self.shared.ensure_open()?;
        let seq = match opts.seq {
            Some(seq) => seq,
            None => self.shared.with_engine(|e| e.next_seq()),
        };
        self.send_frame(msg_type, opts.flags, seq, payload, &opts)
            .await?;
        Ok(seq)
    }

    /// Send a request and wait for its reply.
    ///
    /// With `check_error` set (the default), ACKs are stripped from the
    /// result, and an ERROR reply or a DONE carrying an errno fails the
    /// request with the kernel errno.
    pub async fn request(
        &self,
        msg_type: u16,
        payload: &[&[u8]],
        opts: RequestOptions,
    ) -> Result<Vec<OwnedMessage>> {
        let reply = self.request_reply(msg_type, payload, opts).await?;
        if opts.check_error {
            if reply.status != 0 {
                return Err(Error::from_errno(reply.status));
            }
            check_errors(reply.messages)
        } else {
            Ok(reply.messages)
        }
    }

    /// Send a request and return the raw reply batch with its metadata.
    ///
    /// `check_error` is not applied.
    pub async fn request_reply(
        &self,
        msg_type: u16,
        payload: &[&[u8]],
        opts: RequestOptions,
    ) -> Result<Reply> {
        self.shared.ensure_open()?;

        let (tx, mut rx) = oneshot::channel();
        let seq = self.shared.with_engine(|e| {
            let seq = opts.send.seq.unwrap_or_else(|| e.next_seq());
            e.register(seq, tx).map(|()| seq)
        })?;
        let guard = PendingGuard {
            shared: &self.shared,
            seq,
            armed: true,
        };

        let flags = opts.send.flags | NLM_F_REQUEST | NLM_F_ACK;
        self.send_frame(msg_type, flags, seq, payload, &opts.send)
            .await?;

        let outcome = match opts.timeout {
            None => (&mut rx).await.unwrap_or(Err(Error::Closed)),
            Some(after) => match tokio::time::timeout(after, &mut rx).await {
                Ok(outcome) => outcome.unwrap_or(Err(Error::Closed)),
                Err(_elapsed) => {
                    if self.shared.with_engine(|e| e.cancel(seq)) {
                        guard.disarm();
                        tracing::debug!(seq, ?after, "request timed out");
                        return Err(Error::Timeout { seq, after });
                    }
                    // The reply won the race against the timer.
                    rx.try_recv().unwrap_or(Err(Error::Closed))
                }
            },
        };
        guard.disarm();
        outcome
    }

    async fn send_frame(
        &self,
        msg_type: u16,
        flags: u16,
        seq: u32,
        payload: &[&[u8]],
        opts: &SendOptions,
    ) -> Result<()> {
        let port = opts
            .local_port
            .unwrap_or_else(|| self.shared.transport.local_port());
        let header = NlMsgHdr::new(msg_type, flags)
            .with_seq(seq)
            .with_port(port);
        let data = format_message(&header, payload)?;
        tracing::trace!(msg_type, flags, seq, len = data.len(), "sending message");
        self.shared.transport.send(&data, opts.dest).await
    }

    /// Close the connection.
    ///
    /// Pending requests fail with [`Error::Closed`] and a
    /// [`SocketEvent::Closed`] event is published.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader.abort();
        self.shared.with_engine(|e| {
            e.fail_all(&Error::Closed);
            e.set_persistent(false);
            e.emit(SocketEvent::Closed);
        });
    }

    /// Whether [`close`](Self::close) was called or the transport failed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        match shared.transport.recv().await {
            Ok(datagram) => {
                shared.with_engine(|e| e.receive(datagram.data, datagram.info));
            }
            Err(error) => {
                if shared.closed.swap(true, Ordering::AcqRel) {
                    return;
                }
                tracing::warn!(%error, "netlink receive failed");
                shared.with_engine(|e| {
                    e.fail_all(&error);
                    e.emit(SocketEvent::Error(error));
                });
                return;
            }
        }
    }
}

/// Strip ACKs from a reply batch and turn the first ERROR into an error.
pub fn check_errors(messages: Vec<OwnedMessage>) -> Result<Vec<OwnedMessage>> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.error()? {
            Some(err) => {
                if let Some(e) = err.to_error() {
                    return Err(e);
                }
            }
            None => out.push(msg),
        }
    }
    Ok(out)
}
