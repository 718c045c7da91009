//! Stream-based delivery of socket events.
//!
//! Everything that arrives on a connection without being a reply to a pending
//! request is published as a [`SocketEvent`]: multicast notifications, late
//! replies, datagrams that could not be framed, and the terminal error or
//! close. [`Connection::events()`](super::Connection::events) hands out the
//! receiving end as a [`NetlinkEvents`] stream. Events that arrive before
//! the stream is taken are dropped.
//!
//! # Example
//!
//! ```ignore
//! use nlwire::netlink::{Connection, Protocol, SocketEvent};
//! use tokio_stream::StreamExt;
//!
//! let conn = Connection::open(Protocol::Generic)?;
//! let mut events = conn.events().expect("events already taken");
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         SocketEvent::Message { messages, info } => println!("{} from {}", messages.len(), info.port),
//!         SocketEvent::Invalid { error, .. } => eprintln!("dropped: {error}"),
//!         SocketEvent::Error(e) => return Err(e),
//!         SocketEvent::Closed => break,
//!     }
//! }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::error::Error;
use super::message::OwnedMessage;
use super::socket::MessageInfo;

/// Something observed on a socket that is not a reply to a pending request.
#[derive(Debug)]
pub enum SocketEvent {
    /// An uncorrelated message batch (notification or late reply).
    Message {
        messages: Vec<OwnedMessage>,
        info: MessageInfo,
    },
    /// Data that could not be framed, or an unterminated multipart batch.
    Invalid {
        error: Error,
        data: Bytes,
        info: MessageInfo,
    },
    /// The transport failed; the connection stops reading.
    Error(Error),
    /// The connection was closed.
    Closed,
}

#[derive(Debug)]
enum EventTx {
    Unbounded(mpsc::UnboundedSender<SocketEvent>),
    Bounded(mpsc::Sender<SocketEvent>),
}

/// Sending half of the event channel.
///
/// The channel is created by the first [`subscribe`](Self::subscribe); until
/// then events are dropped rather than buffered.
#[derive(Debug)]
pub(crate) struct EventSender {
    capacity: Option<usize>,
    tx: Option<EventTx>,
    subscribed: bool,
}

impl EventSender {
    /// Bounded when a capacity is given.
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            tx: None,
            subscribed: false,
        }
    }

    /// Create the channel and hand out its receiver. Only the first call
    /// succeeds.
    pub(crate) fn subscribe(&mut self) -> Option<NetlinkEvents> {
        if self.subscribed {
            return None;
        }
        self.subscribed = true;
        let (tx, rx) = match self.capacity {
            Some(cap) => {
                let (tx, rx) = mpsc::channel(cap.max(1));
                (EventTx::Bounded(tx), NetlinkEvents::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (EventTx::Unbounded(tx), NetlinkEvents::Unbounded(rx))
            }
        };
        self.tx = Some(tx);
        Some(rx)
    }

    /// Publish an event. Events are dropped when nobody listens or a bounded
    /// channel is full.
    pub(crate) fn emit(&self, event: SocketEvent) {
        match &self.tx {
            None => tracing::trace!(?event, "no event subscriber, dropping event"),
            Some(EventTx::Unbounded(tx)) => {
                let _ = tx.send(event);
            }
            Some(EventTx::Bounded(tx)) => {
                if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
                    tracing::warn!(?event, "event channel full, dropping event");
                }
            }
        }
    }
}

/// Stream of [`SocketEvent`]s from a connection.
///
/// The stream ends after the connection is dropped and all buffered events
/// have been consumed.
#[derive(Debug)]
pub enum NetlinkEvents {
    #[doc(hidden)]
    Unbounded(mpsc::UnboundedReceiver<SocketEvent>),
    #[doc(hidden)]
    Bounded(mpsc::Receiver<SocketEvent>),
}

impl NetlinkEvents {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    /// Receive an event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<SocketEvent> {
        match self {
            Self::Unbounded(rx) => rx.try_recv().ok(),
            Self::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

impl Stream for NetlinkEvents {
    type Item = SocketEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            Self::Unbounded(rx) => rx.poll_recv(cx),
            Self::Bounded(rx) => rx.poll_recv(cx),
        }
    }
}
