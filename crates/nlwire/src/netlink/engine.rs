//! Per-socket protocol state machine.
//!
//! [`Engine`] performs no I/O. The connection feeds it inbound datagrams and
//! asks it for sequence numbers; the engine splits datagrams into messages,
//! reassembles multipart batches, routes replies to the pending request with
//! the same sequence number and publishes everything else as a
//! [`SocketEvent`].

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use super::error::{Error, Result};
use super::message::{MessageIter, OwnedMessage, format_message_into, nlmsg_align};
use super::socket::MessageInfo;
use super::stream::{EventSender, NetlinkEvents, SocketEvent};

/// A complete reply batch for a request.
#[derive(Debug)]
pub struct Reply {
    /// Messages of the batch; a terminating DONE is not included.
    pub messages: Vec<OwnedMessage>,
    /// Metadata of the datagram that started the batch.
    pub info: MessageInfo,
    /// Errno carried by the terminating DONE, 0 when the dump completed.
    ///
    /// The kernel reports a dump that failed part way with a negative errno
    /// in the DONE payload.
    pub status: i32,
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply>>;

/// An open multipart batch.
#[derive(Debug)]
struct Multipart {
    seq: u32,
    request: bool,
    messages: Vec<OwnedMessage>,
    info: MessageInfo,
}

#[derive(Debug)]
pub(crate) struct Engine {
    /// Last sequence number handed out; 0 before the first.
    last_seq: u32,
    pending: HashMap<u32, ReplySender>,
    multipart: Option<Multipart>,
    persistent: bool,
    /// Liveness as last reported to the transport.
    reported: bool,
    /// Set once the socket is closed or failed; no new requests register.
    closed: bool,
    events: EventSender,
}

impl Engine {
    pub(crate) fn new(events: EventSender, persistent: bool) -> Self {
        Self {
            last_seq: 0,
            pending: HashMap::new(),
            multipart: None,
            persistent,
            reported: false,
            closed: false,
            events,
        }
    }

    /// Allocate a sequence number.
    ///
    /// Counts up from 1, wraps from `u32::MAX` back to 1 and skips numbers
    /// that still have a pending request.
    pub(crate) fn next_seq(&mut self) -> u32 {
        loop {
            self.last_seq = match self.last_seq {
                u32::MAX => 1,
                n => n + 1,
            };
            if !self.pending.contains_key(&self.last_seq) {
                return self.last_seq;
            }
            tracing::debug!(seq = self.last_seq, "sequence number still pending, skipping");
        }
    }

    /// Register a reply handler for `seq`.
    pub(crate) fn register(&mut self, seq: u32, reply: ReplySender) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.pending.contains_key(&seq) {
            return Err(Error::DuplicateSequence { seq });
        }
        self.pending.insert(seq, reply);
        tracing::debug!(seq, pending = self.pending.len(), "request registered");
        Ok(())
    }

    /// Remove the handler for `seq`. Returns false if it was already settled.
    pub(crate) fn cancel(&mut self, seq: u32) -> bool {
        self.pending.remove(&seq).is_some()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    /// Whether the socket has a reason to stay alive.
    pub(crate) fn is_referenced(&self) -> bool {
        self.persistent || !self.pending.is_empty()
    }

    /// Return the new liveness if it changed since the last call.
    pub(crate) fn liveness_change(&mut self) -> Option<bool> {
        let now = self.is_referenced();
        (now != self.reported).then(|| {
            self.reported = now;
            now
        })
    }

    pub(crate) fn subscribe(&mut self) -> Option<NetlinkEvents> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SocketEvent) {
        self.events.emit(event);
    }

    /// Process one inbound datagram.
    pub(crate) fn receive(&mut self, data: Bytes, info: MessageInfo) {
        if let Some(len) = info.truncated {
            tracing::warn!(len, received = data.len(), "truncated datagram");
            let error = Error::Truncated {
                expected: len,
                actual: data.len(),
            };
            self.emit(SocketEvent::Invalid { error, data, info });
            return;
        }

        let messages: Result<Vec<OwnedMessage>> = MessageIter::new(&data)
            .map(|msg| {
                msg.map(|m| OwnedMessage {
                    header: m.header,
                    payload: data.slice_ref(m.payload),
                })
            })
            .collect();

        match messages {
            Ok(messages) => {
                tracing::trace!(count = messages.len(), port = info.port, "datagram received");
                for msg in messages {
                    self.process(msg, info);
                }
            }
            Err(error) => {
                tracing::warn!(%error, "invalid datagram");
                self.emit(SocketEvent::Invalid { error, data, info });
            }
        }
    }

    fn process(&mut self, msg: OwnedMessage, info: MessageInfo) {
        let header = msg.header;
        let seq = header.nlmsg_seq;

        if header.is_noop() {
            tracing::trace!(seq, "NOOP discarded");
            return;
        }

        if header.is_done() {
            let status = done_status(&msg);
            if status != 0 {
                tracing::debug!(seq, status, "dump terminated with error");
            }
            match self.multipart.take() {
                Some(open) => {
                    self.deliver(open.messages, open.info, open.seq, open.request, status)
                }
                None => self.deliver(Vec::new(), info, seq, header.is_request(), status),
            }
            return;
        }

        if let Some(open) = self.multipart.as_mut()
            && open.seq == seq
        {
            open.messages.push(msg);
            if !header.is_multi()
                && let Some(open) = self.multipart.take()
            {
                tracing::debug!(seq, "multipart batch ended without DONE");
                self.deliver(open.messages, open.info, open.seq, open.request, 0);
            }
            return;
        }

        if let Some(stale) = self.multipart.take() {
            tracing::warn!(seq = stale.seq, "unterminated multipart batch");
            self.emit(SocketEvent::Invalid {
                error: Error::InvalidMessage(format!(
                    "unterminated multipart batch (seq {})",
                    stale.seq
                )),
                data: encode_batch(&stale.messages),
                info: stale.info,
            });
        }

        if header.is_multi() {
            self.multipart = Some(Multipart {
                seq,
                request: header.is_request(),
                messages: vec![msg],
                info,
            });
            return;
        }

        self.deliver(vec![msg], info, seq, header.is_request(), 0);
    }

    fn deliver(
        &mut self,
        messages: Vec<OwnedMessage>,
        info: MessageInfo,
        seq: u32,
        request: bool,
        status: i32,
    ) {
        if !request && let Some(tx) = self.pending.remove(&seq) {
            tracing::debug!(seq, count = messages.len(), "reply correlated");
            let reply = Reply {
                messages,
                info,
                status,
            };
            if let Err(Ok(reply)) = tx.send(Ok(reply)) {
                self.emit(SocketEvent::Message {
                    messages: reply.messages,
                    info: reply.info,
                });
            }
            return;
        }
        tracing::trace!(seq, count = messages.len(), "notification");
        self.emit(SocketEvent::Message { messages, info });
    }

    /// Reject every pending request with `error` and drop any open batch.
    pub(crate) fn fail_all(&mut self, error: &Error) {
        self.closed = true;
        for (seq, reply) in self.pending.drain() {
            tracing::debug!(seq, %error, "failing pending request");
            let _ = reply.send(Err(error.duplicate()));
        }
        self.multipart = None;
    }
}

/// Errno of a DONE message; a payload shorter than 4 bytes counts as 0.
fn done_status(msg: &OwnedMessage) -> i32 {
    msg.payload
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(i32::from_ne_bytes)
        .unwrap_or(0)
}

/// Re-encode messages back to back, each on an aligned offset.
pub(crate) fn encode_batch(messages: &[OwnedMessage]) -> Bytes {
    let mut buf = BytesMut::new();
    for msg in messages {
        buf.resize(nlmsg_align(buf.len()), 0);
        if format_message_into(&mut buf, &msg.header, &[&msg.payload]).is_err() {
            break;
        }
    }
    buf.freeze()
}
