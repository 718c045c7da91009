//! Netlink message header and framing.
//!
//! Every netlink datagram carries one or more messages, each starting with a
//! 16-byte [`NlMsgHdr`] in host byte order and padded to a 4-byte boundary:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬─────────┬─────┐
//! │ len u32  │ type u16 │ flags u16│ seq u32  │ port u32 │ payload │ pad │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴─────────┴─────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::AttrIter;
use super::error::{Error, Result};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Number of padding bytes needed after `len` bytes, i.e. `(-len) mod 4`.
#[inline]
pub const fn nlmsg_pad(len: usize) -> usize {
    (-(len as i128)).rem_euclid(NLMSG_ALIGNTO as i128) as usize
}

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    len + nlmsg_pad(len)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending process port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.nlmsg_seq = seq;
        self
    }

    /// Set the port ID.
    pub fn with_port(mut self, port: u32) -> Self {
        self.nlmsg_pid = port;
        self
    }

    /// Get the payload length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.nlmsg_len as usize).saturating_sub(NLMSG_HDRLEN)
    }

    /// Check if this is an error message.
    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    /// Check if this is a done message.
    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    /// Check if this is a no-op message.
    pub fn is_noop(&self) -> bool {
        self.nlmsg_type == NlMsgType::NOOP
    }

    /// Check if this message has the multi flag.
    pub fn is_multi(&self) -> bool {
        self.nlmsg_flags & NLM_F_MULTI != 0
    }

    /// Check if this message has the request flag.
    pub fn is_request(&self) -> bool {
        self.nlmsg_flags & NLM_F_REQUEST != 0
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Encode the header into its 16-byte wire form.
    pub fn format(&self) -> [u8; NLMSG_HDRLEN] {
        let mut out = [0u8; NLMSG_HDRLEN];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Parse a header from the start of `data`.
    ///
    /// Only the size is checked; the declared length is validated by
    /// [`parse_message`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(hdr, _)| hdr)
            .map_err(|_| Error::Truncated {
                expected: NLMSG_HDRLEN,
                actual: data.len(),
            })
    }
}

/// Standard netlink message types.
pub struct NlMsgType;

impl NlMsgType {
    /// No operation, message must be discarded.
    pub const NOOP: u16 = 1;
    /// Error message or ACK.
    pub const ERROR: u16 = 2;
    /// End of multipart message.
    pub const DONE: u16 = 3;
    /// Data lost, request resend.
    pub const OVERRUN: u16 = 4;
    /// Types below this value are reserved control messages.
    pub const MIN_TYPE: u16 = 0x10;
}

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;
pub const NLM_F_DUMP_FILTERED: u16 = 0x20;

// Modifiers to GET request
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_ATOMIC: u16 = 0x400;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW request
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

// Modifiers to DELETE request
pub const NLM_F_NONREC: u16 = 0x100;

// Flags for ACK message
pub const NLM_F_CAPPED: u16 = 0x100;
pub const NLM_F_ACK_TLVS: u16 = 0x200;

/// A parsed message borrowing its payload from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// The message header as found on the wire.
    pub header: NlMsgHdr,
    /// Payload bytes (without header or trailing padding).
    pub payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// Message type.
    pub fn msg_type(&self) -> u16 {
        self.header.nlmsg_type
    }

    /// Message flags.
    pub fn flags(&self) -> u16 {
        self.header.nlmsg_flags
    }

    /// Sequence number.
    pub fn seq(&self) -> u32 {
        self.header.nlmsg_seq
    }

    /// Sender port.
    pub fn port(&self) -> u32 {
        self.header.nlmsg_pid
    }

    /// Copy the payload into an [`OwnedMessage`].
    pub fn to_owned_message(&self) -> OwnedMessage {
        OwnedMessage {
            header: self.header,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// A message that owns its payload, used once messages leave the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    /// The message header.
    pub header: NlMsgHdr,
    /// Payload bytes.
    pub payload: Bytes,
}

impl OwnedMessage {
    /// Create a message from header fields and a payload.
    pub fn new(header: NlMsgHdr, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let mut header = header;
        header.nlmsg_len = (NLMSG_HDRLEN + payload.len()) as u32;
        Self { header, payload }
    }

    /// Message type.
    pub fn msg_type(&self) -> u16 {
        self.header.nlmsg_type
    }

    /// Message flags.
    pub fn flags(&self) -> u16 {
        self.header.nlmsg_flags
    }

    /// Sequence number.
    pub fn seq(&self) -> u32 {
        self.header.nlmsg_seq
    }

    /// Sender port.
    pub fn port(&self) -> u32 {
        self.header.nlmsg_pid
    }

    /// Borrow as a [`Message`].
    pub fn as_message(&self) -> Message<'_> {
        Message {
            header: self.header,
            payload: &self.payload,
        }
    }

    /// Parse the payload of an ERROR message.
    pub fn error(&self) -> Result<Option<NlMsgError>> {
        if !self.header.is_error() {
            return Ok(None);
        }
        NlMsgError::parse(&self.payload).map(Some)
    }

    /// Encode this message, recomputing the length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        format_message(&self.header, &[&self.payload])
    }
}

/// Parse one message from the start of `data`.
///
/// Returns the message and the number of bytes it declares (without
/// trailing padding).
pub fn parse_message(data: &[u8]) -> Result<(Message<'_>, usize)> {
    let header = NlMsgHdr::parse(data)?;
    let len = header.nlmsg_len as usize;
    if len < NLMSG_HDRLEN || len > data.len() {
        return Err(Error::InvalidMessage(format!(
            "invalid message length: {} (available {})",
            len,
            data.len()
        )));
    }
    let payload = &data[NLMSG_HDRLEN..len];
    Ok((Message { header, payload }, len))
}

/// Parse every message in a datagram.
///
/// Padding between messages is skipped, not validated. Empty input yields
/// no messages.
pub fn parse_messages(data: &[u8]) -> Result<Vec<Message<'_>>> {
    MessageIter::new(data).collect()
}

/// Encode a message from a header and payload segments.
///
/// The length field is set to the header size plus the total size of all
/// segments; the other header fields are taken from `header`.
pub fn format_message(header: &NlMsgHdr, segments: &[&[u8]]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    format_message_into(&mut buf, header, segments)?;
    Ok(buf.to_vec())
}

/// Like [`format_message`], appending to an existing buffer.
pub fn format_message_into(
    buf: &mut BytesMut,
    header: &NlMsgHdr,
    segments: &[&[u8]],
) -> Result<()> {
    let payload_len: usize = segments.iter().map(|s| s.len()).sum();
    let len = u32::try_from(NLMSG_HDRLEN + payload_len)
        .map_err(|_| Error::Encode(format!("message too large ({} bytes)", payload_len)))?;

    let mut header = *header;
    header.nlmsg_len = len;

    buf.reserve(len as usize);
    buf.put_slice(header.as_bytes());
    for segment in segments {
        buf.put_slice(segment);
    }
    Ok(())
}

/// Iterator over netlink messages in a buffer.
///
/// Yields an error for the first malformed message and then stops.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<Message<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let (msg, len) = match parse_message(self.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let aligned_len = nlmsg_align(len);

        // Move to next message
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok(msg))
    }
}

/// Netlink error message payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Error code (negative errno or 0 for ACK).
    pub error: i32,
    /// Original message header that caused the error.
    pub msg: NlMsgHdr,
}

/// Size of the ERROR payload prefix.
pub const NLMSG_ERROR_LEN: usize = std::mem::size_of::<NlMsgError>();

impl NlMsgError {
    /// Parse error message from payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: NLMSG_ERROR_LEN,
                actual: data.len(),
            })
    }

    /// Check if this is an ACK (no error).
    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Convert to a kernel error, `None` for an ACK.
    pub fn to_error(&self) -> Option<Error> {
        (!self.is_ack()).then(|| Error::from_errno(self.error))
    }

    /// Get attributes after the error message (extended ACK).
    ///
    /// Only meaningful when the ERROR message has `NLM_F_ACK_TLVS` set. When
    /// `NLM_F_CAPPED` is not set the kernel echoes the whole request, which is
    /// skipped here.
    pub fn ext_ack<'a>(&self, flags: u16, payload: &'a [u8]) -> AttrIter<'a> {
        if flags & NLM_F_ACK_TLVS == 0 {
            return AttrIter::new(&[]);
        }
        let offset = if flags & NLM_F_CAPPED != 0 {
            NLMSG_ERROR_LEN
        } else {
            4 + nlmsg_align(self.msg.nlmsg_len as usize)
        };
        AttrIter::new(payload.get(offset..).unwrap_or(&[]))
    }
}
