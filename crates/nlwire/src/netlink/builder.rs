//! Builders for attribute streams and netlink messages.

use zerocopy::{Immutable, IntoBytes};

use super::attr::{NLA_F_NESTED, NLA_HDRLEN, NLA_MAX_LEN, NlAttr, nla_align};
use super::error::{Error, Result};
use super::message::{NlMsgHdr, format_message};

/// Token returned when starting a nested attribute.
/// Used to finalize the nested attribute length.
#[derive(Debug)]
#[must_use = "a nested attribute must be closed with nest_end"]
pub struct NestToken {
    /// Offset of the nested attribute header in the buffer.
    offset: usize,
    /// Buffer length before alignment padding was added.
    start: usize,
}

/// Accumulates a stream of attributes.
///
/// Padding is inserted before each new attribute based on the running
/// offset, and the length field of every attribute is patched once its
/// payload (which may itself be an attribute stream) has been written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrStream {
    buf: Vec<u8>,
}

impl AttrStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Get the current buffer for inspection.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Finish the stream, padding it to alignment.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.pad();
        self.buf
    }

    fn pad(&mut self) {
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Append raw bytes at an aligned offset without an attribute header.
    pub fn push_raw(&mut self, data: &[u8]) {
        self.pad();
        self.buf.extend_from_slice(data);
    }

    /// Append an attribute with the given type and data.
    pub fn push(&mut self, attr_type: u16, data: &[u8]) -> Result<()> {
        let attr = NlAttr::new(attr_type, data.len())?;
        self.pad();
        self.buf.extend_from_slice(attr.as_bytes());
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Append an attribute whose payload is produced by `f`.
    ///
    /// The payload may contain further attributes. On failure the partially
    /// written attribute is removed.
    pub fn push_with<F>(&mut self, attr_type: u16, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let token = self.open(attr_type);
        let start = token.start;
        match f(self) {
            Ok(()) => self.nest_end(token),
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Like [`push_with`](Self::push_with) but marks the attribute as nested.
    pub fn push_nested<F>(&mut self, attr_type: u16, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.push_with(attr_type | NLA_F_NESTED, f)
    }

    /// Append a u8 attribute.
    pub fn push_u8(&mut self, attr_type: u16, value: u8) -> Result<()> {
        self.push(attr_type, &[value])
    }

    /// Append a u16 attribute (native endian).
    pub fn push_u16(&mut self, attr_type: u16, value: u16) -> Result<()> {
        self.push(attr_type, &value.to_ne_bytes())
    }

    /// Append a u32 attribute (native endian).
    pub fn push_u32(&mut self, attr_type: u16, value: u32) -> Result<()> {
        self.push(attr_type, &value.to_ne_bytes())
    }

    /// Append a u64 attribute (native endian).
    pub fn push_u64(&mut self, attr_type: u16, value: u64) -> Result<()> {
        self.push(attr_type, &value.to_ne_bytes())
    }

    /// Append an i32 attribute (native endian).
    pub fn push_i32(&mut self, attr_type: u16, value: i32) -> Result<()> {
        self.push(attr_type, &value.to_ne_bytes())
    }

    /// Append a u16 attribute (big endian / network order).
    pub fn push_u16_be(&mut self, attr_type: u16, value: u16) -> Result<()> {
        self.push(attr_type, &value.to_be_bytes())
    }

    /// Append a u32 attribute (big endian / network order).
    pub fn push_u32_be(&mut self, attr_type: u16, value: u32) -> Result<()> {
        self.push(attr_type, &value.to_be_bytes())
    }

    /// Append a null-terminated string attribute.
    pub fn push_str(&mut self, attr_type: u16, value: &str) -> Result<()> {
        self.push_with(attr_type, |s| {
            s.buf.extend_from_slice(value.as_bytes());
            s.buf.push(0); // null terminator
            Ok(())
        })
    }

    /// Append an empty (flag) attribute with no payload.
    pub fn push_flag(&mut self, attr_type: u16) -> Result<()> {
        self.push(attr_type, &[])
    }

    /// Start a nested attribute. Returns a token to finalize it.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        self.open(attr_type | NLA_F_NESTED)
    }

    fn open(&mut self, raw_type: u16) -> NestToken {
        let start = self.buf.len();
        self.pad();
        let offset = self.buf.len();
        // Placeholder length, patched by nest_end
        self.buf.extend_from_slice(
            NlAttr {
                nla_len: NLA_HDRLEN as u16,
                nla_type: raw_type,
            }
            .as_bytes(),
        );
        NestToken { offset, start }
    }

    /// End a nested attribute started with `nest_start`.
    pub fn nest_end(&mut self, token: NestToken) -> Result<()> {
        let len = self.buf.len() - token.offset;
        if len > NLA_MAX_LEN {
            self.buf.truncate(token.start);
            return Err(Error::AttributeTooLarge { len });
        }
        // Update the length in the nested attribute header
        let len_bytes = (len as u16).to_ne_bytes();
        self.buf[token.offset..token.offset + 2].copy_from_slice(&len_bytes);
        Ok(())
    }
}

/// Builder for constructing netlink messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    header: NlMsgHdr,
    body: AttrStream,
}

impl MessageBuilder {
    /// Create a new message builder with the given type and flags.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self::with_header(NlMsgHdr::new(msg_type, flags))
    }

    /// Create a builder from an existing header.
    pub fn with_header(header: NlMsgHdr) -> Self {
        Self {
            header,
            body: AttrStream::new(),
        }
    }

    /// Get the header as it will be sent (length is set by `finish`).
    pub fn header(&self) -> &NlMsgHdr {
        &self.header
    }

    /// Get the payload written so far.
    pub fn payload(&self) -> &[u8] {
        self.body.as_bytes()
    }

    /// Mutable access to the attribute stream of the payload.
    pub fn attrs(&mut self) -> &mut AttrStream {
        &mut self.body
    }

    /// Append raw bytes to the message (with alignment padding).
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.body.push_raw(data);
    }

    /// Append a fixed-size struct to the message.
    pub fn append<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.append_bytes(data.as_bytes());
    }

    /// Append an attribute with the given type and data.
    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) -> Result<()> {
        self.body.push(attr_type, data)
    }

    /// Append a u32 attribute (native endian).
    pub fn append_attr_u32(&mut self, attr_type: u16, value: u32) -> Result<()> {
        self.body.push_u32(attr_type, value)
    }

    /// Append a null-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) -> Result<()> {
        self.body.push_str(attr_type, value)
    }

    /// Start a nested attribute. Returns a token to finalize it.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        self.body.nest_start(attr_type)
    }

    /// End a nested attribute started with `nest_start`.
    pub fn nest_end(&mut self, token: NestToken) -> Result<()> {
        self.body.nest_end(token)
    }

    /// Set the sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        self.header.nlmsg_seq = seq;
    }

    /// Set the port ID.
    pub fn set_pid(&mut self, pid: u32) {
        self.header.nlmsg_pid = pid;
    }

    /// Finalize and return the message bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let payload = self.body.into_bytes();
        format_message(&self.header, &[&payload])
    }
}
