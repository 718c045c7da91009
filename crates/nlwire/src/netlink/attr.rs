//! Netlink attribute (rtattr/nlattr) handling.
//!
//! Attributes are TLV records: a 2-byte total length (including the 4-byte
//! sub-header), a 2-byte type field and the payload, followed by 0-3 padding
//! bytes that are not counted in the length.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::error::{Error, Result};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    super::message::nlmsg_align(len)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4; // nla_align(size_of::<NlAttr>())

/// Largest value the 16-bit length field can hold.
pub const NLA_MAX_LEN: usize = u16::MAX as usize;

/// Netlink attribute header (mirrors struct nlattr / struct rtattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

/// Attribute type flags.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

impl NlAttr {
    /// Create a new attribute header.
    ///
    /// Fails if the header plus `data_len` does not fit the length field.
    pub fn new(attr_type: u16, data_len: usize) -> Result<Self> {
        let len = NLA_HDRLEN + data_len;
        if len > NLA_MAX_LEN {
            return Err(Error::AttributeTooLarge { len });
        }
        Ok(Self {
            nla_len: len as u16,
            nla_type: attr_type,
        })
    }

    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Check if this is a nested attribute.
    pub fn is_nested(&self) -> bool {
        self.nla_type & NLA_F_NESTED != 0
    }

    /// Check if the payload is in network byte order.
    pub fn is_net_byteorder(&self) -> bool {
        self.nla_type & NLA_F_NET_BYTEORDER != 0
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: NLA_HDRLEN,
                actual: data.len(),
            })
    }
}

/// A parsed attribute borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Raw type field including the flag bits.
    pub raw_type: u16,
    /// Payload without header or padding.
    pub payload: &'a [u8],
}

impl<'a> Attribute<'a> {
    /// Attribute id (14 bits).
    pub fn kind(&self) -> u16 {
        self.raw_type & NLA_TYPE_MASK
    }

    /// True if the payload carries nested attributes.
    pub fn is_nested(&self) -> bool {
        self.raw_type & NLA_F_NESTED != 0
    }

    /// True if the payload is stored in network byte order.
    pub fn is_net_byteorder(&self) -> bool {
        self.raw_type & NLA_F_NET_BYTEORDER != 0
    }

    /// Iterate over the attributes nested in this one.
    pub fn nested(&self) -> AttrIter<'a> {
        AttrIter::new(self.payload)
    }
}

/// Parse a single attribute from the start of `data`.
///
/// Returns the attribute and the declared length (without padding).
pub fn parse_attribute(data: &[u8]) -> Result<(Attribute<'_>, usize)> {
    if data.len() < NLA_HDRLEN {
        return Err(Error::InvalidAttribute(format!(
            "not enough data ({} bytes)",
            data.len()
        )));
    }
    let header = NlAttr::parse(data)?;
    let len = header.nla_len as usize;
    if len < NLA_HDRLEN || len > data.len() {
        return Err(Error::InvalidAttribute(format!(
            "invalid attribute length ({})",
            len
        )));
    }
    Ok((
        Attribute {
            raw_type: header.nla_type,
            payload: &data[NLA_HDRLEN..len],
        },
        len,
    ))
}

/// Walk an attribute stream, calling `visit` for each attribute in order.
///
/// Stops at the first malformed attribute or the first error returned by
/// the visitor.
pub fn parse_attributes<'a, F>(data: &'a [u8], mut visit: F) -> Result<()>
where
    F: FnMut(Attribute<'a>) -> Result<()>,
{
    for attr in AttrIter::new(data) {
        visit(attr?)?;
    }
    Ok(())
}

/// Iterator over netlink attributes in a buffer.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Check if there are no more attributes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<Attribute<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let (attr, len) = match parse_attribute(self.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let aligned_len = nla_align(len);

        // Move to next attribute
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok(attr))
    }
}

/// Helper functions for extracting typed values from attribute payloads.
///
/// All integer and float accessors require the payload to have exactly the
/// size of the type.
pub mod get {
    use super::*;

    fn exact<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
        data.try_into().map_err(|_| Error::AttributeLength {
            expected: N,
            actual: data.len(),
        })
    }

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        Ok(exact::<1>(data)?[0])
    }

    /// Extract a u16 value (native endian).
    pub fn u16_ne(data: &[u8]) -> Result<u16> {
        exact(data).map(u16::from_ne_bytes)
    }

    /// Extract a u32 value (native endian).
    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        exact(data).map(u32::from_ne_bytes)
    }

    /// Extract a u64 value (native endian).
    pub fn u64_ne(data: &[u8]) -> Result<u64> {
        exact(data).map(u64::from_ne_bytes)
    }

    /// Extract an i8 value.
    pub fn i8(data: &[u8]) -> Result<i8> {
        exact(data).map(i8::from_ne_bytes)
    }

    /// Extract an i16 value (native endian).
    pub fn i16_ne(data: &[u8]) -> Result<i16> {
        exact(data).map(i16::from_ne_bytes)
    }

    /// Extract an i32 value (native endian).
    pub fn i32_ne(data: &[u8]) -> Result<i32> {
        exact(data).map(i32::from_ne_bytes)
    }

    /// Extract an i64 value (native endian).
    pub fn i64_ne(data: &[u8]) -> Result<i64> {
        exact(data).map(i64::from_ne_bytes)
    }

    /// Extract an f32 value (native endian).
    pub fn f32_ne(data: &[u8]) -> Result<f32> {
        exact(data).map(f32::from_ne_bytes)
    }

    /// Extract an f64 value (native endian).
    pub fn f64_ne(data: &[u8]) -> Result<f64> {
        exact(data).map(f64::from_ne_bytes)
    }

    /// Extract a u16 value (big endian / network order).
    pub fn u16_be(data: &[u8]) -> Result<u16> {
        exact(data).map(u16::from_be_bytes)
    }

    /// Extract a u32 value (big endian / network order).
    pub fn u32_be(data: &[u8]) -> Result<u32> {
        exact(data).map(u32::from_be_bytes)
    }

    /// Extract a flag: presence means `true`, the payload must be empty.
    pub fn flag(data: &[u8]) -> Result<bool> {
        exact::<0>(data).map(|_| true)
    }

    /// Extract a boolean stored as a single byte that must be 0 or 1.
    pub fn bool(data: &[u8]) -> Result<bool> {
        match u8(data)? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidAttribute(format!("expected 0 or 1, got {}", b))),
        }
    }

    /// Extract a null-terminated string.
    ///
    /// The last byte must be the terminator. `max_len`, when given, bounds
    /// the payload length including the terminator.
    pub fn string(data: &[u8], max_len: Option<usize>) -> Result<&str> {
        if let Some(max) = max_len
            && data.len() > max
        {
            return Err(Error::InvalidAttribute(format!(
                "maximum length exceeded (max {}, got {})",
                max,
                data.len()
            )));
        }
        match data.split_last() {
            Some((0, text)) => std::str::from_utf8(text)
                .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e))),
            _ => Err(Error::InvalidAttribute("not null terminated".into())),
        }
    }

    /// Extract bytes (no interpretation).
    pub fn bytes(data: &[u8]) -> &[u8] {
        data
    }
}

/// Encoders matching the [`get`] accessors.
pub mod put {
    use super::*;

    /// Encode a null-terminated string.
    pub fn string(value: &str, max_len: Option<usize>) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        if let Some(max) = max_len
            && data.len() > max
        {
            return Err(Error::Encode(format!(
                "maximum length exceeded (max {}, got {})",
                max,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Encode a boolean as a single byte.
    pub fn bool(value: bool) -> [u8; 1] {
        [value as u8]
    }

    /// Encode a flag (empty payload).
    pub fn flag() -> [u8; 0] {
        []
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = NlAttr::new(kind, payload.len()).unwrap().as_bytes().to_vec();
        out.extend_from_slice(payload);
        out.resize(nla_align(out.len()), 0);
        out
    }

    #[test]
    fn test_parse_attribute_flags() {
        let data = attr(5 | NLA_F_NESTED, &[]);
        let (a, len) = parse_attribute(&data).unwrap();
        assert_eq!(len, 4);
        assert_eq!(a.kind(), 5);
        assert!(a.is_nested());
        assert!(!a.is_net_byteorder());
    }

    #[test]
    fn test_parse_attribute_errors() {
        assert!(parse_attribute(&[4, 0]).is_err());

        let mut bad = 3u16.to_ne_bytes().to_vec();
        bad.extend_from_slice(&1u16.to_ne_bytes());
        assert!(parse_attribute(&bad).is_err());

        let mut long = 12u16.to_ne_bytes().to_vec();
        long.extend_from_slice(&1u16.to_ne_bytes());
        long.extend_from_slice(&[0; 4]);
        assert!(parse_attribute(&long).is_err());
    }

    #[test]
    fn test_parse_attributes_visits_in_order() {
        let mut data = attr(1, &5u32.to_ne_bytes());
        data.extend(attr(2, &[0x41]));

        let mut seen = Vec::new();
        parse_attributes(&data, |a| {
            seen.push((a.kind(), a.payload.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(1, 5u32.to_ne_bytes().to_vec()), (2, vec![0x41])]);
    }

    #[test]
    fn test_parse_attributes_stops_on_visitor_error() {
        let mut data = attr(1, &[]);
        data.extend(attr(2, &[]));
        let mut calls = 0;
        let res = parse_attributes(&data, |_| {
            calls += 1;
            Err(Error::InvalidAttribute("stop".into()))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_integer_accessors_enforce_length() {
        assert_eq!(get::u32_ne(&7u32.to_ne_bytes()).unwrap(), 7);
        assert!(matches!(
            get::u32_ne(&[1, 2, 3]),
            Err(Error::AttributeLength {
                expected: 4,
                actual: 3
            })
        ));
        assert!(get::u16_ne(&[1, 2, 3, 4]).is_err());
        assert_eq!(get::i64_ne(&(-3i64).to_ne_bytes()).unwrap(), -3);
        assert_eq!(get::u16_be(&[0x12, 0x34]).unwrap(), 0x1234);
        assert_eq!(get::f64_ne(&1.5f64.to_ne_bytes()).unwrap(), 1.5);
    }

    #[test]
    fn test_flag_and_bool() {
        assert!(get::flag(&[]).unwrap());
        assert!(get::flag(&[0]).is_err());
        assert!(!get::bool(&[0]).unwrap());
        assert!(get::bool(&[1]).unwrap());
        assert!(get::bool(&[2]).is_err());
        assert!(get::bool(&[]).is_err());
    }

    #[test]
    fn test_string() {
        assert_eq!(get::string(b"nlctrl\0", None).unwrap(), "nlctrl");
        assert!(get::string(b"nlctrl", None).is_err());
        assert!(get::string(b"", None).is_err());
        assert!(get::string(b"toolong\0", Some(4)).is_err());
        assert_eq!(put::string("wg", None).unwrap(), b"wg\0");
        assert!(put::string("toolong", Some(4)).is_err());
    }
}
