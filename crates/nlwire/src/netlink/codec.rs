//! Schema-driven structured attribute codec.
//!
//! A [`Schema`] maps attribute ids to a [`FieldCodec`] describing how the
//! payload is interpreted. Decoding produces a [`Record`]; attributes whose id
//! is not in the schema are kept in [`Record::unparsed`] and written back
//! verbatim when the record is encoded, so newer kernels do not lose data on
//! a read-modify-write cycle.
//!
//! ```ignore
//! use nlwire::netlink::codec::{FieldCodec, Schema};
//!
//! let schema = Schema::new("link")
//!     .field(1, "mtu", FieldCodec::U32)
//!     .field(2, "name", FieldCodec::Str { max_len: Some(16) });
//! let record = schema.decode(payload)?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::attr::{Attribute, get, parse_attributes, put};
use super::builder::AttrStream;
use super::error::{Error, Result};

/// Integer width used by bitmask and enum fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    /// Read an integer of this width.
    pub fn get(self, data: &[u8]) -> Result<u64> {
        match self {
            Width::U8 => get::u8(data).map(u64::from),
            Width::U16 => get::u16_ne(data).map(u64::from),
            Width::U32 => get::u32_ne(data).map(u64::from),
            Width::U64 => get::u64_ne(data),
        }
    }

    /// Encode an integer of this width, failing if it does not fit.
    pub fn put(self, value: u64) -> Result<Vec<u8>> {
        let too_wide = || Error::Encode(format!("value {:#x} does not fit {:?}", value, self));
        Ok(match self {
            Width::U8 => vec![u8::try_from(value).map_err(|_| too_wide())?],
            Width::U16 => u16::try_from(value)
                .map_err(|_| too_wide())?
                .to_ne_bytes()
                .to_vec(),
            Width::U32 => u32::try_from(value)
                .map_err(|_| too_wide())?
                .to_ne_bytes()
                .to_vec(),
            Width::U64 => value.to_ne_bytes().to_vec(),
        })
    }
}

/// Named bits of a flags field.
#[derive(Debug)]
pub struct BitmaskSpec {
    pub width: Width,
    pub flags: &'static [(&'static str, u64)],
}

/// Decoded flags field.
///
/// Bits with no name in the [`BitmaskSpec`] are kept in `unknown` and re-emitted on
/// encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmask {
    pub flags: BTreeSet<String>,
    pub unknown: u64,
}

impl Bitmask {
    /// Check whether a named flag is set.
    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    /// Add a named flag.
    pub fn with(mut self, name: &str) -> Self {
        self.flags.insert(name.to_string());
        self
    }
}

impl BitmaskSpec {
    /// Split an integer into named flags and leftover bits.
    pub fn decode_bits(&self, bits: u64) -> Bitmask {
        let mut out = Bitmask::default();
        let mut rest = bits;
        for (name, value) in self.flags {
            if *value != 0 && bits & value == *value {
                out.flags.insert((*name).to_string());
                rest &= !value;
            }
        }
        out.unknown = rest;
        out
    }

    /// Combine named flags and leftover bits back into an integer.
    pub fn encode_bits(&self, mask: &Bitmask) -> Result<u64> {
        mask.flags.iter().try_fold(mask.unknown, |acc, name| {
            self.flags
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| acc | v)
                .ok_or_else(|| Error::Encode(format!("unknown flag {:?}", name)))
        })
    }
}

/// Named values of an enumeration field.
#[derive(Debug)]
pub struct EnumSpec {
    pub width: Width,
    pub variants: &'static [(&'static str, u64)],
}

/// Decoded enumeration value; values without a name pass through raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumValue {
    Named(String),
    Raw(u64),
}

impl EnumSpec {
    /// Map an integer to its name if one exists.
    pub fn decode_value(&self, value: u64) -> EnumValue {
        match self.variants.iter().find(|(_, v)| *v == value) {
            Some((name, _)) => EnumValue::Named((*name).to_string()),
            None => EnumValue::Raw(value),
        }
    }

    /// Map a name (or raw value) back to its integer.
    pub fn encode_value(&self, value: &EnumValue) -> Result<u64> {
        match value {
            EnumValue::Raw(v) => Ok(*v),
            EnumValue::Named(name) => self
                .variants
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| Error::Encode(format!("invalid key {:?}", name))),
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Presence-only attribute.
    Flag,
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Record(Record),
    Array(Vec<Value>),
    Map(BTreeMap<u16, Value>),
    Bits(Bitmask),
    Enum(EnumValue),
}

impl Value {
    /// Get the value as u16.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::U16(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as u32.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a nested record.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Get the value as an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get the value as a bitmask.
    pub fn as_bits(&self) -> Option<&Bitmask> {
        match self {
            Value::Bits(b) => Some(b),
            _ => None,
        }
    }
}

/// An attribute kept verbatim because the schema did not know its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Type field including flag bits.
    pub raw_type: u16,
    pub data: Vec<u8>,
}

/// Sparse set of decoded attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: BTreeMap<u16, Value>,
    /// Attributes not described by the schema, in arrival order.
    pub unparsed: Vec<RawAttribute>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, id: u16, value: Value) -> Self {
        self.fields.insert(id, value);
        self
    }

    /// Set a field.
    pub fn insert(&mut self, id: u16, value: Value) -> Option<Value> {
        self.fields.insert(id, value)
    }

    /// Get a field by id.
    pub fn get(&self, id: u16) -> Option<&Value> {
        self.fields.get(&id)
    }

    /// Check if the record has no fields and no unparsed attributes.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unparsed.is_empty()
    }
}

/// How a single attribute payload is interpreted.
#[derive(Debug, Clone)]
pub enum FieldCodec {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Big endian u16; the attribute itself carries no byte order flag.
    U16Be,
    /// Big endian u32; the attribute itself carries no byte order flag.
    U32Be,
    Flag,
    Bool,
    Str {
        max_len: Option<usize>,
    },
    Bytes,
    Record(Arc<Schema>),
    Array {
        elem: Box<FieldCodec>,
        zero_indexed: bool,
    },
    Map(Box<FieldCodec>),
    Bitmask(&'static BitmaskSpec),
    Enum(&'static EnumSpec),
}

fn reject_net_order(attr: &Attribute<'_>) -> Result<()> {
    if attr.is_net_byteorder() {
        return Err(Error::InvalidAttribute(format!(
            "unexpected attribute {} with network byte order set",
            attr.kind()
        )));
    }
    Ok(())
}

impl FieldCodec {
    /// Array of `elem` with ids starting at 1.
    pub fn array(elem: FieldCodec) -> Self {
        FieldCodec::Array {
            elem: Box::new(elem),
            zero_indexed: false,
        }
    }

    /// Map of id to `elem`.
    pub fn map(elem: FieldCodec) -> Self {
        FieldCodec::Map(Box::new(elem))
    }

    /// Nested record.
    pub fn record(schema: Schema) -> Self {
        FieldCodec::Record(Arc::new(schema))
    }

    /// Decode an attribute, rejecting net-order payloads.
    pub fn decode(&self, attr: &Attribute<'_>) -> Result<Value> {
        reject_net_order(attr)?;
        self.decode_payload(attr.payload)
    }

    /// Decode a bare payload.
    pub fn decode_payload(&self, data: &[u8]) -> Result<Value> {
        Ok(match self {
            FieldCodec::U8 => Value::U8(get::u8(data)?),
            FieldCodec::U16 => Value::U16(get::u16_ne(data)?),
            FieldCodec::U32 => Value::U32(get::u32_ne(data)?),
            FieldCodec::U64 => Value::U64(get::u64_ne(data)?),
            FieldCodec::I8 => Value::I8(get::i8(data)?),
            FieldCodec::I16 => Value::I16(get::i16_ne(data)?),
            FieldCodec::I32 => Value::I32(get::i32_ne(data)?),
            FieldCodec::I64 => Value::I64(get::i64_ne(data)?),
            FieldCodec::F32 => Value::F32(get::f32_ne(data)?),
            FieldCodec::F64 => Value::F64(get::f64_ne(data)?),
            FieldCodec::U16Be => Value::U16(get::u16_be(data)?),
            FieldCodec::U32Be => Value::U32(get::u32_be(data)?),
            FieldCodec::Flag => {
                get::flag(data)?;
                Value::Flag
            }
            FieldCodec::Bool => Value::Bool(get::bool(data)?),
            FieldCodec::Str { max_len } => Value::Str(get::string(data, *max_len)?.to_string()),
            FieldCodec::Bytes => Value::Bytes(get::bytes(data).to_vec()),
            FieldCodec::Record(schema) => Value::Record(schema.decode(data)?),
            FieldCodec::Array { elem, zero_indexed } => {
                Value::Array(decode_array(data, *zero_indexed, |a| elem.decode_payload(a.payload))?)
            }
            FieldCodec::Map(elem) => Value::Map(decode_map(data, |a| elem.decode_payload(a.payload))?),
            FieldCodec::Bitmask(spec) => Value::Bits(spec.decode_bits(spec.width.get(data)?)),
            FieldCodec::Enum(spec) => Value::Enum(spec.decode_value(spec.width.get(data)?)),
        })
    }

    /// Encode `value` as attribute `kind`.
    pub fn encode(&self, kind: u16, value: &Value, out: &mut AttrStream) -> Result<()> {
        match (self, value) {
            (FieldCodec::U8, Value::U8(v)) => out.push_u8(kind, *v),
            (FieldCodec::U16, Value::U16(v)) => out.push_u16(kind, *v),
            (FieldCodec::U32, Value::U32(v)) => out.push_u32(kind, *v),
            (FieldCodec::U64, Value::U64(v)) => out.push_u64(kind, *v),
            (FieldCodec::I8, Value::I8(v)) => out.push(kind, &v.to_ne_bytes()),
            (FieldCodec::I16, Value::I16(v)) => out.push(kind, &v.to_ne_bytes()),
            (FieldCodec::I32, Value::I32(v)) => out.push_i32(kind, *v),
            (FieldCodec::I64, Value::I64(v)) => out.push(kind, &v.to_ne_bytes()),
            (FieldCodec::F32, Value::F32(v)) => out.push(kind, &v.to_ne_bytes()),
            (FieldCodec::F64, Value::F64(v)) => out.push(kind, &v.to_ne_bytes()),
            (FieldCodec::U16Be, Value::U16(v)) => out.push_u16_be(kind, *v),
            (FieldCodec::U32Be, Value::U32(v)) => out.push_u32_be(kind, *v),
            (FieldCodec::Flag, Value::Flag) => out.push(kind, &put::flag()),
            (FieldCodec::Bool, Value::Bool(v)) => out.push(kind, &put::bool(*v)),
            (FieldCodec::Str { max_len }, Value::Str(s)) => {
                out.push(kind, &put::string(s, *max_len)?)
            }
            (FieldCodec::Bytes, Value::Bytes(b)) => out.push(kind, b),
            (FieldCodec::Record(schema), Value::Record(r)) => {
                out.push_nested(kind, |s| schema.encode(r, s))
            }
            (FieldCodec::Array { elem, zero_indexed }, Value::Array(items)) => {
                out.push_nested(kind, |s| {
                    encode_array(s, items, *zero_indexed, |s, id, v| elem.encode(id, v, s))
                })
            }
            (FieldCodec::Map(elem), Value::Map(entries)) => out.push_nested(kind, |s| {
                encode_map(s, entries, |s, id, v| elem.encode(id, v, s))
            }),
            (FieldCodec::Bitmask(spec), Value::Bits(mask)) => {
                out.push(kind, &spec.width.put(spec.encode_bits(mask)?)?)
            }
            (FieldCodec::Enum(spec), Value::Enum(v)) => {
                out.push(kind, &spec.width.put(spec.encode_value(v)?)?)
            }
            (codec, value) => Err(Error::Encode(format!(
                "attribute {}: cannot encode {:?} as {}",
                kind,
                value,
                codec.name()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldCodec::U8 => "u8",
            FieldCodec::U16 => "u16",
            FieldCodec::U32 => "u32",
            FieldCodec::U64 => "u64",
            FieldCodec::I8 => "i8",
            FieldCodec::I16 => "i16",
            FieldCodec::I32 => "i32",
            FieldCodec::I64 => "i64",
            FieldCodec::F32 => "f32",
            FieldCodec::F64 => "f64",
            FieldCodec::U16Be => "u16be",
            FieldCodec::U32Be => "u32be",
            FieldCodec::Flag => "flag",
            FieldCodec::Bool => "bool",
            FieldCodec::Str { .. } => "string",
            FieldCodec::Bytes => "bytes",
            FieldCodec::Record(_) => "record",
            FieldCodec::Array { .. } => "array",
            FieldCodec::Map(_) => "map",
            FieldCodec::Bitmask(_) => "bitmask",
            FieldCodec::Enum(_) => "enum",
        }
    }
}

/// A named field of a schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub codec: FieldCodec,
}

/// Dispatch table from attribute id to field codec.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    fields: BTreeMap<u16, Field>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, id: u16, name: &'static str, codec: FieldCodec) -> Self {
        self.fields.insert(id, Field { name, codec });
        self
    }

    /// Schema name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a field by id.
    pub fn get(&self, id: u16) -> Option<&Field> {
        self.fields.get(&id)
    }

    /// Look up a field id by name.
    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.fields
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| *id)
    }

    /// Decode an attribute stream into a record.
    ///
    /// A repeated known id keeps the last occurrence.
    pub fn decode(&self, data: &[u8]) -> Result<Record> {
        let mut record = Record::new();
        parse_attributes(data, |attr| {
            reject_net_order(&attr)?;
            match self.fields.get(&attr.kind()) {
                Some(field) => {
                    let value = field.codec.decode_payload(attr.payload).map_err(|e| {
                        Error::InvalidAttribute(format!("{}.{}: {}", self.name, field.name, e))
                    })?;
                    record.fields.insert(attr.kind(), value);
                }
                None => record.unparsed.push(RawAttribute {
                    raw_type: attr.raw_type,
                    data: attr.payload.to_vec(),
                }),
            }
            Ok(())
        })?;
        Ok(record)
    }

    /// Encode a record: known fields in id order, then unparsed attributes
    /// verbatim.
    pub fn encode(&self, record: &Record, out: &mut AttrStream) -> Result<()> {
        for (id, value) in &record.fields {
            let field = self.fields.get(id).ok_or_else(|| {
                Error::Encode(format!("unknown attribute {} for {}", id, self.name))
            })?;
            field.codec.encode(*id, value, out)?;
        }
        for raw in &record.unparsed {
            out.push(raw.raw_type, &raw.data)?;
        }
        Ok(())
    }

    /// Encode a record into a fresh, padded buffer.
    pub fn encode_to_vec(&self, record: &Record) -> Result<Vec<u8>> {
        let mut out = AttrStream::new();
        self.encode(record, &mut out)?;
        Ok(out.into_bytes())
    }
}

/// Decode an array: attribute ids must run 1, 2, 3, ... (or from 0).
pub fn decode_array<'a, T, F>(data: &'a [u8], zero_indexed: bool, mut f: F) -> Result<Vec<T>>
where
    F: FnMut(Attribute<'a>) -> Result<T>,
{
    let offset = if zero_indexed { 0 } else { 1 };
    let mut items = Vec::new();
    parse_attributes(data, |attr| {
        let expected = items.len() + offset;
        if usize::from(attr.kind()) != expected {
            return Err(Error::NonSequential {
                expected: expected as u16,
                actual: attr.kind(),
            });
        }
        reject_net_order(&attr)?;
        items.push(f(attr)?);
        Ok(())
    })?;
    Ok(items)
}

/// Decode a map keyed by attribute id.
pub fn decode_map<'a, T, F>(data: &'a [u8], mut f: F) -> Result<BTreeMap<u16, T>>
where
    F: FnMut(Attribute<'a>) -> Result<T>,
{
    let mut entries = BTreeMap::new();
    parse_attributes(data, |attr| {
        reject_net_order(&attr)?;
        entries.insert(attr.kind(), f(attr)?);
        Ok(())
    })?;
    Ok(entries)
}

/// Encode an array with sequential ids.
pub fn encode_array<T, F>(
    out: &mut AttrStream,
    items: &[T],
    zero_indexed: bool,
    mut f: F,
) -> Result<()>
where
    F: FnMut(&mut AttrStream, u16, &T) -> Result<()>,
{
    let offset = if zero_indexed { 0 } else { 1 };
    for (n, item) in items.iter().enumerate() {
        let id = u16::try_from(n + offset)
            .map_err(|_| Error::Encode(format!("array too long ({} items)", items.len())))?;
        f(out, id, item)?;
    }
    Ok(())
}

/// Encode a map, using each key as the attribute id.
pub fn encode_map<T, F>(out: &mut AttrStream, entries: &BTreeMap<u16, T>, mut f: F) -> Result<()>
where
    F: FnMut(&mut AttrStream, u16, &T) -> Result<()>,
{
    for (id, item) in entries {
        f(out, *id, item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{NLA_F_NESTED, NLA_F_NET_BYTEORDER, NlAttr, nla_align};

    fn attr(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = NlAttr::new(kind, payload.len()).unwrap().as_bytes().to_vec();
        out.extend_from_slice(payload);
        out.resize(nla_align(out.len()), 0);
        out
    }

    static COLORS: BitmaskSpec = BitmaskSpec {
        width: Width::U32,
        flags: &[("red", 0x1), ("green", 0x2), ("blue", 0x4)],
    };

    static MODE: EnumSpec = EnumSpec {
        width: Width::U8,
        variants: &[("off", 0), ("on", 1)],
    };

    fn simple() -> Schema {
        Schema::new("simple")
            .field(1, "count", FieldCodec::U32)
            .field(2, "tag", FieldCodec::U8)
    }

    #[test]
    fn test_decode_encode_exact_bytes() {
        // type=1 len=8 u32 5, then type=2 len=5 [0x41] and 3 pad bytes
        let mut data = attr(1, &5u32.to_ne_bytes());
        data.extend(attr(2, &[0x41]));
        assert_eq!(data.len(), 16);
        assert_eq!(u16::from_ne_bytes([data[8], data[9]]), 5);

        let record = simple().decode(&data).unwrap();
        assert_eq!(record.get(1), Some(&Value::U32(5)));
        assert_eq!(record.get(2), Some(&Value::U8(0x41)));
        assert!(record.unparsed.is_empty());

        assert_eq!(simple().encode_to_vec(&record).unwrap(), data);
    }

    #[test]
    fn test_unknown_attributes_preserved() {
        let mut data = attr(1, &9u32.to_ne_bytes());
        data.extend(attr(7, &[1, 2, 3]));
        data.extend(attr(9 | NLA_F_NESTED, &attr(1, &[])));

        let record = simple().decode(&data).unwrap();
        assert_eq!(record.unparsed.len(), 2);
        assert_eq!(record.unparsed[0].raw_type, 7);
        assert_eq!(record.unparsed[1].raw_type, 9 | NLA_F_NESTED);

        assert_eq!(simple().encode_to_vec(&record).unwrap(), data);
    }

    #[test]
    fn test_bad_field_length() {
        let data = attr(1, &[1, 2]);
        let err = simple().decode(&data).unwrap_err();
        assert!(err.to_string().contains("simple.count"));
    }

    #[test]
    fn test_net_order_rejected() {
        let data = attr(1 | NLA_F_NET_BYTEORDER, &5u32.to_ne_bytes());
        assert!(simple().decode(&data).is_err());
    }

    #[test]
    fn test_array_sequential() {
        let mut data = attr(1, &10u32.to_ne_bytes());
        data.extend(attr(2, &20u32.to_ne_bytes()));
        let items = decode_array(&data, false, |a| get::u32_ne(a.payload)).unwrap();
        assert_eq!(items, vec![10, 20]);

        let mut gap = attr(1, &10u32.to_ne_bytes());
        gap.extend(attr(3, &30u32.to_ne_bytes()));
        assert!(matches!(
            decode_array(&gap, false, |a| get::u32_ne(a.payload)),
            Err(Error::NonSequential {
                expected: 2,
                actual: 3
            })
        ));

        let zero = attr(0, &1u32.to_ne_bytes());
        assert_eq!(
            decode_array(&zero, true, |a| get::u32_ne(a.payload)).unwrap(),
            vec![1]
        );
        assert!(decode_array(&zero, false, |a| get::u32_ne(a.payload)).is_err());
    }

    #[test]
    fn test_map() {
        let mut data = attr(5, &[1]);
        data.extend(attr(2, &[2]));
        let map = decode_map(&data, |a| get::u8(a.payload)).unwrap();
        assert_eq!(map.get(&5), Some(&1));
        assert_eq!(map.get(&2), Some(&2));
    }

    #[test]
    fn test_bitmask_unknown_bits() {
        let mask = COLORS.decode_bits(0x1 | 0x4 | 0x100);
        assert!(mask.contains("red"));
        assert!(mask.contains("blue"));
        assert!(!mask.contains("green"));
        assert_eq!(mask.unknown, 0x100);
        assert_eq!(COLORS.encode_bits(&mask).unwrap(), 0x105);

        let bad = Bitmask::default().with("purple");
        assert!(COLORS.encode_bits(&bad).is_err());
    }

    #[test]
    fn test_bitmask_zero_flag_never_set() {
        static STATES: BitmaskSpec = BitmaskSpec {
            width: Width::U8,
            flags: &[("none", 0x0), ("up", 0x1)],
        };
        assert!(STATES.decode_bits(0).flags.is_empty());
        let mask = STATES.decode_bits(0x1);
        assert!(mask.contains("up"));
        assert!(!mask.contains("none"));
    }

    #[test]
    fn test_enum() {
        assert_eq!(MODE.decode_value(1), EnumValue::Named("on".into()));
        assert_eq!(MODE.decode_value(7), EnumValue::Raw(7));
        assert_eq!(MODE.encode_value(&EnumValue::Raw(7)).unwrap(), 7);
        assert_eq!(
            MODE.encode_value(&EnumValue::Named("off".into())).unwrap(),
            0
        );
        assert!(MODE.encode_value(&EnumValue::Named("auto".into())).is_err());
    }

    #[test]
    fn test_nested_round_trip() {
        let inner = Schema::new("inner")
            .field(1, "name", FieldCodec::Str { max_len: Some(16) })
            .field(2, "colors", FieldCodec::Bitmask(&COLORS));
        let outer = Schema::new("outer")
            .field(1, "items", FieldCodec::array(FieldCodec::record(inner)))
            .field(2, "mode", FieldCodec::Enum(&MODE))
            .field(3, "ports", FieldCodec::map(FieldCodec::U16));

        let mut ports = BTreeMap::new();
        ports.insert(80, Value::U16(1));
        ports.insert(443, Value::U16(2));
        let record = Record::new()
            .with(
                1,
                Value::Array(vec![
                    Value::Record(Record::new().with(1, Value::Str("a".into()))),
                    Value::Record(
                        Record::new()
                            .with(1, Value::Str("b".into()))
                            .with(2, Value::Bits(COLORS.decode_bits(0x3))),
                    ),
                ]),
            )
            .with(2, Value::Enum(EnumValue::Raw(9)))
            .with(3, Value::Map(ports));

        let bytes = outer.encode_to_vec(&record).unwrap();
        assert_eq!(outer.decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_encode_type_mismatch() {
        let record = Record::new().with(1, Value::Str("x".into()));
        assert!(matches!(
            simple().encode_to_vec(&record),
            Err(Error::Encode(_))
        ));

        let record = Record::new().with(42, Value::U8(0));
        assert!(simple().encode_to_vec(&record).is_err());
    }

    #[test]
    fn test_width_overflow() {
        assert!(Width::U8.put(256).is_err());
        assert_eq!(Width::U16.put(0x1234).unwrap(), 0x1234u16.to_ne_bytes());
    }
}
