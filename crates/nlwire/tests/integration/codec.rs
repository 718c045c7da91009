//! Schema-encoded payloads carried through a connection.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::common::*;
use nlwire::netlink::codec::{Bitmask, BitmaskSpec, EnumSpec, EnumValue, Width};
use nlwire::netlink::{
    AttrStream, ConnectionConfig, FieldCodec, Record, RequestOptions, Schema, Value,
};

static DEVICE_FLAGS: BitmaskSpec = BitmaskSpec {
    width: Width::U32,
    flags: &[("replace_peers", 0x1), ("has_private_key", 0x2)],
};

static STATE: EnumSpec = EnumSpec {
    width: Width::U8,
    variants: &[("down", 0), ("up", 1), ("dormant", 5)],
};

// A tunnel device the way a VPN family might describe it.
static DEVICE: LazyLock<Schema> = LazyLock::new(|| {
    let peer = Schema::new("peer")
        .field(1, "public_key", FieldCodec::Bytes)
        .field(2, "port", FieldCodec::U16Be)
        .field(3, "rx_bytes", FieldCodec::U64);
    Schema::new("device")
        .field(1, "ifindex", FieldCodec::U32)
        .field(2, "ifname", FieldCodec::Str { max_len: Some(16) })
        .field(3, "flags", FieldCodec::Bitmask(&DEVICE_FLAGS))
        .field(4, "state", FieldCodec::Enum(&STATE))
        .field(5, "peers", FieldCodec::array(FieldCodec::record(peer)))
        .field(6, "counters", FieldCodec::map(FieldCodec::U64))
});

const DEVICE_FAMILY: u16 = 0x22;

fn peer(key: u8, port: u16, rx: u64) -> Value {
    Value::Record(
        Record::new()
            .with(1, Value::Bytes(vec![key; 32]))
            .with(2, Value::U16(port))
            .with(3, Value::U64(rx)),
    )
}

fn device() -> Record {
    Record::new()
        .with(1, Value::U32(7))
        .with(2, Value::Str("wg0".into()))
        .with(
            3,
            Value::Bits(Bitmask::default().with("has_private_key")),
        )
        .with(4, Value::Enum(EnumValue::Named("up".into())))
        .with(5, Value::Array(vec![peer(1, 51820, 10), peer(2, 51821, 0)]))
        .with(
            6,
            Value::Map(BTreeMap::from([(3, Value::U64(99)), (9, Value::U64(1))])),
        )
}

#[tokio::test]
async fn test_record_request_and_reply() {
    let (conn, mut peer) = connection(ConnectionConfig::default());
    let request = DEVICE
        .encode_to_vec(&Record::new().with(2, Value::Str("wg0".into())))
        .unwrap();

    let parts = [&request[..]];
    let (result, ()) = tokio::join!(
        conn.request(DEVICE_FAMILY, &parts, RequestOptions::new()),
        async {
            let sent = peer.next_sent().await.unwrap();
            let msgs = sent.messages().unwrap();
            let query = DEVICE.decode(msgs[0].payload).unwrap();
            assert_eq!(query.get(2).and_then(Value::as_str), Some("wg0"));

            // The reply carries an attribute this schema predates.
            let mut attrs = AttrStream::new();
            attrs.push_raw(&DEVICE.encode_to_vec(&device()).unwrap());
            attrs.push_u32(40, 0xfeed).unwrap();
            peer.inject(frame(DEVICE_FAMILY, 0, msgs[0].seq(), attrs.as_bytes()));
        }
    );

    let replies = result.unwrap();
    let record = DEVICE.decode(&replies[0].payload).unwrap();

    let mut expected = device();
    expected.unparsed = record.unparsed.clone();
    assert_eq!(record, expected);
    assert_eq!(record.unparsed.len(), 1);
    assert_eq!(record.unparsed[0].raw_type, 40);

    // Re-encoding reproduces the kernel's bytes, unknown attribute included.
    assert_eq!(DEVICE.encode_to_vec(&record).unwrap(), &replies[0].payload[..]);
}

#[test]
fn test_unknown_enum_and_flag_bits_survive() {
    let mut attrs = AttrStream::new();
    attrs.push_u32(3, 0x2 | 0x80).unwrap();
    attrs.push_u8(4, 42).unwrap();

    let record = DEVICE.decode(attrs.as_bytes()).unwrap();
    let flags = record.get(3).and_then(Value::as_bits).unwrap();
    assert!(flags.contains("has_private_key"));
    assert_eq!(flags.unknown, 0x80);
    assert_eq!(record.get(4), Some(&Value::Enum(EnumValue::Raw(42))));

    assert_eq!(DEVICE.encode_to_vec(&record).unwrap(), attrs.as_bytes());
}

#[test]
fn test_encode_rejects_bad_values() {
    let bad_state = Record::new().with(4, Value::Enum(EnumValue::Named("sideways".into())));
    assert!(DEVICE.encode_to_vec(&bad_state).is_err());

    let long_name = Record::new().with(2, Value::Str("a-very-long-interface".into()));
    assert!(DEVICE.encode_to_vec(&long_name).is_err());

    let wrong_type = Record::new().with(1, Value::Str("7".into()));
    assert!(DEVICE.encode_to_vec(&wrong_type).is_err());
}
