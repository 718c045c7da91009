//! Generic netlink family resolution and requests.

use std::collections::BTreeMap;

use crate::common::*;
use nlwire::netlink::codec::Bitmask;
use nlwire::netlink::genl::{
    FamilyInfo, GENL_ID_CTRL, GenlConnection, GenlMsgHdr, OperationInfo,
};
use nlwire::netlink::memory::MemoryTransport;
use nlwire::netlink::message::{NLM_F_DUMP, NLM_F_MULTI};
use nlwire::netlink::{AttrStream, ConnectionConfig, ErrorKind, RequestOptions};

fn family(id: u16, name: &str, groups: &[(&str, u32)]) -> FamilyInfo {
    FamilyInfo {
        id,
        name: name.into(),
        version: 1,
        hdr_size: 0,
        max_attr: 9,
        ops: vec![OperationInfo {
            id: 0,
            flags: Bitmask::default().with("cmd_cap_dump"),
        }],
        mcast_groups: groups
            .iter()
            .map(|(name, id)| (name.to_string(), *id))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn genl() -> (GenlConnection<MemoryTransport>, nlwire::netlink::memory::MemoryPeer) {
    let (transport, peer) = MemoryTransport::new(LOCAL_PORT);
    (
        GenlConnection::with_transport(transport, ConnectionConfig::default()),
        peer,
    )
}

#[tokio::test]
async fn test_list_and_resolve() {
    let (conn, peer) = genl();
    let families = vec![
        family(GENL_ID_CTRL, "nlctrl", &[("notify", 0x10)]),
        family(0x15, "wireguard", &[]),
        family(0x1b, "nl80211", &[("scan", 4), ("mlme", 5)]),
    ];
    let server = tokio::spawn(serve_controller(peer, families.clone()));

    let listed = conn.list_families().await.unwrap();
    assert_eq!(listed, families);

    let wifi = conn.get_family("nl80211").await.unwrap();
    assert_eq!(wifi.mcast_group("mlme"), Some(5));
    assert_eq!(conn.get_family_id("wireguard").await.unwrap(), 0x15);

    let missing = conn.get_family("macsec").await.unwrap_err();
    assert!(missing.is_not_found());
    assert_eq!(missing.kind(), ErrorKind::Protocol);
    assert_eq!(missing.to_string(), "macsec genl family not available");

    drop(conn);
    server.await.unwrap();
}

#[tokio::test]
async fn test_family_command_round_trip() {
    let (conn, mut peer) = genl();
    let wireguard = family(0x15, "wireguard", &[]);

    let client = async {
        let id = conn.get_family_id("wireguard").await?;
        let mut attrs = AttrStream::new();
        attrs.push_str(2, "wg0")?;
        conn.request(
            id,
            0,
            1,
            &[attrs.as_bytes()],
            RequestOptions::new().flags(NLM_F_DUMP),
        )
        .await
    };

    let server = async {
        // Family resolution.
        let sent = peer.next_sent().await.unwrap();
        let header = sent_header(&sent);
        assert_eq!(header.nlmsg_type, GENL_ID_CTRL);
        let attrs = nlwire::netlink::genl::ctrl::family_schema()
            .encode_to_vec(&wireguard.to_record())
            .unwrap();
        peer.inject(
            [
                genl_frame(GENL_ID_CTRL, NLM_F_MULTI, header.nlmsg_seq, 1, &attrs),
                done(header.nlmsg_seq),
            ]
            .concat(),
        );

        // The device dump itself.
        let sent = peer.next_sent().await.unwrap();
        let msgs = sent.messages().unwrap();
        assert_eq!(msgs[0].msg_type(), 0x15);
        assert_eq!(GenlMsgHdr::parse(msgs[0].payload).unwrap(), GenlMsgHdr::new(0, 1));
        let seq = msgs[0].seq();
        peer.inject(
            [
                genl_frame(0x15, NLM_F_MULTI, seq, 0, b"dev0"),
                genl_frame(0x15, NLM_F_MULTI, seq, 0, b"dev1"),
                done(seq),
            ]
            .concat(),
        );
    };

    let (result, ()) = tokio::join!(client, server);
    let replies = result.unwrap();
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|m| m.family == 0x15 && m.cmd == 0));
    assert_eq!(&replies[1].payload[..], b"dev1");
}

#[tokio::test]
async fn test_family_error_is_reported() {
    let (conn, peer) = genl();
    let server = tokio::spawn(serve_controller(peer, Vec::new()));

    // Requests outside the controller are refused by the fake kernel.
    let err = conn
        .request(0x30, 1, 1, &[], RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.errno(), Some(libc::ENOENT));

    drop(conn);
    server.await.unwrap();
}
