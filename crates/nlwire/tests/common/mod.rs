//! Common test utilities for integration tests.
//!
//! Provides frame builders and a fake generic netlink controller that
//! answers family dumps over a [`MemoryPeer`].

#![allow(dead_code)]

use nlwire::netlink::genl::ctrl::family_schema;
use nlwire::netlink::genl::{CTRL_VERSION, CtrlCmd, FamilyInfo, GENL_ID_CTRL, GenlMsgHdr};
use nlwire::netlink::memory::{MemoryPeer, MemoryTransport, Sent};
use nlwire::netlink::message::{NLM_F_MULTI, format_message, nlmsg_align};
use nlwire::netlink::{Connection, ConnectionConfig, NlMsgHdr, NlMsgType};

/// Port the memory transport pretends to be bound to.
pub const LOCAL_PORT: u32 = 0x4000_1234;

/// Create a connection over a fresh memory transport.
pub fn connection(config: ConnectionConfig) -> (Connection<MemoryTransport>, MemoryPeer) {
    let (transport, peer) = MemoryTransport::new(LOCAL_PORT);
    (Connection::new(transport, config), peer)
}

/// A single aligned message.
pub fn frame(msg_type: u16, flags: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    let header = NlMsgHdr::new(msg_type, flags).with_seq(seq);
    let mut out = format_message(&header, &[payload]).unwrap();
    out.resize(nlmsg_align(out.len()), 0);
    out
}

/// A generic netlink message.
pub fn genl_frame(family: u16, flags: u16, seq: u32, cmd: u8, attrs: &[u8]) -> Vec<u8> {
    let mut payload = GenlMsgHdr::new(cmd, 1).as_bytes().to_vec();
    payload.extend_from_slice(attrs);
    frame(family, flags, seq, &payload)
}

/// DONE terminating a dump.
pub fn done(seq: u32) -> Vec<u8> {
    frame(NlMsgType::DONE, NLM_F_MULTI, seq, &0i32.to_ne_bytes())
}

/// ERROR message answering the first request in `sent`. `errno` 0 is an ACK.
pub fn error_reply(sent: &Sent, errno: i32) -> Vec<u8> {
    let msgs = sent.messages().unwrap();
    let mut payload = errno.to_ne_bytes().to_vec();
    payload.extend_from_slice(msgs[0].header.as_bytes());
    frame(NlMsgType::ERROR, 0, msgs[0].seq(), &payload)
}

/// Header of the first request in `sent`.
pub fn sent_header(sent: &Sent) -> NlMsgHdr {
    sent.messages().unwrap()[0].header
}

/// Answer controller dumps with `families` until the peer is dropped.
///
/// Requests to any other family are answered with `-ENOENT`.
pub async fn serve_controller(mut peer: MemoryPeer, families: Vec<FamilyInfo>) {
    while let Some(sent) = peer.next_sent().await {
        let header = sent_header(&sent);
        if header.nlmsg_type != GENL_ID_CTRL {
            peer.inject(error_reply(&sent, -libc::ENOENT));
            continue;
        }

        let msgs = sent.messages().unwrap();
        assert_eq!(
            GenlMsgHdr::parse(msgs[0].payload).unwrap(),
            GenlMsgHdr::new(CtrlCmd::GetFamily as u8, CTRL_VERSION)
        );

        let mut datagram = Vec::new();
        for family in &families {
            let attrs = family_schema().encode_to_vec(&family.to_record()).unwrap();
            datagram.extend(genl_frame(
                GENL_ID_CTRL,
                NLM_F_MULTI,
                header.nlmsg_seq,
                CtrlCmd::NewFamily as u8,
                &attrs,
            ));
        }
        datagram.extend(done(header.nlmsg_seq));
        peer.inject(datagram);
    }
}
