//! Connection behavior over the memory transport.

use std::time::Duration;

use crate::common::*;
use nlwire::netlink::message::{NLM_F_DUMP, NLM_F_MULTI, NLM_F_REQUEST};
use nlwire::netlink::{
    ConnectionConfig, Error, ErrorKind, NlMsgType, RequestOptions, SendOptions, SocketEvent,
};

#[tokio::test]
async fn test_dump_across_datagrams() {
    let (conn, mut peer) = connection(ConnectionConfig::default());
    let mut events = conn.events().unwrap();

    let (result, ()) = tokio::join!(
        conn.request(0x20, &[], RequestOptions::new().flags(NLM_F_DUMP)),
        async {
            let sent = peer.next_sent().await.unwrap();
            let seq = sent_header(&sent).nlmsg_seq;
            peer.inject(frame(0x20, NLM_F_MULTI, seq, b"one"));
            peer.inject([frame(0x20, NLM_F_MULTI, seq, b"two"), done(seq)].concat());
            // A multicast notification after the dump finished.
            peer.inject(frame(0x21, 0, 0, b"event"));
        }
    );

    let replies = result.unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(&replies[0].payload[..], b"one");
    assert_eq!(&replies[1].payload[..], b"two");

    match events.recv().await.unwrap() {
        SocketEvent::Message { messages, .. } => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].msg_type(), 0x21);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_dump() {
    let (conn, mut peer) = connection(ConnectionConfig::default());

    let (result, ()) = tokio::join!(
        conn.request(0x20, &[], RequestOptions::new().flags(NLM_F_DUMP)),
        async {
            let sent = peer.next_sent().await.unwrap();
            peer.inject(done(sent_header(&sent).nlmsg_seq));
        }
    );

    assert!(result.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_batch_is_invalid() {
    let (conn, mut peer) = connection(ConnectionConfig::default());
    let mut events = conn.events().unwrap();

    let opts = RequestOptions::new()
        .flags(NLM_F_DUMP)
        .timeout(Duration::from_secs(1));
    let (result, ()) = tokio::join!(conn.request(0x20, &[], opts), async {
        let sent = peer.next_sent().await.unwrap();
        let seq = sent_header(&sent).nlmsg_seq;
        peer.inject(frame(0x20, NLM_F_MULTI, seq, b"partial"));
        peer.inject(frame(0x21, 0, seq + 100, b"other"));
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(conn.pending_requests(), 0);

    match events.recv().await.unwrap() {
        SocketEvent::Invalid { error, data, .. } => {
            assert_eq!(error.kind(), ErrorKind::Framing);
            assert!(!data.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        SocketEvent::Message { .. }
    ));
}

#[tokio::test]
async fn test_garbage_datagram_is_reported() {
    let (conn, peer) = connection(ConnectionConfig::default());
    let mut events = conn.events().unwrap();

    // Length field claims more than the datagram holds.
    let mut data = frame(0x20, 0, 1, b"abcd");
    data.truncate(18);
    peer.inject(data);

    match events.recv().await.unwrap() {
        SocketEvent::Invalid { data, .. } => assert_eq!(data.len(), 18),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_request_flag_skips_correlation() {
    let (conn, mut peer) = connection(ConnectionConfig::default());
    let mut events = conn.events().unwrap();

    let opts = RequestOptions::new().timeout(Duration::from_millis(50));
    let (result, ()) = tokio::join!(conn.request(0x20, &[], opts), async {
        let sent = peer.next_sent().await.unwrap();
        let seq = sent_header(&sent).nlmsg_seq;
        // A request from another port reusing our sequence number.
        peer.inject(frame(0x20, NLM_F_REQUEST, seq, b"foreign"));
    });

    assert!(result.unwrap_err().is_timeout());
    match events.recv().await.unwrap() {
        SocketEvent::Message { messages, .. } => {
            assert_eq!(&messages[0].payload[..], b"foreign");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_persistent_connection_stays_referenced() {
    let (conn, mut peer) = connection(ConnectionConfig::new().persistent(true));
    assert!(peer.is_referenced());

    let (result, ()) = tokio::join!(conn.request(0x20, &[], RequestOptions::new()), async {
        let sent = peer.next_sent().await.unwrap();
        peer.inject(error_reply(&sent, 0));
    });
    result.unwrap();
    assert!(peer.is_referenced());

    conn.set_persistent(false);
    assert!(!peer.is_referenced());
}

#[tokio::test]
async fn test_explicit_seq_and_port() {
    let (conn, mut peer) = connection(ConnectionConfig::default());

    let seq = conn
        .send(0x20, &[b"x"], SendOptions::new().seq(500).local_port(7))
        .await
        .unwrap();
    assert_eq!(seq, 500);

    let header = sent_header(&peer.next_sent().await.unwrap());
    assert_eq!(header.nlmsg_seq, 500);
    assert_eq!(header.nlmsg_pid, 7);

    // Allocation is independent of explicitly chosen numbers.
    let seq = conn.send(0x20, &[], SendOptions::new()).await.unwrap();
    assert_eq!(sent_header(&peer.next_sent().await.unwrap()).nlmsg_pid, LOCAL_PORT);
    assert_ne!(seq, 0);
}

#[tokio::test]
async fn test_kernel_error_with_context() {
    let (conn, mut peer) = connection(ConnectionConfig::default());

    let (result, ()) = tokio::join!(conn.request(0x20, &[], RequestOptions::new()), async {
        let sent = peer.next_sent().await.unwrap();
        peer.inject(error_reply(&sent, -libc::EPERM));
    });

    let err = result.unwrap_err().with_context("set thing");
    assert!(err.is_permission_denied());
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().starts_with("set thing: "));
    assert!(matches!(err, Error::KernelWithContext { .. }));
}

#[tokio::test]
async fn test_bounded_events_drop_when_full() {
    let (conn, mut peer) = connection(ConnectionConfig::new().event_capacity(1));
    let mut events = conn.events().unwrap();

    peer.inject(frame(0x21, 0, 0, b"first"));
    peer.inject(frame(0x21, 0, 0, b"second"));

    // Flush the reader with a request round trip.
    let (result, ()) = tokio::join!(conn.request(0x20, &[], RequestOptions::new()), async {
        let sent = peer.next_sent().await.unwrap();
        peer.inject(error_reply(&sent, 0));
    });
    result.unwrap();

    match events.recv().await.unwrap() {
        SocketEvent::Message { messages, .. } => {
            assert_eq!(&messages[0].payload[..], b"first");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_notifications_before_subscribe_are_not_kept() {
    let (conn, mut peer) = connection(ConnectionConfig::default());

    for _ in 0..10_000 {
        peer.inject(frame(0x21, 0, 0, b"early"));
    }
    // Flush the reader with a request round trip.
    let (result, ()) = tokio::join!(conn.request(0x20, &[], RequestOptions::new()), async {
        let sent = peer.next_sent().await.unwrap();
        peer.inject(error_reply(&sent, 0));
    });
    result.unwrap();

    let mut events = conn.events().unwrap();
    assert!(events.try_recv().is_none());

    peer.inject(frame(0x21, 0, 0, b"late"));
    match events.recv().await.unwrap() {
        SocketEvent::Message { messages, .. } => {
            assert_eq!(&messages[0].payload[..], b"late");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_dump_interrupted_by_kernel_error() {
    let (conn, mut peer) = connection(ConnectionConfig::default());

    let (result, ()) = tokio::join!(
        conn.request(0x20, &[], RequestOptions::new().flags(NLM_F_DUMP)),
        async {
            let sent = peer.next_sent().await.unwrap();
            let seq = sent_header(&sent).nlmsg_seq;
            peer.inject(
                [
                    frame(0x20, NLM_F_MULTI, seq, b"one"),
                    frame(NlMsgType::DONE, NLM_F_MULTI, seq, &(-libc::EBUSY).to_ne_bytes()),
                ]
                .concat(),
            );
        }
    );
    let err = result.unwrap_err();
    assert!(err.is_busy());

    // Without error checking the partial batch and the status are returned.
    let opts = RequestOptions::new().flags(NLM_F_DUMP).check_error(false);
    let (reply, ()) = tokio::join!(conn.request_reply(0x20, &[], opts), async {
        let sent = peer.next_sent().await.unwrap();
        let seq = sent_header(&sent).nlmsg_seq;
        peer.inject(
            [
                frame(0x20, NLM_F_MULTI, seq, b"one"),
                frame(NlMsgType::DONE, NLM_F_MULTI, seq, &(-libc::EBUSY).to_ne_bytes()),
            ]
            .concat(),
        );
    });
    let reply = reply.unwrap();
    assert_eq!(reply.messages.len(), 1);
    assert_eq!(reply.status, -libc::EBUSY);
}
