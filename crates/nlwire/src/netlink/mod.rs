//! Async netlink protocol implementation for Linux.
//!
//! The module is layered bottom-up:
//!
//! - [`message`]: the 16-byte header, 4-byte alignment and message framing.
//! - [`attr`] and [`codec`]: TLV attributes and schema-driven records with
//!   nested records, arrays, maps, bitmasks and enums.
//! - [`Connection`]: sequence numbers, multipart reassembly, request/reply
//!   correlation, ACK/ERROR handling, timeouts and liveness, on top of any
//!   [`Transport`].
//! - [`genl`]: the generic netlink sub-header and family resolution.
//!
//! # Quick Start
//!
//! ```ignore
//! use nlwire::netlink::{Connection, Protocol, RequestOptions};
//! use nlwire::netlink::message::NLM_F_DUMP;
//!
//! let conn = Connection::open(Protocol::Generic)?;
//!
//! let replies = conn
//!     .request(0x10, &[&[3, 1, 0, 0]], RequestOptions::new().flags(NLM_F_DUMP))
//!     .await?;
//! for msg in &replies {
//!     println!("type {} seq {}", msg.msg_type(), msg.seq());
//! }
//! ```
//!
//! # Notifications
//!
//! Messages that do not answer a pending request are published on the
//! connection's event stream:
//!
//! ```ignore
//! use nlwire::netlink::SocketEvent;
//! use tokio_stream::StreamExt;
//!
//! conn.add_membership(group)?;
//! conn.set_persistent(true);
//! let mut events = conn.events().unwrap();
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         SocketEvent::Message { messages, .. } => println!("{} messages", messages.len()),
//!         SocketEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod attr;
pub mod builder;
pub mod codec;
pub mod connection;
mod engine;
mod error;
pub mod genl;
pub mod memory;
pub mod message;
mod port;
mod socket;
mod stream;

pub use attr::{AttrIter, Attribute, NlAttr};
pub use builder::{AttrStream, MessageBuilder, NestToken};
pub use codec::{FieldCodec, Record, Schema, Value};
pub use connection::{
    Connection, ConnectionConfig, RequestOptions, SendOptions, check_errors,
};
pub use engine::Reply;
pub use error::{Error, ErrorKind, Result};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType, OwnedMessage};
pub use port::PortAllocator;
pub use socket::{
    Address, Datagram, MessageInfo, NetlinkSocket, Protocol, SocketConfig, Transport,
};
pub use stream::{NetlinkEvents, SocketEvent};
