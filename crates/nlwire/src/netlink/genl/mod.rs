//! Generic Netlink (GENL) support.
//!
//! Generic Netlink extends the standard netlink protocol with:
//! - Dynamic family ID allocation (resolved via the control family)
//! - A 4-byte sub-header carrying a family-specific command and version
//! - Multicast group support per family
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Family codecs (wireguard, nl80211, ...) │
//! └────────────────┬────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────┐
//! │ GenlConnection                          │
//! │ (sub-header, controller, family cache)  │
//! └────────────────┬────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────┐
//! │ Connection (Protocol::Generic)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use nlwire::netlink::genl::GenlConnection;
//!
//! let conn = GenlConnection::new()?;
//! let family = conn.get_family("wireguard").await?;
//! println!("WireGuard family ID: {}", family.id);
//! ```

mod connection;
pub mod ctrl;
mod header;

use bytes::Bytes;

pub use connection::{GenlConnection, GenlEvent, GenlEvents};
pub use ctrl::{FamilyInfo, OperationInfo};
pub use header::{GENL_HDRLEN, GenlMsgHdr};

use crate::netlink::error::Result;
use crate::netlink::message::{NlMsgType, OwnedMessage};

/// Length of a family name including the terminator.
pub const GENL_NAMSIZ: usize = 16;

/// Lowest dynamically assigned family id.
pub const GENL_MIN_ID: u16 = NlMsgType::MIN_TYPE;
/// Highest family id.
pub const GENL_MAX_ID: u16 = 1023;

// Control family constants (fixed, not dynamically assigned)
pub const GENL_ID_CTRL: u16 = GENL_MIN_ID;
/// Version of the control family interface.
pub const CTRL_VERSION: u8 = 1;

/// Control family commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    Unspec = 0,
    NewFamily = 1,
    DelFamily = 2,
    GetFamily = 3,
    NewOps = 4,
    DelOps = 5,
    GetOps = 6,
    NewMcastGrp = 7,
    DelMcastGrp = 8,
    GetMcastGrp = 9,
    GetPolicy = 10,
}

/// Control family attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    Unspec = 0,
    FamilyId = 1,
    FamilyName = 2,
    Version = 3,
    HdrSize = 4,
    MaxAttr = 5,
    Ops = 6,
    McastGroups = 7,
}

/// Control family operation attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrOp {
    Unspec = 0,
    Id = 1,
    Flags = 2,
}

/// Control family multicast group attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrMcastGrp {
    Unspec = 0,
    Name = 1,
    Id = 2,
}

/// Check if a message type is in the generic family range.
pub fn is_genl_family(msg_type: u16) -> bool {
    (GENL_MIN_ID..=GENL_MAX_ID).contains(&msg_type)
}

/// A message with its GENL sub-header split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenlMessage {
    /// Family id (the netlink message type).
    pub family: u16,
    pub flags: u16,
    pub seq: u32,
    pub port: u32,
    pub cmd: u8,
    pub version: u8,
    /// Payload after the GENL header.
    pub payload: Bytes,
}

impl GenlMessage {
    /// Strip the GENL header from a netlink message.
    pub fn parse(msg: &OwnedMessage) -> Result<Self> {
        let header = GenlMsgHdr::parse(&msg.payload)?;
        Ok(Self {
            family: msg.msg_type(),
            flags: msg.flags(),
            seq: msg.seq(),
            port: msg.port(),
            cmd: header.cmd,
            version: header.version,
            payload: msg.payload.slice(GENL_HDRLEN..),
        })
    }
}

/// A received message: generic family messages are split, everything else
/// (ERROR, DONE, ...) is passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenlFrame {
    Genl(GenlMessage),
    Raw(OwnedMessage),
}

impl GenlFrame {
    /// Classify a message by its type.
    pub fn classify(msg: OwnedMessage) -> Result<Self> {
        if is_genl_family(msg.msg_type()) {
            GenlMessage::parse(&msg).map(GenlFrame::Genl)
        } else {
            Ok(GenlFrame::Raw(msg))
        }
    }
}
