//! Generic Netlink connection with family resolution.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio_stream::Stream;

use super::ctrl::{FamilyInfo, family_schema};
use super::header::GenlMsgHdr;
use super::{CTRL_VERSION, CtrlCmd, GENL_ID_CTRL, GenlFrame, GenlMessage};
use crate::netlink::codec::Record;
use crate::netlink::connection::{Connection, ConnectionConfig, RequestOptions, SendOptions};
use crate::netlink::engine::encode_batch;
use crate::netlink::error::{Error, Result};
use crate::netlink::message::{NLM_F_DUMP, OwnedMessage};
use crate::netlink::socket::{MessageInfo, NetlinkSocket, Protocol, Transport};
use crate::netlink::stream::{NetlinkEvents, SocketEvent};

/// Cache for resolved family information.
#[derive(Debug, Default)]
struct FamilyCache {
    families: HashMap<String, FamilyInfo>,
}

/// Generic Netlink connection.
///
/// Provides family ID resolution and high-level GENL operations.
/// Family IDs are cached to avoid repeated kernel queries.
///
/// # Example
///
/// ```rust,no_run
/// use nlwire::netlink::genl::GenlConnection;
///
/// # async fn example() -> nlwire::Result<()> {
/// let conn = GenlConnection::new()?;
///
/// // Get family info (cached after first call)
/// let wg_family = conn.get_family("wireguard").await?;
/// println!("WireGuard family ID: {}", wg_family.id);
///
/// // Check if a family exists
/// if conn.get_family("macsec").await.is_ok() {
///     println!("MACsec is available");
/// }
/// # Ok(())
/// # }
/// ```
pub struct GenlConnection<T: Transport = NetlinkSocket> {
    conn: Connection<T>,
    cache: Arc<RwLock<FamilyCache>>,
}

impl GenlConnection<NetlinkSocket> {
    /// Create a new Generic Netlink connection.
    pub fn new() -> Result<Self> {
        Ok(Self::from_connection(Connection::open(Protocol::Generic)?))
    }
}

impl<T: Transport> GenlConnection<T> {
    /// Create a GENL connection over an arbitrary transport.
    pub fn with_transport(transport: T, config: ConnectionConfig) -> Self {
        Self::from_connection(Connection::new(transport, config))
    }

    /// Create a GENL connection from an existing connection.
    ///
    /// The connection must use `Protocol::Generic`.
    pub fn from_connection(conn: Connection<T>) -> Self {
        Self {
            conn,
            cache: Arc::new(RwLock::new(FamilyCache::default())),
        }
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection<T> {
        &self.conn
    }

    /// Take the event stream. Returns `None` after the first call.
    pub fn events(&self) -> Option<GenlEvents> {
        self.conn.events().map(|inner| GenlEvents { inner })
    }

    /// Send a GENL message without waiting for a reply.
    ///
    /// Returns the sequence number used.
    pub async fn send(
        &self,
        family: u16,
        cmd: u8,
        version: u8,
        payload: &[&[u8]],
        opts: SendOptions,
    ) -> Result<u32> {
        let header = GenlMsgHdr::new(cmd, version);
        let segments = with_header(&header, payload);
        self.conn.send(family, &segments, opts).await
    }

    /// Send a GENL command and wait for its replies.
    ///
    /// Every reply must belong to `family`; anything else fails with
    /// [`Error::UnexpectedFamily`].
    pub async fn request(
        &self,
        family: u16,
        cmd: u8,
        version: u8,
        payload: &[&[u8]],
        opts: RequestOptions,
    ) -> Result<Vec<GenlMessage>> {
        let header = GenlMsgHdr::new(cmd, version);
        let segments = with_header(&header, payload);
        let replies = self.conn.request(family, &segments, opts).await?;
        replies
            .iter()
            .map(|msg| {
                if msg.msg_type() != family {
                    return Err(Error::UnexpectedFamily {
                        expected: family,
                        actual: msg.msg_type(),
                    });
                }
                GenlMessage::parse(msg)
            })
            .collect()
    }

    /// Send a controller command and decode the replies.
    pub async fn ctrl_request(
        &self,
        cmd: CtrlCmd,
        record: &Record,
        opts: RequestOptions,
    ) -> Result<Vec<Record>> {
        let attrs = family_schema().encode_to_vec(record)?;
        let replies = self
            .request(GENL_ID_CTRL, cmd as u8, CTRL_VERSION, &[&attrs], opts)
            .await?;
        replies
            .iter()
            .map(|msg| family_schema().decode(&msg.payload))
            .collect()
    }

    /// Dump every family registered with the controller.
    pub async fn list_families(&self) -> Result<Vec<FamilyInfo>> {
        self.list_families_with(RequestOptions::new()).await
    }

    /// Like [`list_families`](Self::list_families) with explicit options.
    ///
    /// The DUMP flag is always added.
    pub async fn list_families_with(&self, opts: RequestOptions) -> Result<Vec<FamilyInfo>> {
        let opts = opts.flags(opts.send.flags | NLM_F_DUMP);
        let records = self
            .ctrl_request(CtrlCmd::GetFamily, &Record::new(), opts)
            .await?;
        records.iter().map(FamilyInfo::from_record).collect()
    }

    /// Query the controller for a family, bypassing the cache.
    pub async fn resolve_family(&self, name: &str) -> Result<FamilyInfo> {
        self.resolve_family_with(name, RequestOptions::new()).await
    }

    /// Like [`resolve_family`](Self::resolve_family) with explicit options.
    pub async fn resolve_family_with(&self, name: &str, opts: RequestOptions) -> Result<FamilyInfo> {
        self.list_families_with(opts)
            .await?
            .into_iter()
            .find(|family| family.name == name)
            .ok_or_else(|| Error::FamilyNotFound {
                name: name.to_string(),
            })
    }

    /// Get information about a Generic Netlink family.
    ///
    /// The result is cached, so subsequent calls for the same family
    /// do not require kernel communication.
    pub async fn get_family(&self, name: &str) -> Result<FamilyInfo> {
        // Check cache first
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(info) = cache.families.get(name) {
                tracing::debug!(name, id = info.id, "family cache hit");
                return Ok(info.clone());
            }
        }

        let info = self.resolve_family(name).await?;

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .families
            .insert(name.to_string(), info.clone());

        Ok(info)
    }

    /// Get the family ID for a given family name.
    ///
    /// This is a convenience method that returns just the ID.
    pub async fn get_family_id(&self, name: &str) -> Result<u16> {
        Ok(self.get_family(name).await?.id)
    }

    /// Clear the family cache.
    ///
    /// This is rarely needed, but may be useful if families are
    /// dynamically loaded/unloaded.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .families
            .clear();
    }
}

fn with_header<'a>(header: &'a GenlMsgHdr, payload: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut segments = Vec::with_capacity(payload.len() + 1);
    segments.push(header.as_bytes());
    segments.extend_from_slice(payload);
    segments
}

/// A [`SocketEvent`] with its messages classified.
#[derive(Debug)]
pub enum GenlEvent {
    /// A notification or late reply.
    Message {
        frames: Vec<GenlFrame>,
        info: MessageInfo,
    },
    /// Undecodable data, including family messages without a GENL header.
    Invalid {
        error: Error,
        data: Bytes,
        info: MessageInfo,
    },
    Error(Error),
    Closed,
}

impl From<SocketEvent> for GenlEvent {
    fn from(event: SocketEvent) -> Self {
        match event {
            SocketEvent::Message { messages, info } => classify_all(messages, info),
            SocketEvent::Invalid { error, data, info } => GenlEvent::Invalid { error, data, info },
            SocketEvent::Error(error) => GenlEvent::Error(error),
            SocketEvent::Closed => GenlEvent::Closed,
        }
    }
}

fn classify_all(messages: Vec<OwnedMessage>, info: MessageInfo) -> GenlEvent {
    let frames: Result<Vec<GenlFrame>> = messages
        .iter()
        .cloned()
        .map(GenlFrame::classify)
        .collect();
    match frames {
        Ok(frames) => GenlEvent::Message { frames, info },
        Err(error) => {
            tracing::warn!(%error, "invalid generic netlink notification");
            GenlEvent::Invalid {
                error,
                data: encode_batch(&messages),
                info,
            }
        }
    }
}

/// Stream of [`GenlEvent`]s from a [`GenlConnection`].
#[derive(Debug)]
pub struct GenlEvents {
    inner: NetlinkEvents,
}

impl GenlEvents {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<GenlEvent> {
        self.inner.recv().await.map(GenlEvent::from)
    }
}

impl Stream for GenlEvents {
    type Item = GenlEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|event| event.map(GenlEvent::from))
    }
}
