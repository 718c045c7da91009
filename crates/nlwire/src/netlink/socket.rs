//! Kernel transport: datagram sockets bound to a netlink protocol.
//!
//! The protocol engine only talks to the [`Transport`] trait. [`NetlinkSocket`]
//! is the real implementation; tests use
//! [`MemoryTransport`](super::memory::MemoryTransport).

use std::future::Future;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::unix::AsyncFd;

use super::error::{Error, Result};
use super::port::PortAllocator;

/// Number of ports tried before giving up on bind.
pub const BIND_TRIES: usize = 100;

/// Default receive buffer when message peeking is disabled.
pub const DEFAULT_MSG_BUFFER_SIZE: usize = 4096;

/// Netlink protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Routing/device hook (ip, tc, etc.)
    Route,
    /// Generic netlink
    Generic,
    /// Netfilter
    Netfilter,
    /// Kernel connector
    Connector,
    /// Kobject uevent
    KobjectUevent,
    /// Any other protocol number.
    Other(isize),
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Generic => protocols::NETLINK_GENERIC,
            Protocol::Netfilter => protocols::NETLINK_NETFILTER,
            Protocol::Connector => protocols::NETLINK_CONNECTOR,
            Protocol::KobjectUevent => protocols::NETLINK_KOBJECT_UEVENT,
            Protocol::Other(n) => n,
        }
    }
}

/// A netlink address: a port and a multicast group bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub port: u32,
    pub groups: u32,
}

impl Address {
    /// The kernel (port 0, no groups).
    pub const KERNEL: Address = Address { port: 0, groups: 0 };
}

/// Metadata about a received datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageInfo {
    /// Sender port (0 for the kernel).
    pub port: u32,
    /// Multicast groups the datagram was sent to.
    pub groups: u32,
    /// Original length when the datagram did not fit the receive buffer.
    pub truncated: Option<usize>,
}

/// A received datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub info: MessageInfo,
}

/// Datagram transport used by the protocol engine.
pub trait Transport: Send + Sync + 'static {
    /// Port this transport is bound to.
    fn local_port(&self) -> u32;

    /// Send one datagram.
    fn send(&self, data: &[u8], dest: Address) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next datagram.
    fn recv(&self) -> impl Future<Output = Result<Datagram>> + Send;

    /// Join a multicast group.
    fn add_membership(&self, group: u32) -> Result<()>;

    /// Leave a multicast group.
    fn drop_membership(&self, group: u32) -> Result<()>;

    /// Record whether the transport is needed to keep work alive.
    fn set_referenced(&self, referenced: bool);
}

/// Options for opening a [`NetlinkSocket`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Bind to this port instead of allocating one. `Some(0)` lets the
    /// kernel choose.
    pub local_port: Option<u32>,
    /// Multicast groups to bind to.
    pub local_groups: u32,
    /// Size each receive from the pending datagram instead of using a fixed
    /// buffer.
    pub message_peeking: bool,
    /// Fixed receive buffer size used when peeking is disabled.
    pub msg_buffer_size: usize,
    /// SO_RCVBUF to apply after opening.
    pub recv_buffer_size: Option<usize>,
    /// SO_SNDBUF to apply after opening.
    pub send_buffer_size: Option<usize>,
    /// Request extended ACK attributes from the kernel.
    pub ext_ack: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            local_port: None,
            local_groups: 0,
            message_peeking: true,
            msg_buffer_size: DEFAULT_MSG_BUFFER_SIZE,
            recv_buffer_size: None,
            send_buffer_size: None,
            ext_ack: true,
        }
    }
}

impl SocketConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a specific port.
    pub fn local_port(mut self, port: u32) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Bind to multicast groups.
    pub fn local_groups(mut self, groups: u32) -> Self {
        self.local_groups = groups;
        self
    }

    /// Enable or disable message peeking.
    pub fn message_peeking(mut self, enabled: bool) -> Self {
        self.message_peeking = enabled;
        self
    }

    /// Set the fixed receive buffer size.
    pub fn msg_buffer_size(mut self, size: usize) -> Self {
        self.msg_buffer_size = size;
        self
    }

    /// Set SO_RCVBUF.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Set SO_SNDBUF.
    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Enable or disable extended ACK.
    pub fn ext_ack(mut self, enabled: bool) -> Self {
        self.ext_ack = enabled;
        self
    }
}

/// Async netlink socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor.
    fd: AsyncFd<Socket>,
    /// Local port ID.
    port: u32,
    /// Protocol this socket uses.
    protocol: Protocol,
    message_peeking: bool,
    msg_buffer_size: usize,
    referenced: AtomicBool,
}

impl std::fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("fd", &self.as_raw_fd())
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl NetlinkSocket {
    /// Create a socket with the default configuration and a port derived
    /// from the process id.
    pub fn new(protocol: Protocol) -> Result<Self> {
        Self::open(
            protocol,
            &SocketConfig::default(),
            &mut PortAllocator::for_process(),
        )
    }

    /// Open and bind a socket.
    ///
    /// Without an explicit `local_port`, candidate ports come from `ports`;
    /// ports already in use are skipped, up to [`BIND_TRIES`] attempts.
    pub fn open(protocol: Protocol, config: &SocketConfig, ports: &mut PortAllocator) -> Result<Self> {
        let mut socket = Socket::new(protocol.as_isize())?;
        socket.set_non_blocking(true)?;

        let port = Self::bind(&mut socket, config, ports)?;

        if config.ext_ack
            && let Err(e) = socket.set_ext_ack(true)
        {
            tracing::debug!(error = %e, "extended ACK not supported");
        }

        if let Some(size) = config.recv_buffer_size {
            socket.set_rx_buf_sz(buffer_size(size)?)?;
        }
        if let Some(size) = config.send_buffer_size {
            set_send_buffer(socket.as_raw_fd(), size)?;
        }

        tracing::debug!(?protocol, port, "netlink socket bound");

        Ok(Self {
            fd: AsyncFd::new(socket)?,
            port,
            protocol,
            message_peeking: config.message_peeking,
            msg_buffer_size: config.msg_buffer_size,
            referenced: AtomicBool::new(false),
        })
    }

    fn bind(socket: &mut Socket, config: &SocketConfig, ports: &mut PortAllocator) -> Result<u32> {
        let groups = config.local_groups;
        if let Some(port) = config.local_port {
            socket.bind(&SocketAddr::new(port, groups))?;
            let mut addr = SocketAddr::new(0, 0);
            socket.get_address(&mut addr)?;
            return Ok(addr.port_number());
        }

        for _ in 0..BIND_TRIES {
            let port = ports.next_port();
            match socket.bind(&SocketAddr::new(port, groups)) {
                Ok(()) => return Ok(port),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    tracing::trace!(port, "port in use");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::NoFreePort { tries: BIND_TRIES })
    }

    /// Get the local port ID.
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Get the protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether the socket is currently marked as referenced.
    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::Relaxed)
    }

    /// Current SO_RCVBUF value.
    pub fn recv_buffer_size(&self) -> Result<usize> {
        Ok(self.fd.get_ref().get_rx_buf_sz()?)
    }

    /// Set SO_RCVBUF.
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<()> {
        Ok(self.fd.get_ref().set_rx_buf_sz(buffer_size(size)?)?)
    }

    /// Current SO_SNDBUF value.
    pub fn send_buffer_size(&self) -> Result<usize> {
        get_send_buffer(self.as_raw_fd())
    }

    /// Set SO_SNDBUF.
    pub fn set_send_buffer_size(&self, size: usize) -> Result<()> {
        set_send_buffer(self.as_raw_fd(), size)
    }

    /// Send a datagram.
    pub async fn send_to(&self, data: &[u8], dest: Address) -> Result<()> {
        let addr = SocketAddr::new(dest.port, dest.groups);
        loop {
            let mut guard = self.fd.writable().await?;

            match guard.try_io(|inner| inner.get_ref().send_to(data, &addr, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive a datagram.
    pub async fn recv_datagram(&self) -> Result<Datagram> {
        loop {
            let mut guard = self.fd.readable().await?;

            match guard.try_io(|inner| self.recv_now(inner.get_ref())) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    fn recv_now(&self, socket: &Socket) -> io::Result<Datagram> {
        let size = if self.message_peeking {
            socket
                .recv_from(&mut BytesMut::new(), libc::MSG_PEEK | libc::MSG_TRUNC)?
                .0
        } else {
            self.msg_buffer_size
        };

        let mut buf = BytesMut::with_capacity(size);
        // With MSG_TRUNC the returned length is the full datagram size, while
        // netlink-sys only advances the buffer by what was copied.
        let (len, sender) = socket.recv_from(&mut buf, libc::MSG_TRUNC)?;
        let received = buf.len();

        Ok(Datagram {
            data: buf.freeze(),
            info: MessageInfo {
                port: sender.port_number(),
                groups: sender.multicast_groups(),
                truncated: (len > received).then_some(len),
            },
        })
    }
}

impl Transport for NetlinkSocket {
    fn local_port(&self) -> u32 {
        self.port
    }

    fn send(&self, data: &[u8], dest: Address) -> impl Future<Output = Result<()>> + Send {
        self.send_to(data, dest)
    }

    fn recv(&self) -> impl Future<Output = Result<Datagram>> + Send {
        self.recv_datagram()
    }

    fn add_membership(&self, group: u32) -> Result<()> {
        self.fd.get_ref().add_membership(group)?;
        Ok(())
    }

    fn drop_membership(&self, group: u32) -> Result<()> {
        self.fd.get_ref().drop_membership(group)?;
        Ok(())
    }

    fn set_referenced(&self, referenced: bool) {
        self.referenced.store(referenced, Ordering::Relaxed);
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

fn buffer_size(size: usize) -> Result<libc::c_int> {
    libc::c_int::try_from(size)
        .map_err(|_| Error::InvalidMessage(format!("buffer size {} too large", size)))
}

// netlink-sys has no accessor for SO_SNDBUF.
fn set_send_buffer(fd: RawFd, size: usize) -> Result<()> {
    let value = buffer_size(size)?;
    // SAFETY: value lives for the duration of the call and its size is passed.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(())
}

fn get_send_buffer(fd: RawFd) -> Result<usize> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value and len point to writable storage of the advertised size.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if ret < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(value.max(0) as usize)
}
