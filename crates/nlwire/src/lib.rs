//! Async netlink transport and codec for Linux.
//!
//! This crate implements the parts every netlink subsystem shares: message
//! framing, a schema-driven attribute codec and a per-socket protocol engine
//! that correlates requests with their replies. Subsystem schemas (routing,
//! wireless, tunnels) are built on top of [`netlink::codec`].
//!
//! # Example
//!
//! ```ignore
//! use nlwire::netlink::genl::GenlConnection;
//!
//! #[tokio::main]
//! async fn main() -> nlwire::Result<()> {
//!     let conn = GenlConnection::new()?;
//!
//!     for family in conn.list_families().await? {
//!         println!("{:>5} {}", family.id, family.name);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing without a kernel
//!
//! [`netlink::memory::MemoryTransport`] stands in for the socket so that
//! connections can be driven from tests:
//!
//! ```ignore
//! use nlwire::netlink::{Connection, ConnectionConfig};
//! use nlwire::netlink::memory::MemoryTransport;
//!
//! let (transport, mut peer) = MemoryTransport::new(1234);
//! let conn = Connection::new(transport, ConnectionConfig::default());
//! ```

pub mod netlink;

// Re-export common types at crate root for convenience
pub use netlink::{Connection, Error, Protocol, Result};
