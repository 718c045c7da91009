//! Error types for netlink operations.

use std::io;
use std::time::Duration;

/// Result type for netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Errors caused by peer-supplied data (`Framing`, `AttributeDecode`) never
/// tear down a socket; they are reported through the invalid-data channel or
/// returned to the decoder's caller. `Transport` errors are fatal to the
/// requests in flight on the affected socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed message header or length.
    Framing,
    /// Attribute payload did not match the expected shape.
    AttributeDecode,
    /// An outbound attribute or message could not be encoded.
    AttributeEncode,
    /// The kernel (or the peer) rejected a request.
    Protocol,
    /// No reply arrived before the deadline.
    Timeout,
    /// Socket-level failure.
    Transport,
    /// The API was used incorrectly.
    Usage,
}

/// Errors that can occur during netlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection was closed while the operation was pending.
    #[error("connection closed")]
    Closed,

    /// No free local port could be bound.
    #[error("couldn't find a free address after {tries} attempts")]
    NoFreePort {
        /// Number of bind attempts made.
        tries: usize,
    },

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Attribute payload has the wrong size for its declared type.
    #[error("unexpected attribute length: expected {expected}, got {actual}")]
    AttributeLength {
        /// Required payload length.
        expected: usize,
        /// Payload length found.
        actual: usize,
    },

    /// Array attribute ids were not sequential.
    #[error("non-sequential array types: expected {expected}, got {actual}")]
    NonSequential {
        /// The id the next element should have carried.
        expected: u16,
        /// The id actually found.
        actual: u16,
    },

    /// Encoded attribute does not fit the 16-bit length field.
    #[error("maximum attribute length exceeded ({len})")]
    AttributeTooLarge {
        /// Header plus payload length that was attempted.
        len: usize,
    },

    /// Value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// No reply was received in time.
    #[error("request {seq} timed out after {after:?}")]
    Timeout {
        /// Sequence number of the request.
        seq: u32,
        /// Configured deadline.
        after: Duration,
    },

    /// A request with the same sequence number is already in flight.
    #[error("sequence number {seq} is already pending")]
    DuplicateSequence {
        /// The conflicting sequence number.
        seq: u32,
    },

    /// Generic netlink family not found.
    #[error("{name} genl family not available")]
    FamilyNotFound {
        /// The family name that was looked up.
        name: String,
    },

    /// A reply carried a different family id than the request.
    #[error("received reply with different family ({actual}) than original ({expected})")]
    UnexpectedFamily {
        /// Family id of the request.
        expected: u16,
        /// Family id found in the reply.
        actual: u16,
    },
}

impl Error {
    /// Create a kernel error from an errno value.
    ///
    /// Netlink carries errors as negative errno values; both signs are
    /// accepted and the stored errno is always positive.
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.saturating_abs();
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::Kernel { errno, message }
    }

    /// Create a kernel error with operation context.
    pub fn from_errno_with_context(errno: i32, operation: impl Into<String>) -> Self {
        Self::from_errno(errno).with_context(operation)
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Closed | Self::NoFreePort { .. } => ErrorKind::Transport,
            Self::Truncated { .. } | Self::InvalidMessage(_) => ErrorKind::Framing,
            Self::InvalidAttribute(_)
            | Self::AttributeLength { .. }
            | Self::NonSequential { .. } => ErrorKind::AttributeDecode,
            Self::AttributeTooLarge { .. } | Self::Encode(_) => ErrorKind::AttributeEncode,
            Self::Kernel { .. }
            | Self::KernelWithContext { .. }
            | Self::FamilyNotFound { .. }
            | Self::UnexpectedFamily { .. } => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DuplicateSequence { .. } => ErrorKind::Usage,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV, etc.).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => {
                matches!(*errno, libc::ENOENT | libc::ENODEV)
            }
            Self::FamilyNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM | libc::EACCES))
    }

    /// Check if this is a "already exists" error (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// Check if this is a "device busy" error (EBUSY).
    pub fn is_busy(&self) -> bool {
        self.errno() == Some(libc::EBUSY)
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Rebuild an equivalent error for fanning out one failure to several
    /// waiters. I/O errors keep their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Closed => Self::Closed,
            Self::Kernel { errno, .. } => Self::from_errno(*errno),
            other => Self::InvalidMessage(other.to_string()),
        }
    }
}
