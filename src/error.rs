//! Unified error types for the nwplink host driver.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! caller-facing API uniform. All variants are `Copy` so they can be cheaply
//! carried through waiter slots and flush paths without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level driver error
// ---------------------------------------------------------------------------

/// Every fallible operation in the driver funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The command deadline elapsed with no matching response.
    Timeout,
    /// An inbound frame failed to decode (bad header, length mismatch).
    MalformedFrame,
    /// Double-submit on a queue that already has a command in flight,
    /// or an API call that is invalid in the current driver state.
    InvalidState,
    /// The buffer pool (or a bounded queue list) could not satisfy the
    /// request within its timeout.
    AllocationFailed,
    /// The transport link failed.
    Link(LinkError),
    /// The driver has not been started, or has been shut down.
    NotInitialized,
    /// The command was forcibly completed by a queue flush.
    Flushed(FlushReason),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "command timed out"),
            Self::MalformedFrame => write!(f, "malformed frame"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::AllocationFailed => write!(f, "allocation failed"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::NotInitialized => write!(f, "driver not initialized"),
            Self::Flushed(r) => write!(f, "flushed: {r}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// DMA or bus-level transfer fault reported by the transport.
    DmaFault,
    /// The transport's own completion wait timed out.
    HardwareTimeout,
    /// Boot-time handshake never reached the expected sentinel.
    HandshakeFailed,
    /// Firmware image checksum rejected by the co-processor.
    ChecksumFailed,
    /// The transport is closed or was never opened.
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DmaFault => write!(f, "DMA transfer fault"),
            Self::HardwareTimeout => write!(f, "hardware timeout"),
            Self::HandshakeFailed => write!(f, "boot handshake failed"),
            Self::ChecksumFailed => write!(f, "firmware checksum rejected"),
            Self::Closed => write!(f, "transport closed"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Flush reasons
// ---------------------------------------------------------------------------

/// Why a queue was flushed. Carried inside the synthetic failure delivered
/// to any caller still waiting on the flushed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The transport link went down (hardware fault, persistent errors).
    LinkDown,
    /// The network interface was brought down by the host.
    InterfaceDown,
    /// A socket owning the pending commands was closed.
    SocketClosed,
    /// Driver shutdown in progress.
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkDown => write!(f, "link down"),
            Self::InterfaceDown => write!(f, "interface down"),
            Self::SocketClosed => write!(f, "socket closed"),
            Self::Shutdown => write!(f, "driver shutdown"),
        }
    }
}

impl From<FlushReason> for Error {
    fn from(r: FlushReason) -> Self {
        Self::Flushed(r)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Driver-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
