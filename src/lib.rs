//! Host-side driver for a network co-processor (NWP).
//!
//! Multiplexes commands from many caller threads onto one byte-oriented
//! link (SPI or UART) to the radio firmware and routes responses and
//! unsolicited events back out. The building blocks:
//!
//! - [`link::frame`] — wire codec with two-phase bank-select addressing
//! - [`link::pool`] — fixed-capacity shared buffer pool
//! - [`link::queue`] — per-channel command queues with deadline tracking
//! - [`link::bus`] — the dedicated transport-owning service thread
//! - [`link::handshake`] — boot ping/pong and firmware image download
//! - [`link::notify`] — async-event consumer thread and callback table
//! - [`driver`] — the [`LinkDriver`] façade tying it all together

#![deny(unused_must_use)]

pub mod config;
pub mod driver;
pub mod link;

mod error;

pub use config::DriverConfig;
pub use driver::{CommandRequest, CommandResponse, LinkDriver, WaitMode};
pub use error::{Error, FlushReason, LinkError, Result};
pub use link::frame::ChannelId;
pub use link::notify::{EventCallback, EventClass};
pub use link::pool::{Buffer, BufferKind};
pub use link::transport::{MemTransport, MemTransportHandle, NullTransport, SpiTransport, Transport};
