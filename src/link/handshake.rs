//! Boot-time handshake with the co-processor.
//!
//! Before the bus thread starts, the host and firmware exchange single-byte
//! sentinel codes through a pair of fixed 16-bit registers: the host writes
//! the command register and polls the status register. Every poll loop is
//! bounded — a link that never answers surfaces as `HandshakeFailed`
//! instead of spinning forever.
//!
//! The same register pair carries the optional firmware image download:
//! raw chunks, an end-of-file sentinel, then a checksum verdict from the
//! firmware.

use std::time::Duration;

use log::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{LinkError, Result};

use super::frame::{HOST_COMMAND_REG, HOST_STATUS_REG, WRITE_BIT};
use super::transport::Transport;

// Sentinel codes (low byte of the 16-bit handshake registers).
pub const PING_AVAILABLE: u8 = 0xAB;
pub const PONG_AVAILABLE: u8 = 0xBA;
pub const EOF_REACHED: u8 = 0xE0;
pub const CHECKSUM_OK: u8 = 0xC5;
pub const CHECKSUM_FAIL: u8 = 0xC6;

/// Write a sentinel into the host→firmware command register.
fn write_command<T: Transport>(transport: &mut T, code: u8) -> Result<()> {
    let frame = [HOST_COMMAND_REG | WRITE_BIT, code, 0x00];
    transport
        .write(&frame)
        .map_err(|e| {
            warn!("handshake: command write failed: {e:?}");
            LinkError::DmaFault
        })?;
    transport.flush().map_err(|_| LinkError::DmaFault)?;
    Ok(())
}

/// Poll the firmware→host status register until its low byte matches one
/// of `accept`, up to the configured poll bound. Returns the matched code.
fn poll_status<T: Transport>(
    transport: &mut T,
    config: &DriverConfig,
    accept: &[u8],
) -> Result<u8> {
    let mut reg = [0u8; 2];
    let mut have = 0usize;

    for _ in 0..config.handshake_poll_limit {
        if have == 0 {
            // Issue a read request for the status register.
            transport
                .write(&[HOST_STATUS_REG])
                .map_err(|_| LinkError::DmaFault)?;
        }
        let n = transport
            .read(&mut reg[have..])
            .map_err(|_| LinkError::DmaFault)?;
        have += n;

        if have == reg.len() {
            let status = u16::from_le_bytes(reg);
            let low = (status & 0xFF) as u8;
            if accept.contains(&low) {
                return Ok(low);
            }
            debug!("handshake: status {status:#06x}, still waiting");
            have = 0;
        }
        std::thread::sleep(Duration::from_millis(config.handshake_poll_ms));
    }

    warn!(
        "handshake: no sentinel within {} polls",
        config.handshake_poll_limit
    );
    Err(LinkError::HandshakeFailed.into())
}

/// Run the boot ping/pong exchange.
pub fn run<T: Transport>(transport: &mut T, config: &DriverConfig) -> Result<()> {
    info!("handshake: sending ping");
    write_command(transport, PING_AVAILABLE)?;
    let code = poll_status(transport, config, &[PONG_AVAILABLE])?;
    debug_assert_eq!(code, PONG_AVAILABLE);
    info!("handshake: pong received, link up");
    Ok(())
}

/// Stream a firmware image to the co-processor.
///
/// Chunks of `config.image_chunk_size` bytes, an EOF sentinel, then the
/// firmware's checksum verdict. A `CHECKSUM_FAIL` verdict fails with
/// `ChecksumFailed`; silence past the poll bound fails with
/// `HandshakeFailed`.
pub fn push_image<T: Transport>(
    transport: &mut T,
    config: &DriverConfig,
    image: &[u8],
) -> Result<()> {
    info!("handshake: pushing {} B firmware image", image.len());

    for chunk in image.chunks(config.image_chunk_size) {
        transport.write(chunk).map_err(|e| {
            warn!("handshake: image chunk write failed: {e:?}");
            LinkError::DmaFault
        })?;
    }
    transport.flush().map_err(|_| LinkError::DmaFault)?;

    write_command(transport, EOF_REACHED)?;
    match poll_status(transport, config, &[CHECKSUM_OK, CHECKSUM_FAIL])? {
        CHECKSUM_OK => {
            info!("handshake: image checksum accepted");
            Ok(())
        }
        _ => {
            warn!("handshake: image checksum rejected");
            Err(LinkError::ChecksumFailed.into())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
