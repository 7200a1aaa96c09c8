//! Transport abstraction — any byte-oriented channel to the co-processor.
//!
//! Concrete implementations:
//! - SPI full-duplex device with an RX-pending interrupt line
//! - UART stream (via any type implementing the trait over a serial HAL)
//! - in-memory scripted transport for host tests and bring-up
//!
//! The bus thread is generic over `Transport`, so adding a new transport
//! requires zero changes to the queueing logic. The bus thread is the sole
//! owner: no other code path touches the transport after driver start.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use embedded_hal::digital::InputPin;
use embedded_hal::spi::SpiDevice;

use super::frame::{HEADER_LEN, MAX_PAYLOAD};

/// Byte-oriented transport channel, serviced exclusively by the bus thread.
///
/// `read` must return only bytes the co-processor genuinely produced —
/// never filler clocked out of an idle bus — because everything returned
/// is fed to the frame decoder and counts toward the malformed-frame
/// strike limit. Any `Err` from a transport method tears the link down.
pub trait Transport: Send {
    /// Transport-specific error type.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` valid bytes into `buf`.
    /// Returns the number of bytes actually read, 0 if none are pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Push any buffered output to the wire. The bus thread calls this
    /// once per TX slot, after the bank-select prefix and data frame.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Whether a `read` would currently yield bytes. Polled by the bus
    /// thread every tick; cheap sampling (a GPIO level, a queue length)
    /// is expected.
    fn available(&mut self) -> bool;
}

// ── Null transport ───────────────────────────────────────────

/// Transport that swallows writes and never produces inbound bytes.
/// Stands in for the real link before bring-up or after teardown.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        false
    }
}

// ── SPI transport ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiTransportError {
    /// SPI bus transfer failed (DMA or controller fault).
    Bus,
    /// RX-pending interrupt pin could not be read.
    Pin,
}

/// SPI full-duplex transport with a GPIO RX-pending line.
///
/// SPI clocks out a byte for every byte shifted in, so an open-ended read
/// would hand the decoder bus filler. Instead, when the co-processor
/// raises the RX line, `read` clocks out exactly one frame: the 5-byte
/// header first, then the payload length the header declares. The framed
/// bytes are buffered internally and served to the caller across as many
/// `read` calls as its scratch size requires; only genuinely clocked frame
/// bytes are ever reported.
///
/// A header whose declared length exceeds the wire maximum is passed
/// through alone so the decoder can count the strike.
pub struct SpiTransport<SPI, IRQ> {
    spi: SPI,
    rx_pending: IRQ,
    pending: VecDeque<u8>,
}

impl<SPI, IRQ> SpiTransport<SPI, IRQ>
where
    SPI: SpiDevice + Send,
    IRQ: InputPin + Send,
{
    pub fn new(spi: SPI, rx_pending: IRQ) -> Self {
        Self {
            spi,
            rx_pending,
            pending: VecDeque::new(),
        }
    }

    fn clock_frame(&mut self) -> Result<(), SpiTransportError> {
        let mut header = [0u8; HEADER_LEN];
        self.spi
            .read(&mut header)
            .map_err(|_| SpiTransportError::Bus)?;
        self.pending.extend(header);

        let declared = u16::from_le_bytes([header[3], header[4]]) as usize;
        if declared == 0 || declared > MAX_PAYLOAD {
            return Ok(());
        }
        let mut payload = vec![0u8; declared];
        self.spi
            .read(&mut payload)
            .map_err(|_| SpiTransportError::Bus)?;
        self.pending.extend(payload);
        Ok(())
    }
}

impl<SPI, IRQ> Transport for SpiTransport<SPI, IRQ>
where
    SPI: SpiDevice + Send,
    IRQ: InputPin + Send,
{
    type Error = SpiTransportError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.pending.is_empty() {
            let pending_high = self
                .rx_pending
                .is_high()
                .map_err(|_| SpiTransportError::Pin)?;
            if !pending_high {
                return Ok(0);
            }
            self.clock_frame()?;
        }

        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            // Length bounded above; the deque cannot run dry here.
            *slot = self.pending.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.spi.write(data).map_err(|_| SpiTransportError::Bus)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        !self.pending.is_empty() || self.rx_pending.is_high().unwrap_or(false)
    }
}

// ── In-memory transport (tests / bring-up) ───────────────────

#[derive(Debug, Default)]
struct MemState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemTransportError;

/// Scriptable in-memory transport. The driver side owns the
/// [`MemTransport`]; the test side keeps a [`MemTransportHandle`] to inject
/// inbound bytes, inspect outbound writes, and force failures.
pub struct MemTransport {
    state: Arc<Mutex<MemState>>,
}

#[derive(Clone)]
pub struct MemTransportHandle {
    state: Arc<Mutex<MemState>>,
}

impl MemTransport {
    pub fn new() -> (Self, MemTransportHandle) {
        let state = Arc::new(Mutex::new(MemState::default()));
        (
            Self {
                state: state.clone(),
            },
            MemTransportHandle { state },
        )
    }
}

impl Transport for MemTransport {
    type Error = MemTransportError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if s.fail_reads {
            return Err(MemTransportError);
        }
        let mut n = 0;
        while n < buf.len() {
            match s.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if s.fail_writes {
            return Err(MemTransportError);
        }
        s.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn available(&mut self) -> bool {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !s.fail_reads && !s.inbound.is_empty()
    }
}

impl MemTransportHandle {
    /// Queue bytes for the driver to read.
    pub fn inject(&self, bytes: &[u8]) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.inbound.extend(bytes.iter().copied());
    }

    /// Take everything the driver has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        core::mem::take(&mut s.outbound)
    }

    /// Bytes written so far, without consuming them.
    pub fn written_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outbound
            .len()
    }

    /// Bytes injected but not yet read by the driver.
    pub fn unread_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .inbound
            .len()
    }

    /// Make every subsequent read fail (simulated RX hardware fault).
    pub fn fail_reads(&self, fail: bool) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_reads = fail;
    }

    /// Make every subsequent write fail (simulated TX hardware fault).
    pub fn fail_writes(&self, fail: bool) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_writes = fail;
    }
}

// ── Tests ────────────────────────────────────────────────────
