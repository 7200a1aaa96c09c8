//! Wire frame codec.
//!
//! The wire format is a fixed external contract with the co-processor
//! firmware and must be honored bit-exactly:
//!
//! ```text
//! ┌───────────┬─────────┬────────┬────────────┬─────────────────┐
//! │ addr | RW │ channel │ opcode │ len (LE16) │ payload (N B)   │
//! │   1 B     │   1 B   │  1 B   │    2 B     │                 │
//! └───────────┴─────────┴────────┴────────────┴─────────────────┘
//! ```
//!
//! Bit 7 of the address byte is the read/write flag. Frames that target a
//! non-default register bank are preceded by a two-byte bank-select prefix
//! which the bus thread transmits atomically with the data frame — no other
//! queue's bytes may interleave between the pair.
//!
//! The streaming [`FrameDecoder`] accumulates incoming bytes and yields
//! complete raw frames. A single transport read may return part of the
//! header, part of the payload, or several frames concatenated.

use crate::error::{Error, Result};

/// Read/write flag in the address byte (set = host write).
pub const WRITE_BIT: u8 = 0x80;

/// Register address carrying framed command/response traffic.
pub const DATA_REG: u8 = 0x00;

/// Register bank-select address. Writing `[BANK_SELECT_REG | WRITE_BIT, n]`
/// switches the co-processor to bank `n` for the next data frame.
pub const BANK_SELECT_REG: u8 = 0x05;

/// Host → firmware command register (16-bit, boot handshake).
pub const HOST_COMMAND_REG: u8 = 0x40;

/// Firmware → host status register (16-bit, boot handshake).
pub const HOST_STATUS_REG: u8 = 0x41;

/// Frame header size: address, channel, opcode, LE16 length.
pub const HEADER_LEN: usize = 5;

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_PAYLOAD: usize = 4096;

// ── Logical channels ─────────────────────────────────────────

/// Logical channel a frame belongs to. Routing and concurrency discipline
/// are per-channel: each has its own command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelId {
    Common = 0,
    Wlan = 1,
    Network = 2,
    Socket = 3,
    Bluetooth = 4,
}

/// Number of logical channels (size of the driver's queue array).
pub const CHANNEL_COUNT: usize = 5;

impl ChannelId {
    /// All channels, in queue-array order.
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [
        ChannelId::Common,
        ChannelId::Wlan,
        ChannelId::Network,
        ChannelId::Socket,
        ChannelId::Bluetooth,
    ];

    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Common),
            1 => Some(Self::Wlan),
            2 => Some(Self::Network),
            3 => Some(Self::Socket),
            4 => Some(Self::Bluetooth),
            _ => None,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Common => write!(f, "common"),
            Self::Wlan => write!(f, "wlan"),
            Self::Network => write!(f, "network"),
            Self::Socket => write!(f, "socket"),
            Self::Bluetooth => write!(f, "bluetooth"),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────

/// A decoded wire frame. Borrows its payload from the raw bytes it was
/// decoded from.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub channel: ChannelId,
    pub opcode: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Encode a `(channel, opcode, payload)` triple into `out`, returning
    /// the number of bytes written.
    ///
    /// Fails with `AllocationFailed` if `out` is too small and
    /// `MalformedFrame` if the payload exceeds the wire maximum.
    pub fn encode_into(
        channel: ChannelId,
        opcode: u8,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::MalformedFrame);
        }
        let total = HEADER_LEN + payload.len();
        if out.len() < total {
            return Err(Error::AllocationFailed);
        }

        out[0] = DATA_REG | WRITE_BIT;
        out[1] = channel as u8;
        out[2] = opcode;
        out[3..5].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        out[HEADER_LEN..total].copy_from_slice(payload);
        Ok(total)
    }

    /// Decode a complete raw frame (header + payload).
    ///
    /// Fails with `MalformedFrame` when the header is truncated, the
    /// register address or channel id is unknown, or the declared length
    /// disagrees with the bytes actually received. Never panics and never
    /// reads out of bounds.
    pub fn decode(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::MalformedFrame);
        }
        if raw[0] & !WRITE_BIT != DATA_REG {
            return Err(Error::MalformedFrame);
        }
        let channel = ChannelId::from_wire(raw[1]).ok_or(Error::MalformedFrame)?;
        let declared = u16::from_le_bytes([raw[3], raw[4]]) as usize;
        if declared > MAX_PAYLOAD || raw.len() - HEADER_LEN != declared {
            return Err(Error::MalformedFrame);
        }

        Ok(Self {
            channel,
            opcode: raw[2],
            payload: &raw[HEADER_LEN..],
        })
    }
}

/// Build the two-byte bank-select prefix for register bank `bank`.
pub fn encode_bank_select(bank: u8) -> [u8; 2] {
    [BANK_SELECT_REG | WRITE_BIT, bank]
}

// ── Streaming decoder ────────────────────────────────────────

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading payload.
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming frame decoder.
///
/// Feed raw transport bytes in; complete raw frames (header + payload)
/// come out. Bytes beyond the first complete frame stay buffered, so a
/// chunk carrying several frames is drained by calling `feed(&[])` until
/// it returns `Ok(None)`. Invalid headers resynchronize the decoder and
/// surface as `MalformedFrame` so the bus thread can count strikes.
pub struct FrameDecoder {
    state: DecoderState,
    buf: Box<[u8]>,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            buf: vec![0u8; HEADER_LEN + MAX_PAYLOAD].into_boxed_slice(),
            pending: Vec::new(),
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns `Ok(Some(frame))` when a complete raw frame is available
    /// (valid until the next `feed`), `Ok(None)` when more bytes are
    /// needed, and `Err(MalformedFrame)` when a header failed validation
    /// (the offending header bytes are discarded; decoding resumes at the
    /// next byte).
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<&[u8]>> {
        self.pending.extend_from_slice(data);

        let mut consumed = 0;
        let mut yielded: Option<usize> = None;
        let mut malformed = false;

        while consumed < self.pending.len() {
            let input = &self.pending[consumed..];
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let to_copy = (HEADER_LEN - *collected).min(input.len());
                    self.buf[*collected..*collected + to_copy]
                        .copy_from_slice(&input[..to_copy]);
                    *collected += to_copy;
                    consumed += to_copy;

                    if *collected == HEADER_LEN {
                        let addr_ok = self.buf[0] & !WRITE_BIT == DATA_REG;
                        let chan_ok = ChannelId::from_wire(self.buf[1]).is_some();
                        let expected =
                            u16::from_le_bytes([self.buf[3], self.buf[4]]) as usize;

                        if !addr_ok || !chan_ok || expected > MAX_PAYLOAD {
                            self.state = DecoderState::ReadingHeader { collected: 0 };
                            malformed = true;
                            break;
                        }
                        self.state = DecoderState::ReadingPayload {
                            expected,
                            collected: 0,
                        };
                    }
                }

                DecoderState::ReadingPayload { expected, collected } => {
                    let to_copy = (*expected - *collected).min(input.len());
                    self.buf[HEADER_LEN + *collected..HEADER_LEN + *collected + to_copy]
                        .copy_from_slice(&input[..to_copy]);
                    *collected += to_copy;
                    consumed += to_copy;

                    if *collected == *expected {
                        let total = HEADER_LEN + *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        yielded = Some(total);
                        break;
                    }
                }
            }
        }

        self.pending.drain(..consumed);

        if malformed {
            return Err(Error::MalformedFrame);
        }
        match yielded {
            Some(total) => Ok(Some(&self.buf[..total])),
            None => Ok(None),
        }
    }

    /// Reset decoder state and discard buffered bytes (e.g. after a link
    /// flush).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
        self.pending.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
