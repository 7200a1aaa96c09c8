//! Bus thread — sole owner of the transport.
//!
//! One dedicated thread serializes all frame exchange. Per wake it drains
//! inbound bytes through the streaming decoder and routes complete frames,
//! sweeps queue deadlines, and transmits for every queue that has pending
//! TX and nothing in flight (round-robin). The wake condition combines
//! TX-pending, RX-pending, and terminate with a bounded poll tick capped by
//! the nearest queue deadline, so a stalled link still resolves timeouts
//! promptly.
//!
//! Discipline: one command outstanding *per logical queue*, TX/RX
//! interleaved across queues. Inbound frames carry their channel id, so a
//! response is always attributable to exactly one queue.
//!
//! Two-phase addressing (bank-select prefix + data frame) is performed as
//! one uninterrupted transport operation inside a single TX slot; since no
//! other code touches the transport, no foreign bytes can interleave.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::FlushReason;

use super::LinkCore;
use super::frame::{self, CHANNEL_COUNT, Frame, FrameDecoder};
use super::notify::EventClass;
use super::pool::BufferKind;
use super::queue::RouteOutcome;
use super::transport::Transport;

/// Scratch size for one transport read.
const READ_CHUNK: usize = 512;

// ── Wake signal ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WakeFlags {
    pub tx_pending: bool,
    pub rx_pending: bool,
    pub terminate: bool,
}

/// Combined wake condition for the bus thread: TX-pending OR RX-pending OR
/// terminate. `terminate` is sticky; the others clear on wake.
pub(crate) struct BusSignal {
    state: Mutex<WakeFlags>,
    wake: Condvar,
}

impl BusSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(WakeFlags::default()),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn raise_tx(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.tx_pending = true;
        drop(st);
        self.wake.notify_one();
    }

    /// For IRQ-driven transports: the RX GPIO edge handler calls this.
    pub(crate) fn raise_rx(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.rx_pending = true;
        drop(st);
        self.wake.notify_one();
    }

    pub(crate) fn terminate(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.terminate = true;
        drop(st);
        self.wake.notify_one();
    }

    /// Wait up to `timeout` for any wake condition; returns a snapshot and
    /// clears the edge-triggered flags.
    fn wait(&self, timeout: Duration) -> WakeFlags {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !(st.tx_pending || st.rx_pending || st.terminate) {
            let (guard, _) = self
                .wake
                .wait_timeout(st, timeout)
                .unwrap_or_else(|e| e.into_inner());
            st = guard;
        }
        let snapshot = *st;
        st.tx_pending = false;
        st.rx_pending = false;
        snapshot
    }
}

// ── Bus loop ─────────────────────────────────────────────────

/// Spawn the bus thread, transferring ownership of the transport to it.
pub(crate) fn spawn<T: Transport + 'static>(
    transport: T,
    core: Arc<LinkCore>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("nwp-bus".into())
        .spawn(move || run(transport, &core))
}

fn run<T: Transport>(mut transport: T, core: &LinkCore) {
    let mut decoder = FrameDecoder::new();
    let mut scratch = [0u8; READ_CHUNK];
    let mut rr_cursor = 0usize;
    let mut malformed_strikes = 0u32;

    info!("bus: thread started");

    loop {
        let flags = core.signal.wait(wait_bound(core));
        if flags.terminate {
            break;
        }

        if service_rx(&mut transport, &mut decoder, core, &mut scratch, &mut malformed_strikes)
            .is_err()
        {
            core.declare_link_down(FlushReason::LinkDown);
            break;
        }

        let now = Instant::now();
        for q in &core.queues {
            if q.expire_due(now) {
                debug!("bus: expired deadline on {} queue", q.channel());
            }
        }

        if service_tx(&mut transport, core, &mut rr_cursor).is_err() {
            core.declare_link_down(FlushReason::LinkDown);
            break;
        }
    }

    info!("bus: thread exiting");
}

/// The bus never sleeps past the nearest queue deadline, and never longer
/// than the configured poll tick (transports without an RX interrupt are
/// polled at that cadence).
fn wait_bound(core: &LinkCore) -> Duration {
    let tick = Duration::from_millis(core.config.bus_tick_ms.max(1));
    let now = Instant::now();
    core.queues
        .iter()
        .filter_map(|q| q.next_deadline())
        .map(|d| d.saturating_duration_since(now))
        .min()
        .map_or(tick, |until| until.min(tick))
}

struct LinkFault;

fn service_rx<T: Transport>(
    transport: &mut T,
    decoder: &mut FrameDecoder,
    core: &LinkCore,
    scratch: &mut [u8],
    malformed_strikes: &mut u32,
) -> Result<(), LinkFault> {
    while transport.available() {
        let n = transport.read(scratch).map_err(|e| {
            warn!("bus: transport read failed: {e:?}");
            LinkFault
        })?;
        if n == 0 {
            break;
        }

        let mut chunk: &[u8] = &scratch[..n];
        loop {
            match decoder.feed(chunk) {
                Ok(Some(raw)) => {
                    let raw = raw.to_vec(); // end the decoder borrow
                    route_frame(core, &raw, malformed_strikes)?;
                }
                Ok(None) => break,
                Err(_) => {
                    *malformed_strikes += 1;
                    warn!(
                        "bus: malformed frame header (strike {}/{})",
                        malformed_strikes, core.config.malformed_frame_limit
                    );
                    if *malformed_strikes >= core.config.malformed_frame_limit {
                        return Err(LinkFault);
                    }
                }
            }
            // Remaining buffered bytes drain with empty feeds.
            chunk = &[];
        }
    }
    Ok(())
}

fn route_frame(core: &LinkCore, raw: &[u8], malformed_strikes: &mut u32) -> Result<(), LinkFault> {
    let frame = match Frame::decode(raw) {
        Ok(f) => f,
        Err(_) => {
            *malformed_strikes += 1;
            warn!(
                "bus: undecodable frame (strike {}/{})",
                malformed_strikes, core.config.malformed_frame_limit
            );
            if *malformed_strikes >= core.config.malformed_frame_limit {
                return Err(LinkFault);
            }
            return Ok(());
        }
    };
    *malformed_strikes = 0;

    let alloc_timeout = Duration::from_millis(core.config.alloc_timeout_ms);
    let mut buffer =
        match core
            .pool
            .allocate(BufferKind::Response, frame.payload.len(), alloc_timeout)
        {
            Ok(b) => b,
            Err(_) => {
                warn!(
                    "bus: no buffer for inbound {} frame, dropping",
                    frame.channel
                );
                return Ok(());
            }
        };
    // Length checked against pool buffer size by `allocate`.
    let _ = buffer.fill(frame.payload);

    let queue = core.queue(frame.channel);
    match queue.on_response(frame.opcode, buffer, Instant::now()) {
        RouteOutcome::Delivered { evicted } => {
            if let Some(b) = evicted {
                core.pool.release(b);
            }
        }
        RouteOutcome::Discarded(b) => core.pool.release(b),
        RouteOutcome::Unclaimed(b) => {
            core.notify.publish(
                EventClass::from_channel(frame.channel),
                frame.opcode,
                b.as_slice(),
            );
            core.pool.release(b);
        }
    }
    Ok(())
}

fn service_tx<T: Transport>(
    transport: &mut T,
    core: &LinkCore,
    rr_cursor: &mut usize,
) -> Result<(), LinkFault> {
    for step in 0..CHANNEL_COUNT {
        let idx = (*rr_cursor + step) % CHANNEL_COUNT;
        let queue = &core.queues[idx];

        let Some(job) = queue.take_ready(Instant::now()) else {
            continue;
        };

        // Two-phase addressing: prefix and data frame leave back to back,
        // nothing else may touch the transport in between.
        let wrote = (|| -> Result<(), T::Error> {
            if let Some(bank) = job.bank {
                transport.write(&frame::encode_bank_select(bank))?;
            }
            transport.write(job.buffer.as_slice())?;
            transport.flush()
        })();

        match wrote {
            Ok(()) => {
                debug!(
                    "bus: sent opcode {:#04x} on {} queue",
                    job.opcode,
                    queue.channel()
                );
                queue.note_transmitted();
                core.pool.release(job.buffer);
                *rr_cursor = (idx + 1) % CHANNEL_COUNT;
            }
            Err(e) => {
                warn!("bus: transport write failed: {e:?}");
                core.pool.release(job.buffer);
                return Err(LinkFault);
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────
