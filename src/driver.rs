//! Driver façade.
//!
//! [`LinkDriver`] is the explicit context object owning the whole link
//! stack: buffer pool, per-channel command queues, the bus thread (sole
//! transport owner), and the notification consumer thread. It is created
//! by [`LinkDriver::start`] and torn down by [`LinkDriver::shutdown`] (or
//! drop); nothing lives in process-wide globals.
//!
//! Peripheral and protocol drivers sit on top of this API: they encode
//! opaque command payloads, pick a channel, and either block for the
//! correlated response or poll for it later.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};

use crate::config::DriverConfig;
use crate::error::{Error, FlushReason, LinkError, Result};
use crate::link::LinkCore;
use crate::link::bus;
use crate::link::frame::{ChannelId, Frame, HEADER_LEN};
use crate::link::handshake;
use crate::link::notify::{self, EventCallback, EventClass};
use crate::link::pool::{Buffer, BufferKind};
use crate::link::queue::{Completion, FlushFilter, PendingCommand, Waiter};
use crate::link::transport::Transport;

/// How a caller relates to the command's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Fire and forget: the firmware sends no response.
    NoResponse,
    /// A response is expected; return immediately and fetch it later with
    /// [`LinkDriver::read_response`]. The driver default deadline applies.
    Async,
    /// A response is expected; block the caller up to the given timeout.
    Wait(Duration),
}

/// A correlated response, copied out of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub opcode: u8,
    pub data: Vec<u8>,
}

/// Full-control submission parameters. [`LinkDriver::send_command`] is the
/// common-case wrapper.
pub struct CommandRequest<'a> {
    pub channel: ChannelId,
    pub opcode: u8,
    pub payload: &'a [u8],
    /// Register bank for two-phase addressing; `None` for the default bank.
    pub bank: Option<u8>,
    /// Caller context tag (e.g. socket handle) for selective flush.
    pub context: u32,
    pub mode: WaitMode,
}

impl<'a> CommandRequest<'a> {
    pub fn new(channel: ChannelId, opcode: u8, payload: &'a [u8], mode: WaitMode) -> Self {
        Self {
            channel,
            opcode,
            payload,
            bank: None,
            context: 0,
            mode,
        }
    }
}

/// The host-side link driver context.
pub struct LinkDriver {
    core: Arc<LinkCore>,
    bus: Option<JoinHandle<()>>,
    notify: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for LinkDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkDriver")
            .field("bus", &self.bus)
            .field("notify", &self.notify)
            .finish_non_exhaustive()
    }
}

impl LinkDriver {
    /// Run the boot handshake on `transport`, then bring up the bus and
    /// notification threads. The transport is owned by the bus thread from
    /// here on.
    pub fn start<T: Transport + 'static>(mut transport: T, config: DriverConfig) -> Result<Self> {
        handshake::run(&mut transport, &config)?;
        Self::start_without_handshake(transport, config)
    }

    /// Bring up the driver on a link that is already known to be alive
    /// (e.g. after [`handshake::push_image`] + [`handshake::run`] were
    /// driven manually, or on a warm restart).
    pub fn start_without_handshake<T: Transport + 'static>(
        transport: T,
        config: DriverConfig,
    ) -> Result<Self> {
        let core = Arc::new(LinkCore::new(config));
        let bus = bus::spawn(transport, core.clone()).map_err(|e| {
            warn!("driver: failed to spawn bus thread: {e}");
            Error::AllocationFailed
        })?;
        let notify = match notify::spawn_consumer(core.notify.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("driver: failed to spawn notify thread: {e}");
                core.signal.terminate();
                let _ = bus.join();
                return Err(Error::AllocationFailed);
            }
        };
        info!("driver: started");
        Ok(Self {
            core,
            bus: Some(bus),
            notify: Some(notify),
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.bus.is_none() {
            return Err(Error::NotInitialized);
        }
        if !self.core.link_up() {
            return Err(Error::Link(LinkError::Closed));
        }
        Ok(())
    }

    // ── Command submission ────────────────────────────────────

    /// Submit a command on `channel` and, in [`WaitMode::Wait`], block for
    /// its correlated response.
    ///
    /// Returns `Ok(Some(response))` for a completed synchronous command,
    /// `Ok(None)` for `NoResponse`/`Async` submissions, and an error when
    /// the command timed out, was flushed, or could not be queued.
    pub fn send_command(
        &self,
        channel: ChannelId,
        opcode: u8,
        payload: &[u8],
        mode: WaitMode,
    ) -> Result<Option<CommandResponse>> {
        self.submit_request(CommandRequest::new(channel, opcode, payload, mode))
    }

    /// Submit with full control over bank selection and context tagging.
    pub fn submit_request(&self, req: CommandRequest<'_>) -> Result<Option<CommandResponse>> {
        self.ensure_running()?;

        let alloc_timeout = Duration::from_millis(self.core.config.alloc_timeout_ms);
        let mut buffer = self.core.pool.allocate(
            BufferKind::Command,
            HEADER_LEN + req.payload.len(),
            alloc_timeout,
        )?;
        let n = Frame::encode_into(req.channel, req.opcode, req.payload, buffer.storage_mut());
        let n = match n {
            Ok(n) => n,
            Err(e) => {
                self.core.pool.release(buffer);
                return Err(e);
            }
        };
        buffer.set_len(n);

        let (expects_response, timeout, waiter) = match req.mode {
            WaitMode::NoResponse => (false, self.default_timeout(), None),
            WaitMode::Async => (true, self.default_timeout(), None),
            WaitMode::Wait(t) => (true, t, Some(Waiter::new())),
        };

        let pending = PendingCommand {
            opcode: req.opcode,
            buffer,
            bank: req.bank,
            expects_response,
            timeout,
            context: req.context,
            waiter: waiter.clone(),
        };

        if let Err(rejected) = self.core.queue(req.channel).submit(pending) {
            self.core.pool.release(rejected.command.buffer);
            return Err(rejected.error);
        }
        self.core.signal.raise_tx();

        let Some(waiter) = waiter else {
            return Ok(None);
        };

        match waiter.wait(timeout) {
            Some(Completion::Completed) => {
                // The correlated frame rides on the waiter itself; unread
                // async responses on this channel stay in the RX list.
                match waiter.take_response() {
                    Some(q) => {
                        let resp = CommandResponse {
                            opcode: q.opcode,
                            data: q.buffer.as_slice().to_vec(),
                        };
                        self.core.pool.release(q.buffer);
                        Ok(Some(resp))
                    }
                    None => {
                        warn!("driver: completion signaled without a response");
                        Err(Error::InvalidState)
                    }
                }
            }
            Some(Completion::Failed(reason)) => Err(Error::Flushed(reason)),
            Some(Completion::TimedOut) | None => Err(Error::Timeout),
        }
    }

    /// Pop the next delivered response on `channel`, if any. Pairs with
    /// [`WaitMode::Async`] submissions.
    pub fn read_response(&self, channel: ChannelId) -> Option<CommandResponse> {
        let queued = self.core.queue(channel).pop_response()?;
        let resp = CommandResponse {
            opcode: queued.opcode,
            data: queued.buffer.as_slice().to_vec(),
        };
        self.core.pool.release(queued.buffer);
        Some(resp)
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.core.config.command_timeout_ms)
    }

    // ── Buffer access for upper-layer drivers ─────────────────

    /// Check a buffer out of the shared pool.
    pub fn allocate_buffer(&self, kind: BufferKind, size: usize) -> Result<Buffer> {
        self.ensure_running()?;
        let timeout = Duration::from_millis(self.core.config.alloc_timeout_ms);
        self.core.pool.allocate(kind, size, timeout)
    }

    /// Return a buffer to the shared pool.
    pub fn free_buffer(&self, buffer: Buffer) {
        self.core.pool.release(buffer);
    }

    // ── Events ────────────────────────────────────────────────

    /// Register a callback for one class of unsolicited events. Invoked on
    /// the notification thread, never in bus-thread context.
    pub fn register_event_callback(
        &self,
        class: EventClass,
        callback: EventCallback,
    ) -> Result<()> {
        self.ensure_running()?;
        self.core.notify.register(class, callback)
    }

    // ── Teardown & recovery ───────────────────────────────────

    /// Flush one channel: the in-flight command resolves with a synthetic
    /// failure (if its caller still waits), pending TX entries are dropped.
    pub fn flush_channel(&self, channel: ChannelId, reason: FlushReason) -> Result<()> {
        self.ensure_running()?;
        for buffer in self.core.queue(channel).flush(reason, None) {
            self.core.pool.release(buffer);
        }
        Ok(())
    }

    /// Selective flush: only entries whose `(opcode, context)` matches
    /// `filter` are discarded — e.g. tearing down a single socket while
    /// the rest of the channel keeps flowing.
    pub fn flush_channel_where(
        &self,
        channel: ChannelId,
        reason: FlushReason,
        filter: &FlushFilter<'_>,
    ) -> Result<()> {
        self.ensure_running()?;
        for buffer in self.core.queue(channel).flush(reason, Some(filter)) {
            self.core.pool.release(buffer);
        }
        Ok(())
    }

    /// Orderly teardown: system-wide flush, stop both service threads,
    /// join them. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(bus) = self.bus.take() else {
            return;
        };
        info!("driver: shutting down");

        self.core.flush_all(FlushReason::Shutdown);
        self.core.signal.terminate();
        if bus.join().is_err() {
            warn!("driver: bus thread panicked during shutdown");
        }

        self.core.notify.shutdown();
        if let Some(notify) = self.notify.take() {
            if notify.join().is_err() {
                warn!("driver: notify thread panicked during shutdown");
            }
        }
        info!("driver: stopped");
    }
}

impl Drop for LinkDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
