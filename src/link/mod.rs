//! Host-side link core: frame codec, buffer pool, per-channel command
//! queues, bus thread, boot handshake, and the async-notification layer.
//!
//! The [`crate::driver::LinkDriver`] façade owns one [`LinkCore`] and the
//! two service threads (bus, notify). Everything here is transport-agnostic
//! behind [`transport::Transport`].

pub mod bus;
pub mod frame;
pub mod handshake;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use crate::config::DriverConfig;
use crate::error::FlushReason;

use bus::BusSignal;
use frame::{CHANNEL_COUNT, ChannelId};
use notify::NotifyHub;
use pool::BufferPool;
use queue::CommandQueue;

/// Shared state between the driver façade, the bus thread, and caller
/// threads. One instance per driver, created at start and dropped at
/// shutdown — no process-wide globals.
pub(crate) struct LinkCore {
    pub(crate) config: DriverConfig,
    pub(crate) pool: BufferPool,
    pub(crate) queues: [CommandQueue; CHANNEL_COUNT],
    pub(crate) signal: BusSignal,
    pub(crate) notify: Arc<NotifyHub>,
    link_up: AtomicBool,
}

impl LinkCore {
    pub(crate) fn new(config: DriverConfig) -> Self {
        let pool = BufferPool::new(config.pool_capacity, config.buffer_size);
        Self {
            config,
            pool,
            queues: ChannelId::ALL.map(CommandQueue::new),
            signal: BusSignal::new(),
            notify: NotifyHub::new(),
            link_up: AtomicBool::new(true),
        }
    }

    pub(crate) fn queue(&self, channel: ChannelId) -> &CommandQueue {
        &self.queues[channel.index()]
    }

    pub(crate) fn link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// System-wide flush: every queue's outstanding commands resolve with
    /// a synthetic failure (live waiters) or are dropped (abandoned ones).
    pub(crate) fn flush_all(&self, reason: FlushReason) {
        info!("link: system-wide flush ({reason})");
        for q in &self.queues {
            for buffer in q.flush(reason, None) {
                self.pool.release(buffer);
            }
        }
    }

    /// Mark the link dead and resolve everything outstanding.
    pub(crate) fn declare_link_down(&self, reason: FlushReason) {
        self.link_up.store(false, Ordering::SeqCst);
        self.flush_all(reason);
    }
}
