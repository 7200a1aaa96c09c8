//! Async-notification layer.
//!
//! Inbound frames that no queue claims as a correlated response (link
//! status changes, unsolicited WLAN/socket events) are pushed onto a
//! bounded `embassy-sync` channel and drained by a dedicated consumer
//! thread, which invokes user callbacks outside bus-thread context. A slow
//! callback therefore never stalls transport I/O.
//!
//! ```text
//! ┌──────────────┐  NotifyMsg   ┌────────────────┐  callback
//! │  Bus thread  │─────────────▶│ Notify thread  │──────────▶ user code
//! │  (transport) │   try_send   │ (block_on)     │
//! └──────────────┘              └────────────────┘
//! ```

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use log::{info, warn};

use crate::error::{Error, Result};

use super::frame::ChannelId;

/// Largest event payload carried through the notify channel.
pub const MAX_EVENT_PAYLOAD: usize = 512;

/// Notify channel depth.
const NOTIFY_DEPTH: usize = 16;

/// Classification of an unsolicited frame, keyed by its source channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventClass {
    /// Link lifecycle events (boot complete, firmware status).
    LinkState = 0,
    /// WLAN events (scan results ready, connect/disconnect).
    WlanAsync = 1,
    /// Network events (DHCP lease, IP change).
    NetworkAsync = 2,
    /// Socket events (remote close, data pending).
    SocketAsync = 3,
    /// Bluetooth events.
    BluetoothAsync = 4,
}

/// Number of event classes (size of the callback table).
pub const EVENT_CLASS_COUNT: usize = 5;

impl EventClass {
    /// Which class an unsolicited frame on `channel` maps to.
    pub fn from_channel(channel: ChannelId) -> Self {
        match channel {
            ChannelId::Common => Self::LinkState,
            ChannelId::Wlan => Self::WlanAsync,
            ChannelId::Network => Self::NetworkAsync,
            ChannelId::Socket => Self::SocketAsync,
            ChannelId::Bluetooth => Self::BluetoothAsync,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// An unsolicited event delivered to a user callback.
pub struct EventMsg {
    pub class: EventClass,
    pub opcode: u8,
    pub payload: Vec<u8, MAX_EVENT_PAYLOAD>,
}

enum NotifyMsg {
    Event(EventMsg),
    Shutdown,
}

/// User callback invoked on the notify thread with `(opcode, payload)`.
pub type EventCallback = Box<dyn Fn(u8, &[u8]) + Send + 'static>;

/// Shared hub: bounded event channel plus the enum-keyed callback table.
pub struct NotifyHub {
    channel: Channel<CriticalSectionRawMutex, NotifyMsg, NOTIFY_DEPTH>,
    callbacks: Mutex<[Option<EventCallback>; EVENT_CLASS_COUNT]>,
}

impl NotifyHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channel: Channel::new(),
            callbacks: Mutex::new([None, None, None, None, None]),
        })
    }

    /// Register a callback for one event class. The table is validated
    /// here, at registration time: a duplicate registration fails with
    /// `InvalidState` rather than silently replacing the old handler.
    pub fn register(&self, class: EventClass, callback: EventCallback) -> Result<()> {
        let mut table = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let slot = &mut table[class.index()];
        if slot.is_some() {
            warn!("notify: duplicate callback registration for {class:?}");
            return Err(Error::InvalidState);
        }
        *slot = Some(callback);
        Ok(())
    }

    /// Push an event from the bus thread. Never blocks; a full channel
    /// drops the event with a warning.
    pub fn publish(&self, class: EventClass, opcode: u8, payload: &[u8]) {
        let mut data: Vec<u8, MAX_EVENT_PAYLOAD> = Vec::new();
        let take = payload.len().min(MAX_EVENT_PAYLOAD);
        if take < payload.len() {
            warn!(
                "notify: event payload truncated ({} -> {} B)",
                payload.len(),
                take
            );
        }
        // Length bounded above; cannot fail.
        let _ = data.extend_from_slice(&payload[..take]);

        let msg = NotifyMsg::Event(EventMsg {
            class,
            opcode,
            payload: data,
        });
        if self.channel.try_send(msg).is_err() {
            warn!("notify: channel full, dropping {class:?} event");
        }
    }

    /// Ask the consumer thread to exit after draining queued events.
    pub fn shutdown(&self) {
        futures_lite::future::block_on(self.channel.send(NotifyMsg::Shutdown));
    }

    fn dispatch(&self, event: &EventMsg) {
        let table = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        match &table[event.class.index()] {
            Some(cb) => cb(event.opcode, &event.payload),
            None => warn!(
                "notify: no callback for {:?} (opcode {:#04x}), event dropped",
                event.class, event.opcode
            ),
        }
    }
}

/// Spawn the notification consumer thread.
///
/// Drains the channel under `block_on` and invokes callbacks until a
/// shutdown message arrives.
pub fn spawn_consumer(hub: Arc<NotifyHub>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("nwp-notify".into())
        .spawn(move || {
            futures_lite::future::block_on(async {
                loop {
                    match hub.channel.receive().await {
                        NotifyMsg::Event(ev) => hub.dispatch(&ev),
                        NotifyMsg::Shutdown => break,
                    }
                }
            });
            info!("notify: consumer thread exiting");
        })
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_registration_rejected() {
        let hub = NotifyHub::new();
        hub.register(EventClass::WlanAsync, Box::new(|_, _| {})).unwrap();
        let err = hub
            .register(EventClass::WlanAsync, Box::new(|_, _| {}))
            .unwrap_err();
        assert_eq!(err, Error::InvalidState);
        // Other classes are unaffected.
        hub.register(EventClass::SocketAsync, Box::new(|_, _| {})).unwrap();
    }

    #[test]
    fn events_reach_registered_callback() {
        let hub = NotifyHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            hub.register(
                EventClass::NetworkAsync,
                Box::new(move |opcode, payload| {
                    assert_eq!(opcode, 0x44);
                    assert_eq!(payload, b"lease");
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }

        let consumer = spawn_consumer(hub.clone()).unwrap();
        hub.publish(EventClass::NetworkAsync, 0x44, b"lease");
        hub.shutdown();
        consumer.join().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_without_callback_is_dropped() {
        let hub = NotifyHub::new();
        let consumer = spawn_consumer(hub.clone()).unwrap();
        hub.publish(EventClass::BluetoothAsync, 0x01, &[]);
        hub.shutdown();
        consumer.join().unwrap();
    }

    #[test]
    fn channel_classes_map_one_to_one() {
        for ch in ChannelId::ALL {
            let class = EventClass::from_channel(ch);
            assert!(class.index() < EVENT_CLASS_COUNT);
        }
        assert_eq!(
            EventClass::from_channel(ChannelId::Wlan),
            EventClass::WlanAsync
        );
    }
}
