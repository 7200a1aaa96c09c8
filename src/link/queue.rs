//! Per-channel command queue and flush state machine.
//!
//! Each logical channel owns one `CommandQueue`:
//!
//! ```text
//!            submit()            take_ready()          on_response()
//! callers ──────────▶ TX list ───────────────▶ in-flight ──────────▶ waiter
//!                      (FIFO)    bus thread    descriptor          or RX list
//! ```
//!
//! State machine: `Idle → InFlight → {completed | timed out | flushed} → Idle`.
//! The in-flight descriptor exists iff the queue is `InFlight`; it is created
//! exactly once per transmitted command and cleared exactly once — by
//! completion, deadline expiry, or flush.
//!
//! Liveness of the caller is tracked with an explicit `cancelled` flag on the
//! waiter (set when the caller stops waiting), not inferred from elapsed
//! time. A flush delivers its synthetic failure only to live waiters; late
//! or abandoned responses are discarded, never delivered stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use heapless::Deque;
use log::{debug, warn};

use crate::error::{Error, FlushReason};

use super::frame::ChannelId;
use super::pool::Buffer;

/// TX list depth per queue.
pub const TX_DEPTH: usize = 8;

/// RX list depth per queue.
pub const RX_DEPTH: usize = 4;

// ── Waiter ───────────────────────────────────────────────────

/// Terminal outcome of one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A matching response was delivered to the RX list.
    Completed,
    /// The queue was flushed; no response will arrive.
    Failed(FlushReason),
    /// The deadline elapsed with no matching response.
    TimedOut,
}

/// Per-call wait primitive a synchronous caller blocks on.
///
/// The waiter carries its own correlated response: the bus thread hands
/// the completing frame directly to the in-flight descriptor's waiter, so
/// an unread asynchronous response queued on the same channel can never be
/// mistaken for it.
///
/// The `cancelled` flag is the waiter-liveness contract: once set, the
/// caller has stopped waiting and nothing may be delivered to it.
pub struct Waiter {
    slot: Mutex<WaitSlot>,
    signal: Condvar,
    cancelled: AtomicBool,
}

#[derive(Default)]
struct WaitSlot {
    outcome: Option<Completion>,
    response: Option<QueuedResponse>,
}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(WaitSlot::default()),
            signal: Condvar::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Block until completed or `timeout` elapses. A `None` return means
    /// the local wait timed out; the waiter is marked cancelled so any
    /// later completion is discarded instead of delivered.
    pub fn wait(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(c) = slot.outcome {
                return Some(c);
            }
            let now = Instant::now();
            if now >= deadline {
                self.cancelled.store(true, Ordering::SeqCst);
                return None;
            }
            let (guard, _) = self
                .signal
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            slot = guard;
        }
    }

    /// Take the response delivered to this waiter, if any.
    pub fn take_response(&self) -> Option<QueuedResponse> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .response
            .take()
    }

    /// Stop waiting without consuming a result.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn complete(&self, outcome: Completion) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cancelled() {
            return; // caller is gone; do not deliver
        }
        slot.outcome = Some(outcome);
        drop(slot);
        self.signal.notify_one();
    }

    /// Store the correlated response and signal completion. Handed back
    /// unstored when the caller has already cancelled, so its buffer can
    /// return to the pool.
    fn deliver(&self, resp: QueuedResponse) -> Option<QueuedResponse> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cancelled() {
            return Some(resp);
        }
        slot.response = Some(resp);
        slot.outcome = Some(Completion::Completed);
        drop(slot);
        self.signal.notify_one();
        None
    }
}

// ── Queue entries ────────────────────────────────────────────

/// A command accepted by `submit` and awaiting transmission.
pub struct PendingCommand {
    pub opcode: u8,
    /// Encoded wire bytes, ready to write.
    pub buffer: Buffer,
    /// Register bank for two-phase addressing, if not the default bank.
    pub bank: Option<u8>,
    pub expects_response: bool,
    /// Response deadline, armed when the command goes in flight.
    pub timeout: Duration,
    /// Caller context tag (e.g. a socket handle) used by selective flush.
    pub context: u32,
    pub waiter: Option<Arc<Waiter>>,
}

/// The at-most-one in-flight descriptor.
struct InFlight {
    opcode: u8,
    submitted_at: Instant,
    deadline: Instant,
    expects_response: bool,
    context: u32,
    waiter: Option<Arc<Waiter>>,
}

/// A response delivered to the RX list, awaiting `read_response`.
pub struct QueuedResponse {
    pub opcode: u8,
    pub buffer: Buffer,
}

/// A submission the queue refused, handed back with its buffer intact.
pub struct RejectedCommand {
    pub error: Error,
    pub command: PendingCommand,
}

impl core::fmt::Debug for RejectedCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RejectedCommand")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Everything the bus thread needs to put one command on the wire.
pub struct TxJob {
    pub opcode: u8,
    pub buffer: Buffer,
    pub bank: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    InFlight,
}

/// Outcome of routing an inbound frame at a queue.
pub enum RouteOutcome {
    /// Handed to the waiter or appended to the RX list. A full RX list
    /// evicts its oldest entry, whose buffer comes back for release.
    Delivered { evicted: Option<Buffer> },
    /// Past deadline or waiter cancelled; the buffer comes back for release.
    Discarded(Buffer),
    /// No in-flight command claims this frame; async-notification path.
    Unclaimed(Buffer),
}

struct QueueInner {
    state: QueueState,
    tx: Deque<PendingCommand, TX_DEPTH>,
    rx: Deque<QueuedResponse, RX_DEPTH>,
    in_flight: Option<InFlight>,
}

/// One logical channel's command queue.
pub struct CommandQueue {
    channel: ChannelId,
    inner: Mutex<QueueInner>,
}

impl CommandQueue {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            inner: Mutex::new(QueueInner {
                state: QueueState::Idle,
                tx: Deque::new(),
                rx: Deque::new(),
                in_flight: None,
            }),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Caller side ───────────────────────────────────────────

    /// Append a command to the TX list.
    ///
    /// A response-expecting command is rejected with `InvalidState` while
    /// another response-expecting command is in flight or queued — that is
    /// the double-submit the state machine forbids. Fire-and-forget
    /// commands queue FIFO behind whatever is outstanding. A full TX list
    /// rejects with `AllocationFailed`. A rejected command comes back to
    /// the caller so its buffer can return to the pool.
    pub fn submit(&self, cmd: PendingCommand) -> core::result::Result<(), RejectedCommand> {
        let mut inner = self.lock();

        if cmd.expects_response {
            let busy = inner.in_flight.as_ref().is_some_and(|f| f.expects_response)
                || inner.tx.iter().any(|p| p.expects_response);
            if busy {
                warn!("queue[{}]: double submit rejected", self.channel);
                return Err(RejectedCommand {
                    error: Error::InvalidState,
                    command: cmd,
                });
            }
        }

        inner.tx.push_back(cmd).map_err(|cmd| {
            warn!("queue[{}]: TX list full", self.channel);
            RejectedCommand {
                error: Error::AllocationFailed,
                command: cmd,
            }
        })
    }

    /// Pop the next RX-list entry, if any.
    pub fn pop_response(&self) -> Option<QueuedResponse> {
        self.lock().rx.pop_front()
    }

    // ── Bus-thread side ───────────────────────────────────────

    /// True when a TX entry is waiting and nothing is in flight.
    pub fn ready_to_transmit(&self) -> bool {
        let inner = self.lock();
        inner.in_flight.is_none() && !inner.tx.is_empty()
    }

    /// Move the head TX entry into the in-flight slot and arm its
    /// deadline. Returns the wire job, or `None` if the queue is busy or
    /// empty. The descriptor is created here, exactly once per command.
    pub fn take_ready(&self, now: Instant) -> Option<TxJob> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return None;
        }
        let cmd = inner.tx.pop_front()?;

        inner.in_flight = Some(InFlight {
            opcode: cmd.opcode,
            submitted_at: now,
            deadline: now + cmd.timeout,
            expects_response: cmd.expects_response,
            context: cmd.context,
            waiter: cmd.waiter,
        });
        inner.state = QueueState::InFlight;

        Some(TxJob {
            opcode: cmd.opcode,
            buffer: cmd.buffer,
            bank: cmd.bank,
        })
    }

    /// Called by the bus thread once the wire write finished. A command
    /// that expects no response completes here: its descriptor is cleared
    /// and any waiter is signaled success.
    pub fn note_transmitted(&self) {
        let mut inner = self.lock();
        let expects = inner
            .in_flight
            .as_ref()
            .is_some_and(|f| f.expects_response);
        if expects {
            return; // stays in flight until response, timeout, or flush
        }
        if let Some(fl) = inner.in_flight.take() {
            inner.state = QueueState::Idle;
            drop(inner);
            if let Some(w) = fl.waiter {
                w.complete(Completion::Completed);
            }
        }
    }

    /// Match an inbound frame against the in-flight descriptor.
    ///
    /// A command with a waiter receives the frame directly (the RX list is
    /// bypassed, so unread asynchronous responses cannot shadow it); a
    /// waiterless command's frame joins the RX list for `pop_response`.
    /// Late frames (past deadline) and frames whose waiter cancelled are
    /// discarded; frames with no in-flight claimant are handed back for
    /// the async-notification path.
    pub fn on_response(&self, opcode: u8, buffer: Buffer, now: Instant) -> RouteOutcome {
        let mut inner = self.lock();

        let fl = match inner.in_flight.take() {
            Some(fl) if fl.expects_response => fl,
            other => {
                inner.in_flight = other;
                return RouteOutcome::Unclaimed(buffer);
            }
        };
        inner.state = QueueState::Idle;

        if now > fl.deadline {
            warn!(
                "queue[{}]: late response (opcode {:#04x}, {} ms past deadline), discarding",
                self.channel,
                opcode,
                now.duration_since(fl.deadline).as_millis()
            );
            drop(inner);
            if let Some(w) = fl.waiter {
                w.complete(Completion::TimedOut);
            }
            return RouteOutcome::Discarded(buffer);
        }

        match fl.waiter {
            Some(w) => {
                drop(inner);
                match w.deliver(QueuedResponse { opcode, buffer }) {
                    None => RouteOutcome::Delivered { evicted: None },
                    Some(stale) => {
                        debug!(
                            "queue[{}]: response for abandoned wait (opcode {:#04x}), discarding",
                            self.channel, opcode
                        );
                        RouteOutcome::Discarded(stale.buffer)
                    }
                }
            }
            None => {
                let evicted = if inner.rx.is_full() {
                    // Oldest entry gives way; responses must keep flowing.
                    warn!("queue[{}]: RX list full, dropping oldest", self.channel);
                    inner.rx.pop_front().map(|r| r.buffer)
                } else {
                    None
                };
                let _ = inner.rx.push_back(QueuedResponse { opcode, buffer });
                RouteOutcome::Delivered { evicted }
            }
        }
    }

    /// Clear a past-deadline in-flight descriptor, signaling its waiter
    /// `TimedOut` if still live. Returns `true` if something expired.
    pub fn expire_due(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        let due = inner.in_flight.as_ref().is_some_and(|f| now >= f.deadline);
        if !due {
            return false;
        }
        let fl = inner.in_flight.take();
        inner.state = QueueState::Idle;
        drop(inner);

        if let Some(fl) = fl {
            warn!(
                "queue[{}]: command {:#04x} timed out after {} ms",
                self.channel,
                fl.opcode,
                now.duration_since(fl.submitted_at).as_millis()
            );
            if let Some(w) = fl.waiter {
                w.complete(Completion::TimedOut);
            }
        }
        true
    }

    /// Earliest pending deadline, for the bus thread's wait bound.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().in_flight.as_ref().map(|f| f.deadline)
    }

    /// Forcibly resolve outstanding commands.
    ///
    /// The in-flight command's waiter, if still live, receives a synthetic
    /// `Failed(reason)`; an abandoned wait is dropped silently. TX entries
    /// are discarded — all of them, or only those whose `(opcode, context)`
    /// matches `filter` (e.g. tearing down one socket). RX entries survive
    /// a selective flush but are dropped on a full one. Flushing an idle
    /// queue is a no-op. Returns the buffers freed so the bus can return
    /// them to the pool.
    pub fn flush(&self, reason: FlushReason, filter: Option<&FlushFilter<'_>>) -> Vec<Buffer> {
        let mut inner = self.lock();
        let mut freed = Vec::new();
        let mut to_signal: Vec<Arc<Waiter>> = Vec::new();

        // Drain matching TX entries.
        let mut kept: Deque<PendingCommand, TX_DEPTH> = Deque::new();
        while let Some(cmd) = inner.tx.pop_front() {
            let discard = filter.is_none_or(|f| f(cmd.opcode, cmd.context));
            if discard {
                if let Some(w) = &cmd.waiter {
                    if !w.is_cancelled() {
                        to_signal.push(w.clone());
                    }
                }
                freed.push(cmd.buffer);
            } else {
                // Capacity unchanged, push back cannot fail.
                let _ = kept.push_back(cmd);
            }
        }
        inner.tx = kept;

        // Resolve the in-flight command.
        let inflight_matches = inner
            .in_flight
            .as_ref()
            .is_some_and(|fl| filter.is_none_or(|f| f(fl.opcode, fl.context)));

        if inflight_matches {
            if let Some(fl) = inner.in_flight.take() {
                inner.state = QueueState::Idle;
                match fl.waiter {
                    Some(w) if !w.is_cancelled() => to_signal.push(w),
                    _ => debug!(
                        "queue[{}]: flushed command {:#04x} with no live waiter",
                        self.channel, fl.opcode
                    ),
                }
            }
        }

        // A full flush also clears undelivered responses.
        if filter.is_none() {
            while let Some(resp) = inner.rx.pop_front() {
                freed.push(resp.buffer);
            }
        }
        drop(inner);

        for w in to_signal {
            w.complete(Completion::Failed(reason));
        }
        freed
    }
}

/// Selective-flush predicate over `(opcode, context)`; returning `true`
/// discards the entry.
pub type FlushFilter<'a> = dyn Fn(u8, u32) -> bool + 'a;

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::pool::{BufferKind, BufferPool};

    fn pool() -> BufferPool {
        BufferPool::new(8, 64)
    }

    fn buf(pool: &BufferPool, bytes: &[u8]) -> Buffer {
        let mut b = pool
            .allocate(BufferKind::Command, bytes.len(), Duration::from_millis(10))
            .unwrap();
        b.fill(bytes).unwrap();
        b
    }

    fn cmd(pool: &BufferPool, opcode: u8, expects: bool, waiter: Option<Arc<Waiter>>) -> PendingCommand {
        PendingCommand {
            opcode,
            buffer: buf(pool, &[opcode]),
            bank: None,
            expects_response: expects,
            timeout: Duration::from_millis(100),
            context: 0,
            waiter,
        }
    }

    #[test]
    fn at_most_one_in_flight() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Wlan);
        q.submit(cmd(&p, 1, true, None)).unwrap();
        q.submit(cmd(&p, 2, false, None)).unwrap();

        let now = Instant::now();
        assert!(q.take_ready(now).is_some());
        assert_eq!(q.state(), QueueState::InFlight);
        // Second take while in flight yields nothing.
        assert!(q.take_ready(now).is_none());
    }

    #[test]
    fn double_submit_rejected() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Socket);
        q.submit(cmd(&p, 1, true, None)).unwrap();
        q.take_ready(Instant::now()).unwrap();
        let rejected = q.submit(cmd(&p, 2, true, None)).unwrap_err();
        assert_eq!(rejected.error, Error::InvalidState);
        p.release(rejected.command.buffer);
        // Fire-and-forget still queues behind it.
        assert!(q.submit(cmd(&p, 3, false, None)).is_ok());
    }

    #[test]
    fn fire_and_forget_completes_on_transmit() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Common);
        q.submit(cmd(&p, 1, false, None)).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        assert_eq!(q.state(), QueueState::InFlight);
        q.note_transmitted();
        assert_eq!(q.state(), QueueState::Idle);
        p.release(job.buffer);
    }

    #[test]
    fn response_delivered_in_submission_order() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Wlan);
        let w = Waiter::new();
        q.submit(cmd(&p, 0x21, true, Some(w.clone()))).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);

        let outcome = q.on_response(0x21, buf(&p, b"resp"), Instant::now());
        assert!(matches!(outcome, RouteOutcome::Delivered { evicted: None }));
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(w.wait(Duration::from_millis(10)), Some(Completion::Completed));
        // The response rides on the waiter, not the RX list.
        let resp = w.take_response().unwrap();
        assert_eq!(resp.opcode, 0x21);
        assert_eq!(resp.buffer.as_slice(), b"resp");
        assert!(q.pop_response().is_none());
    }

    #[test]
    fn wait_response_not_shadowed_by_unread_async_entry() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Network);

        // Waiterless (async) command completes; its response sits unread.
        q.submit(cmd(&p, 0x10, true, None)).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);
        let outcome = q.on_response(0x10, buf(&p, b"async-A"), Instant::now());
        assert!(matches!(outcome, RouteOutcome::Delivered { evicted: None }));

        // A synchronous command on the same queue gets its own response.
        let w = Waiter::new();
        q.submit(cmd(&p, 0x11, true, Some(w.clone()))).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);
        let outcome = q.on_response(0x11, buf(&p, b"sync-B"), Instant::now());
        assert!(matches!(outcome, RouteOutcome::Delivered { evicted: None }));

        assert_eq!(w.wait(Duration::from_millis(10)), Some(Completion::Completed));
        let resp = w.take_response().unwrap();
        assert_eq!(resp.opcode, 0x11);
        assert_eq!(resp.buffer.as_slice(), b"sync-B");

        // The async entry is still at the head of the RX list, intact.
        let stale = q.pop_response().unwrap();
        assert_eq!(stale.opcode, 0x10);
        assert_eq!(stale.buffer.as_slice(), b"async-A");
    }

    #[test]
    fn late_response_discarded() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Network);
        let w = Waiter::new();
        let mut c = cmd(&p, 5, true, Some(w.clone()));
        c.timeout = Duration::from_millis(1);
        q.submit(c).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);

        let late = Instant::now() + Duration::from_millis(50);
        let outcome = q.on_response(5, buf(&p, b"late"), late);
        assert!(matches!(outcome, RouteOutcome::Discarded(_)));
        assert!(q.pop_response().is_none());
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[test]
    fn cancelled_waiter_never_receives() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Socket);
        let w = Waiter::new();
        q.submit(cmd(&p, 7, true, Some(w.clone()))).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);

        w.cancel();
        let outcome = q.on_response(7, buf(&p, b"stale"), Instant::now());
        assert!(matches!(outcome, RouteOutcome::Discarded(_)));
        assert!(q.pop_response().is_none());
    }

    #[test]
    fn unclaimed_frame_goes_to_notify_path() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Wlan);
        let outcome = q.on_response(0x90, buf(&p, b"async"), Instant::now());
        assert!(matches!(outcome, RouteOutcome::Unclaimed(_)));
    }

    #[test]
    fn expire_due_times_out_in_flight() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Common);
        let w = Waiter::new();
        let mut c = cmd(&p, 9, true, Some(w.clone()));
        c.timeout = Duration::from_millis(5);
        q.submit(c).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);

        assert!(!q.expire_due(Instant::now()));
        assert!(q.expire_due(Instant::now() + Duration::from_millis(10)));
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(w.wait(Duration::from_millis(10)), Some(Completion::TimedOut));
    }

    #[test]
    fn flush_idle_queue_is_noop() {
        let q = CommandQueue::new(ChannelId::Bluetooth);
        let freed = q.flush(FlushReason::LinkDown, None);
        assert!(freed.is_empty());
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[test]
    fn flush_delivers_synthetic_failure_to_live_waiter() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Network);
        let w = Waiter::new();
        q.submit(cmd(&p, 3, true, Some(w.clone()))).unwrap();
        let job = q.take_ready(Instant::now()).unwrap();
        q.note_transmitted();
        p.release(job.buffer);

        let freed = q.flush(FlushReason::InterfaceDown, None);
        assert!(freed.is_empty()); // in-flight holds no buffer post-transmit
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(
            w.wait(Duration::from_millis(10)),
            Some(Completion::Failed(FlushReason::InterfaceDown))
        );
    }

    #[test]
    fn flush_skips_abandoned_waiter() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Socket);
        let w = Waiter::new();
        q.submit(cmd(&p, 4, true, Some(w.clone()))).unwrap();
        if let Some(j) = q.take_ready(Instant::now()) {
            p.release(j.buffer);
        }
        q.note_transmitted();

        w.cancel();
        q.flush(FlushReason::SocketClosed, None);
        // The cancelled waiter's slot stays empty.
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[test]
    fn selective_flush_keeps_unmatched_tx_entries() {
        let p = pool();
        let q = CommandQueue::new(ChannelId::Socket);
        let mut a = cmd(&p, 1, false, None);
        a.context = 10;
        let mut b = cmd(&p, 2, false, None);
        b.context = 20;
        q.submit(a).unwrap();
        q.submit(b).unwrap();

        let filter = |_op: u8, ctx: u32| ctx == 10;
        let freed = q.flush(FlushReason::SocketClosed, Some(&filter));
        assert_eq!(freed.len(), 1);
        // The survivor is still transmittable.
        let job = q.take_ready(Instant::now()).unwrap();
        assert_eq!(job.opcode, 2);
        for f in freed {
            p.release(f);
        }
        p.release(job.buffer);
    }

    #[test]
    fn tx_list_overflow_rejected() {
        let p = BufferPool::new(TX_DEPTH + 1, 64);
        let q = CommandQueue::new(ChannelId::Common);
        for i in 0..TX_DEPTH {
            q.submit(cmd(&p, i as u8, false, None)).unwrap();
        }
        let rejected = q.submit(cmd(&p, 0xFF, false, None)).unwrap_err();
        assert_eq!(rejected.error, Error::AllocationFailed);
        p.release(rejected.command.buffer);
    }
}
