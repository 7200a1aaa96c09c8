//! End-to-end driver tests over the in-memory transport: boot handshake,
//! synchronous and fire-and-forget commands, timeouts, flush, and link
//! failure, with a scripted firmware on the far side.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use nwplink::link::frame::{BANK_SELECT_REG, Frame, HEADER_LEN, WRITE_BIT};
use nwplink::link::handshake::PONG_AVAILABLE;
use nwplink::{
    BufferKind, ChannelId, DriverConfig, Error, EventClass, FlushReason, LinkDriver, LinkError,
    MemTransport, MemTransportHandle, WaitMode,
};

fn test_config() -> DriverConfig {
    DriverConfig {
        bus_tick_ms: 1,
        alloc_timeout_ms: 50,
        command_timeout_ms: 1000,
        handshake_poll_ms: 1,
        handshake_poll_limit: 20,
        ..DriverConfig::default()
    }
}

fn encode_frame(channel: ChannelId, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_LEN + payload.len()];
    let n = Frame::encode_into(channel, opcode, payload, &mut out).unwrap();
    out.truncate(n);
    out
}

/// Poll `pred` every millisecond until it holds or `timeout` elapses.
fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    pred()
}

/// Scripted firmware: waits for one outbound command frame, then answers it
/// with `response_payload` on the same channel and opcode.
fn respond_to_next_command(handle: MemTransportHandle, response_payload: &'static [u8]) {
    std::thread::spawn(move || {
        assert!(
            wait_until(Duration::from_secs(2), || handle.written_len() >= HEADER_LEN),
            "no command frame appeared on the wire"
        );
        // Give the bus thread time to finish the payload write.
        std::thread::sleep(Duration::from_millis(5));
        let written = handle.take_written();
        let frame = Frame::decode(&written).expect("outbound bytes are one valid frame");
        let reply = encode_frame(frame.channel, frame.opcode, response_payload);
        handle.inject(&reply);
    });
}

#[test]
fn boot_handshake_then_start() {
    let (t, h) = MemTransport::new();
    h.inject(&[PONG_AVAILABLE, 0x00]);

    let driver = LinkDriver::start(t, test_config()).unwrap();
    // Ping command went out first: command register write, sentinel, pad.
    let written = h.take_written();
    assert!(written.len() >= 3);
    drop(driver);
}

#[test]
fn handshake_failure_surfaces_before_threads_start() {
    let (t, _h) = MemTransport::new(); // firmware never answers
    let err = LinkDriver::start(t, test_config()).unwrap_err();
    assert_eq!(err, Error::Link(LinkError::HandshakeFailed));
}

#[test]
fn synchronous_command_round_trip() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();
    respond_to_next_command(h, b"scan-results");

    let resp = driver
        .send_command(
            ChannelId::Wlan,
            0x21,
            b"scan-args",
            WaitMode::Wait(Duration::from_secs(2)),
        )
        .unwrap()
        .expect("synchronous command yields a response");

    assert_eq!(resp.opcode, 0x21);
    assert_eq!(resp.data, b"scan-results");
}

#[test]
fn async_command_polled_later() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();
    respond_to_next_command(h, b"ip-config");

    assert!(
        driver
            .send_command(ChannelId::Network, 0x30, &[], WaitMode::Async)
            .unwrap()
            .is_none()
    );
    assert!(wait_until(Duration::from_secs(2), || {
        driver.read_response(ChannelId::Network).is_some_and(|r| {
            assert_eq!(r.opcode, 0x30);
            assert_eq!(r.data, b"ip-config");
            true
        })
    }));
}

#[test]
fn wait_caller_not_served_stale_async_response() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    // Async command completes; its response is deliberately left unread.
    driver
        .send_command(ChannelId::Network, 0x10, &[], WaitMode::Async)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.written_len() >= HEADER_LEN
    }));
    let written = h.take_written();
    let cmd = Frame::decode(&written).unwrap();
    h.inject(&encode_frame(cmd.channel, cmd.opcode, b"async-A"));
    assert!(wait_until(Duration::from_secs(2), || h.unread_len() == 0));
    std::thread::sleep(Duration::from_millis(10));

    // A synchronous command on the same channel must get its own response,
    // not the one sitting unread in the RX list.
    respond_to_next_command(h.clone(), b"sync-B");
    let resp = driver
        .send_command(
            ChannelId::Network,
            0x11,
            &[],
            WaitMode::Wait(Duration::from_secs(2)),
        )
        .unwrap()
        .expect("synchronous command yields a response");
    assert_eq!(resp.opcode, 0x11);
    assert_eq!(resp.data, b"sync-B");

    // The async response is still there, unclobbered.
    let stale = driver.read_response(ChannelId::Network).unwrap();
    assert_eq!(stale.opcode, 0x10);
    assert_eq!(stale.data, b"async-A");
}

#[test]
fn silent_firmware_times_out() {
    let (t, _h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    let started = Instant::now();
    let err = driver
        .send_command(
            ChannelId::Common,
            0x01,
            &[],
            WaitMode::Wait(Duration::from_millis(100)),
        )
        .unwrap_err();

    assert_eq!(err, Error::Timeout);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn bank_select_prefix_precedes_frame_contiguously() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    let mut req = nwplink::CommandRequest::new(
        ChannelId::Socket,
        0x50,
        b"data",
        WaitMode::NoResponse,
    );
    req.bank = Some(2);
    driver.submit_request(req).unwrap();

    let expected = encode_frame(ChannelId::Socket, 0x50, b"data");
    assert!(wait_until(Duration::from_secs(2), || {
        h.written_len() >= 2 + expected.len()
    }));
    let written = h.take_written();
    // Prefix and frame back to back, no interleaved bytes.
    assert_eq!(written[0], BANK_SELECT_REG | WRITE_BIT);
    assert_eq!(written[1], 2);
    assert_eq!(&written[2..], expected.as_slice());
}

#[test]
fn fire_and_forget_preserves_submission_order() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    for opcode in [0x10u8, 0x11, 0x12] {
        driver
            .send_command(ChannelId::Socket, opcode, &[opcode], WaitMode::NoResponse)
            .unwrap();
    }

    let frame_len = HEADER_LEN + 1;
    assert!(wait_until(Duration::from_secs(2), || {
        h.written_len() >= 3 * frame_len
    }));

    let written = h.take_written();
    for (i, opcode) in [0x10u8, 0x11, 0x12].into_iter().enumerate() {
        let frame = Frame::decode(&written[i * frame_len..(i + 1) * frame_len]).unwrap();
        assert_eq!(frame.opcode, opcode);
    }
}

#[test]
fn unsolicited_frame_reaches_event_callback() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = hits.clone();
        driver
            .register_event_callback(
                EventClass::WlanAsync,
                Box::new(move |opcode, payload| {
                    assert_eq!(opcode, 0x90);
                    assert_eq!(payload, b"disconnected");
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    // No command in flight on the WLAN queue: this frame is unsolicited.
    h.inject(&encode_frame(ChannelId::Wlan, 0x90, b"disconnected"));

    assert!(wait_until(Duration::from_secs(2), || {
        hits.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn flush_resolves_blocked_caller_with_synthetic_failure() {
    let (t, h) = MemTransport::new();
    let driver = Arc::new(LinkDriver::start_without_handshake(t, test_config()).unwrap());

    let caller = {
        let driver = driver.clone();
        std::thread::spawn(move || {
            driver.send_command(
                ChannelId::Network,
                0x33,
                &[],
                WaitMode::Wait(Duration::from_secs(5)),
            )
        })
    };

    // Wait for the command to hit the wire, then flush its channel.
    assert!(wait_until(Duration::from_secs(2), || {
        h.written_len() >= HEADER_LEN
    }));
    driver
        .flush_channel(ChannelId::Network, FlushReason::InterfaceDown)
        .unwrap();

    let err = caller.join().unwrap().unwrap_err();
    assert_eq!(err, Error::Flushed(FlushReason::InterfaceDown));
}

#[test]
fn write_failure_tears_down_the_link() {
    let (t, h) = MemTransport::new();
    let driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();
    h.fail_writes(true);

    let err = driver
        .send_command(
            ChannelId::Wlan,
            0x21,
            &[],
            WaitMode::Wait(Duration::from_secs(2)),
        )
        .unwrap_err();
    assert_eq!(err, Error::Flushed(FlushReason::LinkDown));

    // The link is declared dead; later submissions fail fast.
    assert!(wait_until(Duration::from_secs(2), || {
        driver.send_command(ChannelId::Wlan, 0x22, &[], WaitMode::NoResponse)
            == Err(Error::Link(LinkError::Closed))
    }));
}

#[test]
fn pool_exhaustion_fails_allocation_within_bound() {
    let (t, _h) = MemTransport::new();
    let config = DriverConfig {
        pool_capacity: 2,
        ..test_config()
    };
    let driver = LinkDriver::start_without_handshake(t, config).unwrap();

    let a = driver.allocate_buffer(BufferKind::Command, 16).unwrap();
    let b = driver.allocate_buffer(BufferKind::Command, 16).unwrap();

    let started = Instant::now();
    let err = driver.allocate_buffer(BufferKind::Command, 16).unwrap_err();
    assert_eq!(err, Error::AllocationFailed);
    assert!(started.elapsed() < Duration::from_secs(1));

    driver.free_buffer(a);
    let c = driver.allocate_buffer(BufferKind::Event, 16).unwrap();
    driver.free_buffer(b);
    driver.free_buffer(c);
}

#[test]
fn shutdown_is_idempotent_and_rejects_later_calls() {
    let (t, _h) = MemTransport::new();
    let mut driver = LinkDriver::start_without_handshake(t, test_config()).unwrap();

    driver.shutdown();
    driver.shutdown(); // no-op

    let err = driver
        .send_command(ChannelId::Common, 0x01, &[], WaitMode::NoResponse)
        .unwrap_err();
    assert_eq!(err, Error::NotInitialized);
}
