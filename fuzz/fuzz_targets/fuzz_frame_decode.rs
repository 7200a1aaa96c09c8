//! Fuzz target: `Frame::decode`
//!
//! Arbitrary byte slices must either decode into a frame whose payload
//! stays in bounds or fail cleanly — never panic, never read past the end.
//!
//! cargo fuzz run fuzz_frame_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use nwplink::link::frame::{Frame, HEADER_LEN, MAX_PAYLOAD};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert!(frame.payload.len() <= MAX_PAYLOAD);
        assert_eq!(frame.payload.len(), data.len() - HEADER_LEN);
    }
});
