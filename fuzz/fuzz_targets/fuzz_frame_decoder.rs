//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming frame decoder and
//! asserts that it never panics, that every yielded frame is within wire
//! bounds and decodable, and that a reset restores a clean state.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use nwplink::link::frame::{Frame, FrameDecoder, HEADER_LEN, MAX_PAYLOAD};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    // First byte selects a split point so partial deliveries get covered.
    let (ctl, bytes) = match data.split_first() {
        Some(x) => x,
        None => return,
    };
    let split = (*ctl as usize).min(bytes.len());

    for chunk in [&bytes[..split], &bytes[split..]] {
        let mut input = chunk;
        loop {
            match decoder.feed(input) {
                Ok(Some(raw)) => {
                    assert!(raw.len() >= HEADER_LEN, "yielded frame shorter than header");
                    assert!(
                        raw.len() <= HEADER_LEN + MAX_PAYLOAD,
                        "yielded frame exceeds wire maximum"
                    );
                    assert!(Frame::decode(raw).is_ok(), "yielded frame must decode");
                }
                Ok(None) => break,
                Err(_) => {} // malformed header, decoder resynchronizes
            }
            input = &[];
        }
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    let _ = decoder.feed(bytes);
});
