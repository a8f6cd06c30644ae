//! Fuzz target: `FrameDecoder::feed` / `FrameDecoder::poll`
//!
//! Drives arbitrary byte sequences into the streaming heater-frame decoder,
//! split at an input-chosen point, and checks that it never panics, never
//! buffers more than its capacity, and always makes progress.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use vevor_heater::protocol::codec::{FrameDecoder, RX_BUFFER_CAPACITY};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new(2000);
    let split = data.first().map_or(0, |&b| usize::from(b)).min(data.len());
    let (head, tail) = data.split_at(split);

    let mut now = 0u64;
    for part in [head, tail] {
        decoder.feed(part, now);
        // Each poll consumes at least one byte, reports the pending
        // error, or returns None.
        let mut polls = 0usize;
        while decoder.poll().is_some() {
            polls += 1;
            assert!(polls <= RX_BUFFER_CAPACITY + 1, "decoder failed to make progress");
        }
        assert!(decoder.buffered() <= RX_BUFFER_CAPACITY);
        now += 500;
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
    decoder.feed(data, now);
    while decoder.poll().is_some() {}
});
