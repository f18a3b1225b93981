//! Fuzz target for ripc frame decoding.
//!
//! Arbitrary bytes must never panic the frame parser: malformed input
//! returns an error or waits for more bytes, nothing else.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickwire_session::wire::decode_frame;

fuzz_target!(|data: &[u8]| {
    let _ = decode_frame(data);
});
