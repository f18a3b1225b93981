//! Fuzz target for message decoding.
//!
//! Any byte soup either decodes into a validated message or errors;
//! decoding a message and deep-copying it must never read outside the
//! input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickwire_codec::{
    DecodeIterator,
    msg::{CopyFlags, copy_msg, decode_msg},
};

fuzz_target!(|data: &[u8]| {
    let mut iter = DecodeIterator::new(data, (14, 1));
    if let Ok(msg) = decode_msg(&mut iter) {
        let copied = copy_msg(&msg, CopyFlags::all_buffers(), Some(0x5555_5555));
        let _ = copied.payload().len();
    }
});
