//! Fuzz target for the handshake bodies.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickwire_session::handshake::{ConnectionAck, ConnectionNak, ConnectionRequest};

fuzz_target!(|data: &[u8]| {
    let _ = ConnectionRequest::decode(data);
    let _ = ConnectionAck::decode_body(data);
    let _ = ConnectionNak::decode_body(data);
});
