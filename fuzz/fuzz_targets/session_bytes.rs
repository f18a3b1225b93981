//! Fuzz target driving a responder session with arbitrary bytes.
//!
//! The state machine must absorb any byte stream without panicking,
//! emitting at most a nak and a close.

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use tickwire_session::{Session, SessionConfig, SessionRole};

fuzz_target!(|data: &[u8]| {
    let t0 = Duration::ZERO;
    let mut session = Session::new(SessionRole::Responder, SessionConfig::default(), t0);
    if session.accept().is_ok() {
        let _ = session.receive(data, Duration::from_millis(1));
        let _ = session.tick(Duration::from_secs(120));
    }
});
