//! Post-ack key exchange.
//!
//! When both sides of a version-14 handshake set the key-exchange flag,
//! the first two data frames carry a classic Diffie-Hellman exchange
//! over a 64-bit group. The shared secret seeds an optional integrity
//! layer; no application message is accepted until the exchange
//! completes. The secret itself is opaque to the rest of the runtime.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};

/// Group modulus: the largest 64-bit prime.
pub const MODULUS: u64 = 0xFFFF_FFFF_FFFF_FFC5;
/// Group generator.
pub const GENERATOR: u64 = 5;

const INIT_TYPE: u8 = 1;
const REPLY_TYPE: u8 = 2;

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(m)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

/// One side's state in the exchange.
///
/// The private exponent comes from the driver: the session layer is
/// pure and carries no entropy source of its own.
#[derive(Debug, Clone)]
pub struct KeyExchange {
    private: u64,
    shared: Option<u64>,
}

impl KeyExchange {
    /// Start an exchange with the given private exponent.
    ///
    /// # Errors
    ///
    /// `SessionError::KeyExchange` for a zero exponent.
    pub fn new(private: u64) -> Result<Self> {
        if private == 0 {
            return Err(SessionError::KeyExchange("zero private exponent"));
        }
        Ok(Self { private, shared: None })
    }

    /// Initiator's opening frame body: group parameters plus our public
    /// value.
    #[must_use]
    pub fn init_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + 24);
        buf.put_u8(INIT_TYPE);
        buf.put_u8(24);
        buf.put_u64(MODULUS);
        buf.put_u64(GENERATOR);
        buf.put_u64(pow_mod(GENERATOR, self.private, MODULUS));
        buf.freeze()
    }

    /// Responder: consume the init, derive the secret, produce the
    /// reply body.
    pub fn accept_init(&mut self, body: &[u8]) -> Result<Bytes> {
        if body.len() != 26 || body[0] != INIT_TYPE || body[1] != 24 {
            return Err(SessionError::KeyExchange("malformed key exchange init"));
        }
        let modulus = u64::from_be_bytes([
            body[2], body[3], body[4], body[5], body[6], body[7], body[8], body[9],
        ]);
        let generator = u64::from_be_bytes([
            body[10], body[11], body[12], body[13], body[14], body[15], body[16], body[17],
        ]);
        let peer_public = u64::from_be_bytes([
            body[18], body[19], body[20], body[21], body[22], body[23], body[24], body[25],
        ]);
        if modulus < 3 || generator < 2 || peer_public == 0 {
            return Err(SessionError::KeyExchange("degenerate group parameters"));
        }
        self.shared = Some(pow_mod(peer_public, self.private, modulus));

        let mut buf = BytesMut::with_capacity(2 + 8);
        buf.put_u8(REPLY_TYPE);
        buf.put_u8(8);
        buf.put_u64(pow_mod(generator, self.private, modulus));
        Ok(buf.freeze())
    }

    /// Initiator: consume the reply and derive the secret.
    pub fn accept_reply(&mut self, body: &[u8]) -> Result<()> {
        if body.len() != 10 || body[0] != REPLY_TYPE || body[1] != 8 {
            return Err(SessionError::KeyExchange("malformed key exchange reply"));
        }
        let peer_public = u64::from_be_bytes([
            body[2], body[3], body[4], body[5], body[6], body[7], body[8], body[9],
        ]);
        if peer_public == 0 {
            return Err(SessionError::KeyExchange("degenerate public value"));
        }
        self.shared = Some(pow_mod(peer_public, self.private, MODULUS));
        Ok(())
    }

    /// The derived secret, once both halves have run.
    #[must_use]
    pub fn shared_secret(&self) -> Option<u64> {
        self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let mut client = KeyExchange::new(0x1234_5678_9ABC_DEF1).unwrap();
        let mut server = KeyExchange::new(0x0FED_CBA9_8765_4321).unwrap();

        let init = client.init_body();
        let reply = server.accept_init(&init).unwrap();
        client.accept_reply(&reply).unwrap();

        assert_eq!(client.shared_secret(), server.shared_secret());
        assert!(client.shared_secret().is_some());
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        let mut side = KeyExchange::new(7).unwrap();
        assert!(side.accept_init(b"junk").is_err());
        assert!(side.accept_reply(&[REPLY_TYPE, 8, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(KeyExchange::new(0).is_err());
    }

    #[test]
    fn pow_mod_matches_small_cases() {
        assert_eq!(pow_mod(2, 10, 1_000_003), 1024);
        assert_eq!(pow_mod(5, 0, 97), 1);
        assert_eq!(pow_mod(7, 3, 11), 343 % 11);
    }
}
