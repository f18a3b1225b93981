//! Session lifecycle state machine.
//!
//! Pure (Sans-IO): methods take the current time and raw bytes, and
//! return actions for the driver to execute. No sockets, no clocks, no
//! randomness — which keeps every transition unit-testable and lets the
//! channel engine own all I/O.
//!
//! # State machine
//!
//! ```text
//!                 initiate                accept
//! ┌──────────┐──────────────┐   ┌──────────────────────┐
//! │ Inactive │              │   │                      │
//! └──────────┘              ↓   ↓                      │
//!              ┌──────────┐   ┌──────────────┐         │
//!              │ AwaitAck │   │ AwaitRequest │         │
//!              └──────────┘   └──────────────┘         │
//!        ack/nak │    │ key exchange │ request         │
//!                ↓    ↓ (version 14) ↓                 ↓
//!             ┌────────┐ <────── ┌─────────────────────────┐
//!             │ Active │         │ AwaitKeyInit / KeyReply │
//!             └────────┘         └─────────────────────────┘
//!                │ peer close / violation / ping timeout
//!                ↓
//!             ┌─────────┐
//!             │ Closing │
//!             └─────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    compress::{CompressionType, Compressor},
    error::{RejectReason, Result, SessionError},
    fragment::{Fragmenter, Reassembler},
    handshake::{
        ConnectionAck, ConnectionNak, ConnectionRequest, DEFAULT_PING_TIMEOUT_SECS,
        SESSION_FLAG_KEY_EXCHANGE, negotiate,
    },
    keyx::KeyExchange,
    pack::PackReader,
    wire::{self, ExtFlags, FrameFlags},
};

/// Default max fragment payload size.
pub const DEFAULT_MAX_FRAGMENT_SIZE: u16 = 6144;
/// Default byte threshold below which payloads stay uncompressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: u16 = 30;

/// Which side of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Dialed out and sends the connection request.
    Initiator,
    /// Accepted the socket and answers the request.
    Responder,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, handshake not started.
    Inactive,
    /// Responder waiting for the connection request.
    AwaitRequest,
    /// Initiator waiting for ack or nak.
    AwaitAck,
    /// Responder waiting for the key-exchange init.
    AwaitKeyInit,
    /// Initiator waiting for the key-exchange reply.
    AwaitKeyReply,
    /// Handshake complete; application data flows.
    Active,
    /// Closed; nothing further will be processed.
    Closing,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::AwaitRequest => "await-request",
            Self::AwaitAck => "await-ack",
            Self::AwaitKeyInit => "await-key-init",
            Self::AwaitKeyReply => "await-key-reply",
            Self::Active => "active",
            Self::Closing => "closing",
        }
    }
}

/// Session configuration, the embedder-facing knobs of the framing
/// layer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Proposed ping timeout; the responder echoes it. Seconds, 1..=255.
    pub ping_timeout_secs: u8,
    /// Largest frame payload this side accepts.
    pub max_fragment_size: u16,
    /// Compression this side can decode.
    pub compression: CompressionType,
    /// zlib level, 0..=9.
    pub compression_level: u32,
    /// Payloads below this many bytes are never compressed.
    pub compression_threshold: u16,
    /// Per-channel override forcing compression off regardless of the
    /// handshake outcome.
    pub force_compression_off: bool,
    /// Ask for the version-14 key exchange.
    pub key_exchange: bool,
    /// Private exponent for the key exchange, supplied by the driver.
    pub key_exchange_secret: u64,
    /// Local hostname, carried in the request for diagnostics.
    pub hostname: Bytes,
    /// Opaque component version advertised to the peer.
    pub component: Bytes,
    /// Payload codec version advertised in the handshake.
    pub protocol_version: (u8, u8),
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_timeout_secs: DEFAULT_PING_TIMEOUT_SECS,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            compression: CompressionType::None,
            compression_level: 6,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            force_compression_off: false,
            key_exchange: false,
            key_exchange_secret: 1,
            hostname: Bytes::new(),
            component: Bytes::new(),
            protocol_version: (14, 1),
        }
    }
}

/// What the handshake settled on; handed to the embedder when the
/// session becomes active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedInfo {
    /// Protocol number both sides speak (10..=14).
    pub version: u8,
    /// Frame payload ceiling.
    pub max_fragment_size: u16,
    /// Ping timeout in force.
    pub ping_timeout: Duration,
    /// Compression in force.
    pub compression: CompressionType,
    /// Compression threshold in force.
    pub compression_threshold: u16,
    /// Peer's component version blob.
    pub peer_component: Bytes,
    /// A key exchange ran before data flowed.
    pub key_exchange: bool,
}

/// Actions the driver executes on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write these bytes to the transport.
    Send(Bytes),
    /// Hand one application message to the embedder.
    Deliver(Bytes),
    /// The handshake finished; notify the embedder.
    HandshakeComplete(Box<NegotiatedInfo>),
    /// Close the transport and notify the embedder exactly once.
    Close {
        /// Why the session ended.
        error: SessionError,
    },
}

/// The ripc session state machine.
///
/// Generic over the instant type so virtual clocks drive it in tests,
/// real clocks in production.
#[derive(Debug)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    role: SessionRole,
    state: SessionState,
    config: SessionConfig,
    rx: BytesMut,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    compressor: Option<Compressor>,
    keyx: Option<KeyExchange>,
    negotiated: Option<NegotiatedInfo>,
    last_read: I,
    last_write: I,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a session in [`SessionState::Inactive`].
    pub fn new(role: SessionRole, config: SessionConfig, now: I) -> Self {
        Self {
            role,
            state: SessionState::Inactive,
            config,
            rx: BytesMut::new(),
            fragmenter: Fragmenter::default(),
            reassembler: Reassembler::default(),
            compressor: None,
            keyx: None,
            negotiated: None,
            last_read: now,
            last_write: now,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Which side this session plays.
    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Adjust the compression threshold after activation (the ioctl
    /// surface reaches through here).
    pub fn set_compression_threshold(&mut self, threshold: u16) {
        if let Some(info) = self.negotiated.as_mut() {
            info.compression_threshold = threshold;
        }
        self.config.compression_threshold = threshold;
    }

    /// Negotiation outcome, once active.
    #[must_use]
    pub fn negotiated(&self) -> Option<&NegotiatedInfo> {
        self.negotiated.as_ref()
    }

    /// Begin the handshake (initiator side).
    pub fn initiate(&mut self, now: I) -> Result<Vec<SessionAction>> {
        if self.role != SessionRole::Initiator || self.state != SessionState::Inactive {
            return Err(SessionError::InvalidState {
                state: self.state.name(),
                operation: "initiate",
            });
        }
        if self.config.ping_timeout_secs == 0 {
            return Err(SessionError::InvalidArgument("zero ping timeout"));
        }
        let request = ConnectionRequest {
            version: wire::CONN_VERSION_14,
            session_flags: if self.config.key_exchange { SESSION_FLAG_KEY_EXCHANGE } else { 0 },
            ping_timeout_secs: self.config.ping_timeout_secs,
            major: self.config.protocol_version.0,
            minor: self.config.protocol_version.1,
            max_fragment_size: self.config.max_fragment_size,
            compression: self.config.compression,
            hostname: self.config.hostname.clone(),
            component: self.config.component.clone(),
        };
        let bytes = request.encode()?;
        self.state = SessionState::AwaitAck;
        self.last_write = now;
        tracing::debug!(version = 14, "connection request sent");
        Ok(vec![SessionAction::Send(bytes)])
    }

    /// Arm the responder side; the request arrives via [`Self::receive`].
    pub fn accept(&mut self) -> Result<()> {
        if self.role != SessionRole::Responder || self.state != SessionState::Inactive {
            return Err(SessionError::InvalidState {
                state: self.state.name(),
                operation: "accept",
            });
        }
        self.state = SessionState::AwaitRequest;
        Ok(())
    }

    /// Feed bytes read from the transport.
    ///
    /// Frame-level violations close the session via a `Close` action;
    /// the error is also recorded in that action rather than returned,
    /// so the driver has a single cleanup path.
    pub fn receive(&mut self, bytes: &[u8], now: I) -> Vec<SessionAction> {
        if self.state == SessionState::Closing {
            return Vec::new();
        }
        self.rx.extend_from_slice(bytes);
        self.last_read = now;
        let mut actions = Vec::new();
        loop {
            match self.process_rx(now, &mut actions) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(error) => {
                    tracing::warn!(%error, "session violation");
                    self.state = SessionState::Closing;
                    self.reassembler.clear();
                    actions.push(SessionAction::Close { error });
                    break;
                }
            }
        }
        actions
    }

    /// One processing step; true when progress was made.
    fn process_rx(&mut self, now: I, actions: &mut Vec<SessionAction>) -> Result<bool> {
        match self.state {
            SessionState::AwaitRequest => self.process_request(now, actions),
            SessionState::AwaitAck
            | SessionState::AwaitKeyInit
            | SessionState::AwaitKeyReply
            | SessionState::Active => self.process_frame(now, actions),
            SessionState::Inactive | SessionState::Closing => Ok(false),
        }
    }

    fn process_request(&mut self, now: I, actions: &mut Vec<SessionAction>) -> Result<bool> {
        let Some((request, used)) = ConnectionRequest::decode(&self.rx)? else {
            return Ok(false);
        };
        self.rx.advance(used);

        let outcome = match negotiate(
            &request,
            self.config.max_fragment_size,
            self.config.compression,
            self.config.key_exchange,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                let (reason, text) = match &error {
                    SessionError::UnsupportedVersion(v) => (
                        RejectReason::UnsupportedVersion,
                        format!("unsupported connection version {v:#06x}"),
                    ),
                    _ => (RejectReason::BadPingTimeout, error.to_string()),
                };
                let nak = ConnectionNak { reason, text };
                let frame = wire::encode_frame(
                    FrameFlags::DATA,
                    ExtFlags::CONN_NAK,
                    0,
                    0,
                    &nak.encode_body()?,
                )?;
                actions.push(SessionAction::Send(frame));
                return Err(error);
            }
        };

        let ack = ConnectionAck {
            version: outcome.version,
            session_flags: if outcome.key_exchange { SESSION_FLAG_KEY_EXCHANGE } else { 0 },
            ping_timeout_secs: outcome.ping_timeout_secs,
            major: self.config.protocol_version.0,
            minor: self.config.protocol_version.1,
            max_fragment_size: outcome.max_fragment_size,
            compression: outcome.compression,
            compression_threshold: self.config.compression_threshold,
            component: self.config.component.clone(),
        };
        let frame =
            wire::encode_frame(FrameFlags::DATA, ExtFlags::CONN_ACK, 0, 0, &ack.encode_body()?)?;
        actions.push(SessionAction::Send(frame));
        self.last_write = now;

        self.install_negotiated(NegotiatedInfo {
            version: wire::version_number(outcome.version).unwrap_or(10),
            max_fragment_size: outcome.max_fragment_size,
            ping_timeout: Duration::from_secs(u64::from(outcome.ping_timeout_secs)),
            compression: outcome.compression,
            compression_threshold: self.config.compression_threshold,
            peer_component: request.component.clone(),
            key_exchange: outcome.key_exchange,
        })?;

        if outcome.key_exchange {
            self.keyx = Some(KeyExchange::new(self.config.key_exchange_secret)?);
            self.state = SessionState::AwaitKeyInit;
        } else {
            self.activate(actions);
        }
        tracing::info!(
            version = wire::version_number(outcome.version),
            peer = %String::from_utf8_lossy(&request.component),
            "connection accepted"
        );
        Ok(true)
    }

    /// Split the next whole frame out of the receive buffer.
    fn next_frame_bytes(&mut self) -> Result<Option<Bytes>> {
        if self.rx.len() < 2 {
            return Ok(None);
        }
        let frame_len = usize::from(u16::from_be_bytes([self.rx[0], self.rx[1]]));
        if frame_len < wire::MIN_FRAME_LEN {
            return Err(SessionError::InvalidFrame("frame length below minimum"));
        }
        if self.rx.len() < frame_len {
            return Ok(None);
        }
        Ok(Some(self.rx.split_to(frame_len).freeze()))
    }

    fn process_frame(&mut self, now: I, actions: &mut Vec<SessionAction>) -> Result<bool> {
        let Some(frame_bytes) = self.next_frame_bytes()? else {
            return Ok(false);
        };
        let Some((frame, _)) = wire::decode_frame(&frame_bytes)? else {
            return Err(SessionError::InvalidFrame("frame vanished mid-parse"));
        };

        match self.state {
            SessionState::AwaitAck => {
                if frame.ext.contains(ExtFlags::CONN_NAK) {
                    let nak = ConnectionNak::decode_body(frame.payload)?;
                    Err(SessionError::Rejected { code: nak.reason as u8, text: nak.text })
                } else if frame.ext.contains(ExtFlags::CONN_ACK) {
                    let ack = ConnectionAck::decode_body(frame.payload)?;
                    self.handle_ack(&ack, now, actions).map(|()| true)
                } else {
                    Err(SessionError::InvalidFrame("expected connection ack or nak"))
                }
            }
            SessionState::AwaitKeyInit => {
                let reply = self
                    .keyx
                    .as_mut()
                    .ok_or(SessionError::KeyExchange("exchange not armed"))?
                    .accept_init(frame.payload)?;
                let reply_frame =
                    wire::encode_frame(FrameFlags::DATA, ExtFlags::default(), 0, 0, &reply)?;
                actions.push(SessionAction::Send(reply_frame));
                self.last_write = now;
                self.activate(actions);
                Ok(true)
            }
            SessionState::AwaitKeyReply => {
                self.keyx
                    .as_mut()
                    .ok_or(SessionError::KeyExchange("exchange not armed"))?
                    .accept_reply(frame.payload)?;
                self.activate(actions);
                Ok(true)
            }
            SessionState::Active => self.handle_data_frame(&frame, actions).map(|()| true),
            _ => Err(SessionError::InvalidState {
                state: self.state.name(),
                operation: "process_frame",
            }),
        }
    }

    fn handle_ack(
        &mut self,
        ack: &ConnectionAck,
        now: I,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        if !wire::version_supported(ack.version) {
            return Err(SessionError::UnsupportedVersion(ack.version));
        }
        if ack.ping_timeout_secs == 0 {
            return Err(SessionError::InvalidFrame("zero ping timeout in ack"));
        }
        let key_exchange = self.config.key_exchange
            && ack.session_flags & SESSION_FLAG_KEY_EXCHANGE != 0
            && ack.version == wire::CONN_VERSION_14;
        self.install_negotiated(NegotiatedInfo {
            version: wire::version_number(ack.version).unwrap_or(10),
            max_fragment_size: ack.max_fragment_size,
            ping_timeout: Duration::from_secs(u64::from(ack.ping_timeout_secs)),
            compression: ack.compression,
            compression_threshold: ack.compression_threshold,
            peer_component: ack.component.clone(),
            key_exchange,
        })?;

        if key_exchange {
            let exchange = KeyExchange::new(self.config.key_exchange_secret)?;
            let init_frame = wire::encode_frame(
                FrameFlags::DATA,
                ExtFlags::default(),
                0,
                0,
                &exchange.init_body(),
            )?;
            self.keyx = Some(exchange);
            actions.push(SessionAction::Send(init_frame));
            self.last_write = now;
            self.state = SessionState::AwaitKeyReply;
        } else {
            self.activate(actions);
        }
        tracing::info!(
            version = wire::version_number(ack.version),
            peer = %String::from_utf8_lossy(&ack.component),
            "connection established"
        );
        Ok(())
    }

    fn install_negotiated(&mut self, info: NegotiatedInfo) -> Result<()> {
        // The force-off override silences the compress side only; the
        // peer may still compress toward us, so inflation stays armed.
        self.compressor =
            Some(Compressor::new(info.compression, self.config.compression_level));
        self.negotiated = Some(info);
        Ok(())
    }

    fn activate(&mut self, actions: &mut Vec<SessionAction>) {
        self.state = SessionState::Active;
        if let Some(info) = &self.negotiated {
            actions.push(SessionAction::HandshakeComplete(Box::new(info.clone())));
        }
    }

    fn handle_data_frame(
        &mut self,
        frame: &wire::Frame<'_>,
        actions: &mut Vec<SessionAction>,
    ) -> Result<()> {
        if frame.is_ping() {
            return Ok(());
        }
        if frame.ext.contains(ExtFlags::CONN_ACK) || frame.ext.contains(ExtFlags::CONN_NAK) {
            return Err(SessionError::InvalidFrame("handshake frame on active session"));
        }
        if frame.flags.contains(FrameFlags::PACKED) {
            for message in PackReader::new(frame.payload) {
                actions.push(SessionAction::Deliver(Bytes::copy_from_slice(message?)));
            }
            return Ok(());
        }
        if frame.is_first_fragment() || frame.is_continuation() {
            if let Some(done) = self.reassembler.feed(frame)? {
                let payload = if done.compressed {
                    Bytes::from(self.decompressor()?.decompress(&done.payload)?)
                } else {
                    done.payload
                };
                actions.push(SessionAction::Deliver(payload));
            }
            return Ok(());
        }
        let payload = if frame.flags.contains(FrameFlags::COMP_DATA) {
            Bytes::from(self.decompressor()?.decompress(frame.payload)?)
        } else {
            Bytes::copy_from_slice(frame.payload)
        };
        actions.push(SessionAction::Deliver(payload));
        Ok(())
    }

    fn decompressor(&self) -> Result<&Compressor> {
        self.compressor
            .as_ref()
            .ok_or(SessionError::InvalidFrame("compressed data before negotiation"))
    }

    /// Frame one application message for sending, compressing and
    /// fragmenting as negotiated. The driver queues the returned frames
    /// in order.
    pub fn frame_message(&mut self, payload: &[u8], now: I) -> Result<Vec<Bytes>> {
        let (max_fragment, threshold) = {
            let info = self.active_info()?;
            (usize::from(info.max_fragment_size), usize::from(info.compression_threshold))
        };
        let compressor = self
            .compressor
            .clone()
            .ok_or(SessionError::InvalidState { state: "active", operation: "frame_message" })?;

        let compress = !self.config.force_compression_off
            && compressor.compression_type() != CompressionType::None
            && payload.len() >= threshold;
        let frames = if compress {
            let packed = compressor.compress(payload)?;
            self.fragmenter.frame_message(&packed, max_fragment, true)?
        } else {
            self.fragmenter.frame_message(payload, max_fragment, false)?
        };
        self.last_write = now;
        Ok(frames)
    }

    /// Frame an already-packed payload (built with
    /// [`crate::pack::PackWriter`]).
    pub fn frame_packed(&mut self, packed_payload: &[u8], now: I) -> Result<Bytes> {
        let info = self.active_info()?;
        if packed_payload.len() > usize::from(info.max_fragment_size) {
            return Err(SessionError::InvalidArgument("packed payload exceeds fragment size"));
        }
        let frame = wire::encode_frame(
            FrameFlags::DATA | FrameFlags::PACKED,
            ExtFlags::default(),
            0,
            0,
            packed_payload,
        )?;
        self.last_write = now;
        Ok(frame)
    }

    fn active_info(&self) -> Result<&NegotiatedInfo> {
        if self.state != SessionState::Active {
            return Err(SessionError::InvalidState {
                state: self.state.name(),
                operation: "send",
            });
        }
        self.negotiated
            .as_ref()
            .ok_or(SessionError::InvalidState { state: "active", operation: "send" })
    }

    /// Periodic maintenance: ping emission, ping-timeout detection,
    /// reassembly aging. Call at the tick rate.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match self.state {
            SessionState::Active => {
                let Some(info) = self.negotiated.as_ref() else {
                    return actions;
                };
                let timeout = info.ping_timeout;
                if now - self.last_read > timeout {
                    let elapsed = now - self.last_read;
                    self.state = SessionState::Closing;
                    self.reassembler.clear();
                    tracing::warn!(?elapsed, "ping timeout");
                    actions.push(SessionAction::Close {
                        error: SessionError::PingTimeout { elapsed },
                    });
                    return actions;
                }
                if now - self.last_write >= timeout / 2 {
                    actions.push(SessionAction::Send(wire::encode_ping()));
                    self.last_write = now;
                }
                self.reassembler.tick();
            }
            SessionState::AwaitRequest
            | SessionState::AwaitAck
            | SessionState::AwaitKeyInit
            | SessionState::AwaitKeyReply => {
                let deadline = Duration::from_secs(u64::from(self.config.ping_timeout_secs));
                if now - self.last_read > deadline {
                    let elapsed = now - self.last_read;
                    self.state = SessionState::Closing;
                    actions.push(SessionAction::Close {
                        error: SessionError::PingTimeout { elapsed },
                    });
                }
            }
            SessionState::Inactive | SessionState::Closing => {}
        }
        actions
    }

    /// Mark the session closing; queued reassembly state is discarded.
    pub fn close(&mut self) {
        self.state = SessionState::Closing;
        self.reassembler.clear();
    }
}
