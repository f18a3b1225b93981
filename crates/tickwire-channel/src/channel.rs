//! The channel: one connection, one driver task, one owner.
//!
//! A [`Channel`] is the embedder-facing handle; commands flow over an
//! in-process queue to the driver task that owns the socket and the
//! session state machine. All reads, writes, and state transitions for
//! a channel happen on its driver, so ordering within the channel is
//! serial by construction and the only locks left are around the
//! buffer pool.
//!
//! The driver is readiness-driven: it sleeps on socket readiness, the
//! command queue, and the tick interval. Writes use `try_write`; a
//! frame the socket would not take whole stays at the head of its
//! queue and resumes on the next writable notification.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use bytes::{Bytes, BytesMut};
use tokio::{io::Interest, net::TcpStream, sync::mpsc};
use tracing::{debug, info, warn};

use tickwire_session::{
    NegotiatedInfo, Session, SessionAction, SessionConfig, SessionRole, SessionState,
};

use crate::{
    config::{ChannelConfig, Ioctl},
    error::{ChannelError, Result},
    pool::{BufferPool, PoolStats},
    priority::{FlushStrategy, Priority, PriorityQueues},
};

/// Everything the embedder learns when a channel goes active.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Handshake outcome: version, fragment size, ping timeout,
    /// compression, peer component version.
    pub negotiated: NegotiatedInfo,
    /// Peer address.
    pub peer_addr: SocketAddr,
    /// Buffers pre-allocated for this channel.
    pub guaranteed_output_buffers: usize,
    /// Pool growth ceiling.
    pub max_output_buffers: usize,
    /// SO_SNDBUF actually in effect (0 = OS default untouched).
    pub send_buffer_size: usize,
    /// SO_RCVBUF actually in effect (0 = OS default untouched).
    pub recv_buffer_size: usize,
}

/// Callback contract: the only way embedders receive events.
///
/// All three run on the channel's driver; they must not block.
pub trait ChannelHandler: Send + 'static {
    /// Handshake complete. The channel accepts writes from here on.
    fn channel_active(&mut self, info: &ChannelInfo);

    /// One application message. The buffer is owned and independent of
    /// transport internals.
    fn message(&mut self, buffer: Bytes);

    /// Final notification, delivered exactly once. The channel must
    /// not be used afterward; buffers still held may (and should) be
    /// released late, which the pool tolerates.
    fn channel_inactive(&mut self, error: Option<ChannelError>);
}

pub(crate) enum Cmd {
    Write { payload: BytesMut, priority: Priority, flush: bool },
    WritePacked { payload: BytesMut, priority: Priority },
    Flush,
    Ioctl(Ioctl),
    Close,
}

/// Embedder-facing handle to one connection.
///
/// Cheap to clone; all clones steer the same driver.
#[derive(Clone)]
pub struct Channel {
    cmds: mpsc::UnboundedSender<Cmd>,
    pool: Arc<BufferPool>,
    peer_addr: SocketAddr,
}

impl Channel {
    /// Peer address of this channel.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Take an output buffer from the channel's pool.
    ///
    /// # Errors
    ///
    /// `ChannelError::NoBuffers` when the pool is exhausted; retry
    /// after a flush completes.
    pub fn get_buffer(&self) -> Result<BytesMut> {
        self.pool.acquire()
    }

    /// Return a buffer without writing it.
    pub fn release_buffer(&self, buf: BytesMut) {
        self.pool.release(buf);
    }

    /// Queue a filled buffer for sending at the given priority.
    ///
    /// Ownership transfers to the channel; the slab returns to the pool
    /// once framed. Legal only after `channel_active`: writing during
    /// the handshake closes the channel with an invalid-state error.
    pub fn write(&self, payload: BytesMut, priority: Priority) -> Result<()> {
        self.send_cmd(Cmd::Write { payload, priority, flush: false })
    }

    /// Queue a buffer and flush immediately.
    pub fn write_and_flush(&self, payload: BytesMut, priority: Priority) -> Result<()> {
        self.send_cmd(Cmd::Write { payload, priority, flush: true })
    }

    /// Queue a packed payload (built with
    /// [`tickwire_session::pack::PackWriter`]).
    pub fn write_packed(&self, payload: BytesMut, priority: Priority) -> Result<()> {
        self.send_cmd(Cmd::WritePacked { payload, priority })
    }

    /// Drain queued frames to the socket.
    pub fn flush(&self) -> Result<()> {
        self.send_cmd(Cmd::Flush)
    }

    /// Adjust a runtime knob.
    pub fn ioctl(&self, code: Ioctl) -> Result<()> {
        self.send_cmd(Cmd::Ioctl(code))
    }

    /// Begin an orderly close: queued writes drain best-effort, then
    /// the inactive callback fires.
    pub fn close(&self) -> Result<()> {
        self.send_cmd(Cmd::Close)
    }

    /// Pool usage counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn send_cmd(&self, cmd: Cmd) -> Result<()> {
        self.cmds.send(cmd).map_err(|_| ChannelError::Closed)
    }
}

/// Build the session config for a channel from its engine config.
fn session_config(config: &ChannelConfig, key_exchange: bool) -> SessionConfig {
    SessionConfig {
        ping_timeout_secs: config.ping_timeout.as_secs().clamp(1, 255) as u8,
        max_fragment_size: config.max_fragment_size,
        compression: config.compression,
        compression_level: config.compression_level,
        compression_threshold: config.compression_threshold,
        force_compression_off: config.force_compression_off,
        key_exchange,
        // The exchange derives a scrambling key, not a secret that
        // guards anything; clock-mixed process identity is enough.
        key_exchange_secret: key_exchange_seed(),
        hostname: Bytes::from(
            hostname_of().unwrap_or_else(|| "unknown".to_string()).into_bytes(),
        ),
        component: Bytes::from(config.component_version.clone().into_bytes()),
        protocol_version: (14, 1),
    }
}

fn hostname_of() -> Option<String> {
    std::env::var("HOSTNAME").ok()
}

fn key_exchange_seed() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    ((u64::from(std::process::id()) << 32) | u64::from(nanos))
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        | 1
}

/// Spawn the driver task for an established socket and return the
/// handle.
pub(crate) fn spawn_channel<H: ChannelHandler>(
    stream: TcpStream,
    role: SessionRole,
    config: ChannelConfig,
    key_exchange: bool,
    handler: H,
) -> Result<Channel> {
    let peer_addr = stream
        .peer_addr()
        .map_err(|e| ChannelError::from_io("peername", &e))?;
    let strategy = FlushStrategy::parse(&config.flush_strategy)?;
    let pool = Arc::new(BufferPool::new(
        usize::from(config.max_fragment_size),
        config.guaranteed_output_buffers,
        config.max_output_buffers,
    ));

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let session = Session::new(role, session_config(&config, key_exchange), Instant::now());
    let driver = ChannelDriver {
        stream,
        session,
        queues: PriorityQueues::default(),
        strategy,
        pending: None,
        pool: Arc::clone(&pool),
        config,
        cmds: cmd_rx,
        handler,
        peer_addr,
        high_water: 0,
        inactive_sent: false,
    };
    tokio::spawn(driver.run());

    Ok(Channel { cmds: cmd_tx, pool, peer_addr })
}

struct PendingWrite {
    frame: Bytes,
    offset: usize,
}

struct ChannelDriver<H: ChannelHandler> {
    stream: TcpStream,
    session: Session<Instant>,
    queues: PriorityQueues,
    strategy: FlushStrategy,
    pending: Option<PendingWrite>,
    pool: Arc<BufferPool>,
    config: ChannelConfig,
    cmds: mpsc::UnboundedReceiver<Cmd>,
    handler: H,
    peer_addr: SocketAddr,
    high_water: usize,
    inactive_sent: bool,
}

impl<H: ChannelHandler> ChannelDriver<H> {
    async fn run(mut self) {
        self.high_water = self.config.high_water_mark;
        let startup = self.start_session();
        if let Err(error) = startup {
            self.go_inactive(Some(error));
            return;
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !self.inactive_sent {
            let want_write = self.pending.is_some() || !self.queues.is_empty();
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            tokio::select! {
                cmd = self.cmds.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Err(error) = self.handle_cmd(cmd) {
                                self.go_inactive(Some(error));
                            }
                        }
                        // Every handle dropped: orderly close.
                        None => {
                            let _ = self.try_flush();
                            self.go_inactive(None);
                        }
                    }
                }
                ready = self.stream.ready(interest) => {
                    match ready {
                        Ok(ready) => {
                            if ready.is_readable() {
                                if let Err(error) = self.drain_read() {
                                    self.go_inactive(Some(error));
                                    continue;
                                }
                            }
                            if ready.is_writable() && want_write {
                                if let Err(error) = self.try_flush() {
                                    self.go_inactive(Some(error));
                                }
                            }
                        }
                        Err(e) => {
                            self.go_inactive(Some(ChannelError::from_io("readiness", &e)));
                        }
                    }
                }
                _ = ticker.tick() => {
                    let actions = self.session.tick(Instant::now());
                    if let Err(error) = self.execute(actions) {
                        self.go_inactive(Some(error));
                        continue;
                    }
                    // Timed flush keeps latency bounded when the
                    // high-water mark is never reached.
                    if let Err(error) = self.try_flush() {
                        self.go_inactive(Some(error));
                    }
                }
            }
        }
    }

    fn start_session(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.session.state() {
            SessionState::Inactive => {}
            _ => return Err(ChannelError::InvalidArgument("session already started")),
        }
        let actions = match self.session.role() {
            SessionRole::Initiator => self.session.initiate(now)?,
            SessionRole::Responder => {
                self.session.accept()?;
                Vec::new()
            }
        };
        self.execute(actions)?;
        self.try_flush()
    }

    fn handle_cmd(&mut self, cmd: Cmd) -> Result<()> {
        match cmd {
            Cmd::Write { payload, priority, flush } => {
                let frames = self.session.frame_message(&payload, Instant::now());
                self.pool.release(payload);
                for frame in frames? {
                    self.queues.push(priority, frame);
                }
                if flush || self.queues.queued_bytes() >= self.high_water {
                    self.try_flush()?;
                }
                Ok(())
            }
            Cmd::WritePacked { payload, priority } => {
                let frame = self.session.frame_packed(&payload, Instant::now());
                self.pool.release(payload);
                self.queues.push(priority, frame?);
                if self.queues.queued_bytes() >= self.high_water {
                    self.try_flush()?;
                }
                Ok(())
            }
            Cmd::Flush => self.try_flush(),
            Cmd::Ioctl(code) => self.handle_ioctl(code),
            Cmd::Close => {
                let _ = self.try_flush();
                self.go_inactive(None);
                Ok(())
            }
        }
    }

    fn handle_ioctl(&mut self, code: Ioctl) -> Result<()> {
        debug!(?code, "ioctl");
        match code {
            Ioctl::MaxNumBuffers(n) | Ioctl::NumGuaranteedBuffers(n) => {
                self.pool.set_max(n);
            }
            Ioctl::HighWaterMark(bytes) => self.high_water = bytes,
            Ioctl::SystemWriteBuffers(bytes) => {
                let sock = socket2::SockRef::from(&self.stream);
                sock.set_send_buffer_size(bytes)
                    .map_err(|e| ChannelError::from_io("SO_SNDBUF", &e))?;
            }
            Ioctl::SystemReadBuffers(bytes) => {
                let sock = socket2::SockRef::from(&self.stream);
                sock.set_recv_buffer_size(bytes)
                    .map_err(|e| ChannelError::from_io("SO_RCVBUF", &e))?;
            }
            Ioctl::DebugFlags(flags) => {
                debug!(flags, "debug flags updated");
            }
            Ioctl::PriorityFlushOrder(order) => {
                self.strategy = FlushStrategy::parse(&order)?;
            }
            Ioctl::CompressionThreshold(threshold) => {
                self.session.set_compression_threshold(threshold);
            }
            Ioctl::ResetPeakBuffers => self.pool.reset_peak(),
            Ioctl::CompressionSafetyCap(_) | Ioctl::IgnoreCertRevocation(_) => {
                // Accepted for compatibility; the zlib/lz4 paths bound
                // output themselves and revocation applies only to
                // embedder-supplied TLS.
            }
        }
        Ok(())
    }

    fn drain_read(&mut self) -> Result<()> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    debug!(peer = %self.peer_addr, "peer closed");
                    self.go_inactive(None);
                    return Ok(());
                }
                Ok(n) => {
                    let actions = self.session.receive(&buf[..n], Instant::now());
                    self.execute(actions)?;
                    if self.inactive_sent {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ChannelError::from_io("read", &e)),
            }
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) -> Result<()> {
        for action in actions {
            match action {
                SessionAction::Send(frame) => {
                    // Control frames (handshake, pings, key exchange)
                    // queue at high priority behind earlier writes of
                    // the same priority, never ahead of them.
                    self.queues.push(Priority::High, frame);
                    self.try_flush()?;
                }
                SessionAction::Deliver(message) => self.handler.message(message),
                SessionAction::HandshakeComplete(info) => {
                    let info = self.channel_info(*info);
                    info!(peer = %self.peer_addr, version = info.negotiated.version, "channel active");
                    self.handler.channel_active(&info);
                }
                SessionAction::Close { error } => {
                    self.go_inactive(Some(ChannelError::Session(error)));
                }
            }
            if self.inactive_sent {
                break;
            }
        }
        Ok(())
    }

    fn channel_info(&self, negotiated: NegotiatedInfo) -> ChannelInfo {
        ChannelInfo {
            negotiated,
            peer_addr: self.peer_addr,
            guaranteed_output_buffers: self.config.guaranteed_output_buffers,
            max_output_buffers: self.pool.stats().max,
            send_buffer_size: self.config.send_buffer_size,
            recv_buffer_size: self.config.recv_buffer_size,
        }
    }

    /// Write queued frames until the socket pushes back. A frame the
    /// socket took partially stays pending and resumes first.
    fn try_flush(&mut self) -> Result<()> {
        loop {
            let mut write = match self.pending.take() {
                Some(write) => write,
                None => match self.queues.pop_for_flush(&mut self.strategy) {
                    Some((_, frame)) => PendingWrite { frame, offset: 0 },
                    None => return Ok(()),
                },
            };
            while write.offset < write.frame.len() {
                match self.stream.try_write(&write.frame[write.offset..]) {
                    Ok(n) => write.offset += n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        self.pending = Some(write);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(peer = %self.peer_addr, error = %e, "write failed");
                        return Err(ChannelError::WriteFlushFailed(e.to_string()));
                    }
                }
            }
        }
    }

    /// Tear down once: mark closing, best-effort drain, exactly one
    /// inactive callback, then shut the socket down.
    fn go_inactive(&mut self, error: Option<ChannelError>) {
        if self.inactive_sent {
            return;
        }
        self.inactive_sent = true;
        self.session.close();
        if error.is_none() {
            let _ = self.try_flush();
        } else {
            self.queues.clear();
            self.pending = None;
        }
        match &error {
            Some(error) => warn!(peer = %self.peer_addr, %error, "channel inactive"),
            None => info!(peer = %self.peer_addr, "channel closed"),
        }
        self.handler.channel_inactive(error);
        // Half-close lets in-flight peer bytes die quietly; the socket
        // itself closes when the driver drops.
        let sock = socket2::SockRef::from(&self.stream);
        let _ = sock.shutdown(std::net::Shutdown::Write);
    }
}
