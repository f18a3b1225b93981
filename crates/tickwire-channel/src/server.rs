//! Server side: bind, accept, hand off.
//!
//! Bind builds the listening socket by hand through `socket2` so the
//! option set is explicit: SO_LINGER(0), SO_REUSEADDR (plus
//! SO_REUSEPORT when the socket is shared), optional SO_SNDBUF /
//! SO_RCVBUF, non-blocking, TCP_NODELAY per config. Accepted sockets
//! inherit the same options before their channel driver starts in
//! handshake state.

use std::{net::SocketAddr, time::Duration};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use tickwire_session::SessionRole;

use crate::{
    channel::{Channel, ChannelHandler, spawn_channel},
    config::{BindOptions, ChannelConfig},
    error::{ChannelError, Result},
};

/// A bound listening socket.
pub struct Server {
    listener: TcpListener,
    options: BindOptions,
}

pub(crate) fn apply_stream_options(stream: &TcpStream, config: &ChannelConfig) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_linger(Some(Duration::ZERO))
        .map_err(|e| ChannelError::from_io("SO_LINGER", &e))?;
    sock.set_keepalive(true).map_err(|e| ChannelError::from_io("SO_KEEPALIVE", &e))?;
    stream
        .set_nodelay(config.tcp_nodelay)
        .map_err(|e| ChannelError::from_io("TCP_NODELAY", &e))?;
    if config.send_buffer_size > 0 {
        sock.set_send_buffer_size(config.send_buffer_size)
            .map_err(|e| ChannelError::from_io("SO_SNDBUF", &e))?;
    }
    if config.recv_buffer_size > 0 {
        sock.set_recv_buffer_size(config.recv_buffer_size)
            .map_err(|e| ChannelError::from_io("SO_RCVBUF", &e))?;
    }
    Ok(())
}

impl Server {
    /// Bind a listening socket with the configured options.
    ///
    /// # Errors
    ///
    /// `ChannelError::SystemFailure` when any socket call fails; the
    /// partially-configured socket is dropped.
    pub fn bind(options: BindOptions) -> Result<Self> {
        let addr: SocketAddr = options
            .address
            .parse()
            .map_err(|_| ChannelError::InvalidArgument("unparseable bind address"))?;

        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ChannelError::from_io("socket", &e))?;
        socket
            .set_linger(Some(Duration::ZERO))
            .map_err(|e| ChannelError::from_io("SO_LINGER", &e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ChannelError::from_io("SO_REUSEADDR", &e))?;
        #[cfg(unix)]
        if options.shared_socket {
            socket
                .set_reuse_port(true)
                .map_err(|e| ChannelError::from_io("SO_REUSEPORT", &e))?;
        }
        if options.channel.send_buffer_size > 0 {
            socket
                .set_send_buffer_size(options.channel.send_buffer_size)
                .map_err(|e| ChannelError::from_io("SO_SNDBUF", &e))?;
        }
        if options.channel.recv_buffer_size > 0 {
            socket
                .set_recv_buffer_size(options.channel.recv_buffer_size)
                .map_err(|e| ChannelError::from_io("SO_RCVBUF", &e))?;
        }
        socket.set_nonblocking(true).map_err(|e| ChannelError::from_io("O_NONBLOCK", &e))?;
        socket.bind(&addr.into()).map_err(|e| ChannelError::from_io("bind", &e))?;
        socket.listen(1024).map_err(|e| ChannelError::from_io("listen", &e))?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| ChannelError::from_io("listener registration", &e))?;
        info!(address = %addr, shared = options.shared_socket, "server bound");
        Ok(Self { listener, options })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| ChannelError::from_io("getsockname", &e))
    }

    /// Per-channel configuration accepted channels will use.
    #[must_use]
    pub fn channel_config(&self) -> &ChannelConfig {
        &self.options.channel
    }

    /// Accept one connection and start its channel in handshake state.
    ///
    /// The returned channel reports activity through `handler` once the
    /// handshake completes.
    pub async fn accept<H: ChannelHandler>(&self, handler: H) -> Result<Channel> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChannelError::from_io("accept", &e))?;
        debug!(%peer, "connection accepted");
        apply_stream_options(&stream, &self.options.channel)?;
        spawn_channel(
            stream,
            SessionRole::Responder,
            self.options.channel.clone(),
            false,
            handler,
        )
    }
}
