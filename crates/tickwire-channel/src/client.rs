//! Client side: direct connect and proxy tunnel dial.
//!
//! Direct connections resolve, apply socket options, and complete a
//! non-blocking connect; the handshake then runs on the channel driver.
//!
//! Proxy connections dial on a dedicated blocking thread (the CONNECT
//! exchange is sequential anyway) and hand the tunneled socket back
//! through a oneshot — the async engine treats that signal the way the
//! select loop treats its internal pipe. A dial failure surfaces as
//! exactly one `channel_inactive` carrying a system-failure sub-code
//! and `Curl failed` text; no other callback fires.

use std::net::SocketAddr;

use tokio::{net::TcpStream, sync::oneshot};
use tracing::{debug, warn};

use tickwire_session::SessionRole;

use crate::{
    channel::{Channel, ChannelHandler, spawn_channel},
    config::{ConnectOptions, ConnectionType},
    error::{ChannelError, Result},
    proxy,
    server::apply_stream_options,
};

/// Connect to a provider.
///
/// Returns once the TCP (or tunnel) connection is established; the
/// handshake continues on the channel driver and completion arrives
/// through `handler.channel_active`. Proxy dial failures are reported
/// through `handler.channel_inactive` instead of this function's
/// return value once the dial thread is running.
pub async fn connect<H: ChannelHandler>(
    options: ConnectOptions,
    handler: H,
) -> Result<Channel> {
    match options.connection_type {
        ConnectionType::Socket | ConnectionType::Encrypted => {
            connect_direct(options, handler).await
        }
        ConnectionType::Http => connect_via_proxy(options, handler).await,
        ConnectionType::ReliableMcast | ConnectionType::Shmem | ConnectionType::SeqMcast => {
            Err(ChannelError::InvalidArgument("transport family not implemented"))
        }
    }
}

async fn connect_direct<H: ChannelHandler>(
    options: ConnectOptions,
    handler: H,
) -> Result<Channel> {
    let addr = resolve(&options.address).await?;
    debug!(%addr, "connecting");
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ChannelError::from_io("connect", &e))?;

    // Write-readiness alone can coincide with an error slot on some
    // platforms; peername is the authoritative success check.
    stream.peer_addr().map_err(|e| ChannelError::from_io("peername", &e))?;

    apply_stream_options(&stream, &options.channel)?;
    spawn_channel(
        stream,
        SessionRole::Initiator,
        options.channel,
        options.key_exchange,
        handler,
    )
}

async fn connect_via_proxy<H: ChannelHandler>(
    options: ConnectOptions,
    mut handler: H,
) -> Result<Channel> {
    let Some(proxy_options) = options.proxy.clone() else {
        return Err(ChannelError::InvalidArgument("http connection type without proxy"));
    };
    let target = options.address.clone();

    // Blocking dial thread; the oneshot is the in-process pipe the
    // engine waits on until the tunnel is live.
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("tickwire-proxy-dial".to_string())
        .spawn(move || {
            let result = proxy::dial_blocking(&proxy_options, &target);
            let _ = tx.send(result);
        })
        .map_err(|e| ChannelError::from_io("proxy dial thread", &e))?;

    let dialed = rx.await.map_err(|_| ChannelError::SystemFailure {
        errno: None,
        text: "Curl failed: dial thread vanished".to_string(),
    });

    let stream = match dialed.and_then(|r| r) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "proxy dial failed");
            handler.channel_inactive(Some(error.clone()));
            return Err(error);
        }
    };

    stream
        .set_nonblocking(true)
        .map_err(|e| ChannelError::from_io("O_NONBLOCK", &e))?;
    let stream = TcpStream::from_std(stream)
        .map_err(|e| ChannelError::from_io("tunnel registration", &e))?;
    apply_stream_options(&stream, &options.channel)?;
    spawn_channel(
        stream,
        SessionRole::Initiator,
        options.channel,
        options.key_exchange,
        handler,
    )
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ChannelError::from_io("resolve", &e))?;
    addrs
        .next()
        .ok_or_else(|| ChannelError::Failure(format!("no addresses for {address}")))
}
