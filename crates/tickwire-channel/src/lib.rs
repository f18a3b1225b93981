//! Channel engine for the tickwire runtime.
//!
//! Carries encoded messages over TCP with the ripc framing and session
//! machinery from `tickwire-session`:
//!
//! - [`server::Server`] binds and accepts; [`client::connect`] dials
//!   directly or through an HTTP CONNECT proxy;
//! - every connection gets a [`channel::Channel`] handle and a driver
//!   task that owns the socket, the session state machine, the output
//!   buffer pool, and the three priority queues;
//! - embedders receive events only through the
//!   [`channel::ChannelHandler`] callbacks: active, message, inactive
//!   (exactly once);
//! - writes go buffer-by-buffer from the channel's pool, flushed by
//!   explicit request, by the high-water mark, or by the tick.
//!
//! ```no_run
//! use bytes::Bytes;
//! use tickwire_channel::{
//!     channel::{Channel, ChannelHandler, ChannelInfo},
//!     config::ConnectOptions,
//!     error::ChannelError,
//! };
//!
//! struct Consumer;
//!
//! impl ChannelHandler for Consumer {
//!     fn channel_active(&mut self, info: &ChannelInfo) {
//!         println!("up: version {}", info.negotiated.version);
//!     }
//!     fn message(&mut self, buffer: Bytes) {
//!         println!("{} bytes", buffer.len());
//!     }
//!     fn channel_inactive(&mut self, error: Option<ChannelError>) {
//!         println!("down: {error:?}");
//!     }
//! }
//!
//! # async fn run() -> Result<(), ChannelError> {
//! let options = ConnectOptions {
//!     address: "feed.example.com:14002".to_string(),
//!     ..ConnectOptions::default()
//! };
//! let channel = tickwire_channel::client::connect(options, Consumer).await?;
//! let buffer = channel.get_buffer()?;
//! // ...encode with tickwire-codec, then:
//! channel.write_and_flush(buffer, tickwire_channel::priority::Priority::High)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod priority;
pub mod proxy;
pub mod server;
pub mod worker;

pub use channel::{Channel, ChannelHandler, ChannelInfo};
pub use config::{BindOptions, ChannelConfig, ConnectOptions, ConnectionType, Ioctl, ProxyOptions};
pub use error::{ChannelError, ErrorBudget, Result};
pub use priority::Priority;
pub use server::Server;
pub use worker::{WorkerId, WorkerPool, initialize, shutdown};
