//! # tor-ctrl
//!
//! An async Rust client for the [Tor control protocol](https://spec.torproject.org/control-spec/).
//!
//! The heart of the crate is a request/response multiplexer over the
//! control socket: a single background reader parses every reply,
//! routes asynchronous events (status class 6xx) to registered
//! listeners, and pairs everything else with pending commands in FIFO
//! order — the same order their bytes were written. Any number of
//! tasks can issue commands concurrently over one connection while
//! events keep flowing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tor_ctrl::{Result, Signal, TorClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Connect to the default control port (127.0.0.1:9051).
//!     let client = TorClient::connect_default().await?;
//!
//!     // Authenticate with the best advertised method.
//!     client.auto_authenticate().await?;
//!
//!     let version = client.get_info("version").await?;
//!     println!("connected to {}", version);
//!
//!     // Switch to clean circuits.
//!     client.signal(Signal::NewNym).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! Subscribe with SETEVENTS, then receive events through a typed
//! handler, raw listeners, or both:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tor_ctrl::{EventHandler, EventType, TorClient};
//!
//! struct Bandwidth;
//!
//! impl EventHandler for Bandwidth {
//!     fn bandwidth_used(&self, bytes_read: u64, bytes_written: u64) {
//!         println!("{} read, {} written", bytes_read, bytes_written);
//!     }
//! }
//!
//! # async fn example() -> tor_ctrl::Result<()> {
//! # let client = TorClient::connect_default().await?;
//! client.connection().set_event_handler(Some(Arc::new(Bandwidth)));
//! client.set_events(&[EventType::Bw, EventType::Circ]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Onion services
//!
//! ```rust,no_run
//! # async fn example() -> tor_ctrl::Result<()> {
//! # let client = tor_ctrl::TorClient::connect_default().await?;
//! let service = client
//!     .add_onion("NEW:BEST", &[(80, Some("127.0.0.1:8080"))], &[])
//!     .await?;
//! println!("serving at http://{}", service.onion_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Layering
//!
//! [`TorClient`] is a thin façade: one method per protocol verb, each
//! formatting its arguments and delegating to
//! [`ControlConnection`](connection::ControlConnection), which owns
//! the framing, the multiplexing and the event dispatch. Programs
//! needing verbs this crate does not wrap can drop to
//! [`TorClient::raw_command`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod error;
pub mod events;
pub mod protocol;
pub mod types;

#[cfg(feature = "tokio-runtime")]
pub mod client;
#[cfg(feature = "tokio-runtime")]
pub mod connection;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{Result, TorCtlError};

pub use auth::{AuthMethod, ProtocolInfo};
pub use events::{EventHandler, EventType, RawEventListener};
pub use protocol::{Reply, ReplyLine};
pub use types::{CircuitId, ConfigEntry, OnionServiceInfo, Signal, StreamId};

#[cfg(feature = "tokio-runtime")]
pub use client::TorClient;
#[cfg(feature = "tokio-runtime")]
pub use connection::{ControlConnection, DebugTap};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tor control protocol version supported.
pub const PROTOCOL_VERSION: u32 = 1;
