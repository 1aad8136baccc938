//! # Client Library
//!
//! The client side of the connection lifecycle: a [`network::Client`] owns a
//! single session with a server and moves it through connecting, connected,
//! disconnecting and disconnected as requests, transport events and response
//! timeouts arrive.
//!
//! A client can be driven two ways with the same semantics:
//!
//! - in the foreground, by calling [`shared::service::Service::service`] (or
//!   ticking a [`shared::service::ServiceLoop`]) once per application frame
//! - in the background, via [`network::Client::launch`], which moves it onto
//!   its own thread and returns a [`thread::ClientThread`] handle
//!
//! ```no_run
//! use client::config::ClientConfig;
//! use client::network::{Client, ConnectionState};
//! use std::time::Duration;
//!
//! let client = Client::initialize("1", ClientConfig::default())?;
//! let handle = client.launch()?;
//! handle.connect("localhost")?;
//! handle.wait_for(Duration::from_secs(3), |status| {
//!     status.state == ConnectionState::Connected
//! });
//! let client = handle.join()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod payload;
pub mod thread;

pub use config::ClientConfig;
pub use error::ClientError;
pub use network::{Client, ClientStatus, ConnectionState, Lifecycle};
pub use payload::{LoggingHandler, PayloadHandler};
pub use thread::{ClientCommand, ClientThread, LaunchFailure};
