//! # Server Library
//!
//! The server side of the connection lifecycle. A [`network::Server`] keeps a
//! fixed-capacity [`roster::Roster`] of greeted clients, dispatches their
//! payloads, and tears down in two phases when asked to stop: every client is
//! asked to disconnect, and whoever has not confirmed when the shutdown timeout
//! runs out is reset.
//!
//! ## Module Organization
//!
//! - [`roster`]: slot bookkeeping, lowest free slot first
//! - [`network`]: the server state machine and its teardown
//! - [`thread`]: running a server on its own thread and talking to it there
//! - [`payload`]: what happens to application payloads
//! - [`config`], [`error`]
//!
//! ```no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! let handle = Server::open(ServerConfig::default())?.launch()?;
//! // ... serve until it is time to stop ...
//! let server = handle.join()?;
//! println!("{:?}", server.teardown_report());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod payload;
pub mod roster;
pub mod thread;

pub use config::ServerConfig;
pub use error::ServerError;
pub use network::{LastEvent, Server, ServerState, ServerStatus, TeardownReport};
pub use payload::{DemoHandler, PayloadHandler, Reply};
pub use roster::{Admission, Roster, Slot};
pub use thread::{LaunchFailure, ServerCommand, ServerThread};
