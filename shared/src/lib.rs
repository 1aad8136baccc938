//! # Shared Lifecycle Building Blocks
//!
//! Everything the client and server lifecycles have in common lives here:
//!
//! - [`frame_limiter`]: per-thread frame pacing with absolute-deadline waits
//! - [`service`]: the rate-limited tick both lifecycles run
//! - [`shutdown`]: one-shot cancellation sampled at tick boundaries
//! - [`message`]: the one-byte-tag message framing and the greeting
//! - [`transport`]: the transport contract the lifecycles are written against
//! - [`host`], [`udp`], [`loopback`]: a datagram host implementing that
//!   contract over UDP sockets or an in-process network

pub mod error;
pub mod frame_limiter;
pub mod host;
pub mod loopback;
pub mod message;
pub mod service;
pub mod shutdown;
pub mod transport;
pub mod udp;

use std::time::Duration;

pub use error::{MessageError, NameError, TransportError};
pub use message::{ClientName, DemoPayload, Message};
pub use transport::{PeerId, PeerInfo, Transport, TransportEvent};

/// Well-known port the server listens on
pub const SERVER_PORT: u16 = 2345;
/// Channels opened per connection
pub const CHANNEL_COUNT: u8 = 2;
/// Channel used for every lifecycle message
pub const MESSAGE_CHANNEL: u8 = 0;

/// How long a client waits for a connect or disconnect to be confirmed
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a server waits for peers to confirm a shutdown disconnect
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Target rate of the regular service loops
pub const SERVICE_RATE: u32 = 100;
/// Target rate of the server's teardown loop
pub const SHUTDOWN_RATE: u32 = 10;

/// Default number of roster slots on a server
pub const DEFAULT_MAX_CLIENTS: usize = 3;
