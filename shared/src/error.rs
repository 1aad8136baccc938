//! Error types shared by the transport, the message framing and both lifecycles

use crate::transport::PeerId;
use thiserror::Error;

/// Failures reported by a [`crate::transport::Transport`] implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No free peer slots (capacity {capacity})")]
    NoFreePeers { capacity: usize },

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("Channel {channel} out of range (channels: {limit})")]
    InvalidChannel { channel: u8, limit: u8 },

    #[error("Payload too large: {size} bytes (max: {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("Could not resolve address: {0}")]
    Resolve(String),

    #[error("Address already in use: {0}")]
    AddressInUse(std::net::SocketAddr),

    #[error("Frame encoding failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// Rejected client names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Name is {len} bytes long (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("Name contains an interior NUL byte")]
    InteriorNul,
}

/// Malformed application messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Empty message")]
    Empty,

    #[error("Greeting is missing its name")]
    MissingName,

    #[error("Invalid name: {0}")]
    Name(#[from] NameError),
}
