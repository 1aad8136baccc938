//! Client-side error type

use crate::network::ConnectionState;
use shared::{NameError, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Client is shutting down")]
    ShuttingDown,

    #[error("Tag {0} is reserved for the greeting")]
    ReservedTag(u8),

    #[error("Invalid client name: {0}")]
    Name(#[from] NameError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to spawn client thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Client thread panicked")]
    ThreadPanicked,

    #[error("Client thread is no longer running")]
    ThreadGone,
}
