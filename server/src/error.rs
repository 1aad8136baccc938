//! Server-side error type

use shared::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Roster slot {0} is not active")]
    InactiveSlot(usize),

    #[error("Tag {0} is reserved for the greeting")]
    ReservedTag(u8),

    #[error("Server host has already been closed")]
    Closed,

    #[error("Failed to spawn server thread: {0}")]
    ThreadSpawn(std::io::Error),

    #[error("Server thread panicked")]
    ThreadPanicked,

    #[error("Server thread is no longer running")]
    ThreadGone,
}
