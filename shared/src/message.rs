//! Application message framing
//!
//! Every message starts with a one-byte type tag. Tag [`GREETING_TAG`] is the
//! greeting a client sends right after the transport reports the connection,
//! followed by its NUL-terminated name. Every other tag is an opaque payload
//! handed to a payload handler.

use crate::error::{MessageError, NameError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const GREETING_TAG: u8 = 0;

/// Client to server: plain value
pub const TAG_VALUE: u8 = 1;
/// Client to server: asks the server to broadcast to everyone
pub const TAG_BROADCAST_REQUEST: u8 = 2;
/// Server to a single client
pub const TAG_DIRECT: u8 = 3;
/// Server to all clients
pub const TAG_BROADCAST: u8 = 4;

/// Size of a name buffer, terminator included
pub const NAME_BUFFER_SIZE: usize = 8;
/// Longest usable name
pub const MAX_NAME_LENGTH: usize = NAME_BUFFER_SIZE - 1;

/// A client name that always fits the greeting's name buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClientName(String);

impl ClientName {
    pub fn new(name: &str) -> Result<Self, NameError> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong {
                len: name.len(),
                max: MAX_NAME_LENGTH,
            });
        }
        if name.contains('\0') {
            return Err(NameError::InteriorNul);
        }

        Ok(Self(name.to_string()))
    }

    /// Reads a name out of a NUL-terminated buffer
    ///
    /// Stops at the first NUL or after `MAX_NAME_LENGTH` bytes, whichever comes
    /// first. Invalid UTF-8 is replaced rather than rejected.
    fn from_wire(bytes: &[u8]) -> Self {
        let end = bytes
            .iter()
            .take(MAX_NAME_LENGTH)
            .position(|b| *b == 0)
            .unwrap_or_else(|| bytes.len().min(MAX_NAME_LENGTH));

        let mut name = String::from_utf8_lossy(&bytes[..end]).into_owned();
        // Replacement characters can push a lossy decode past the buffer size
        while name.len() > MAX_NAME_LENGTH {
            name.pop();
        }

        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Greeting(ClientName),
    Payload { tag: u8, body: Vec<u8> },
}

impl Message {
    pub fn greeting(name: &ClientName) -> Self {
        Message::Greeting(name.clone())
    }

    pub fn tag(&self) -> u8 {
        match self {
            Message::Greeting(_) => GREETING_TAG,
            Message::Payload { tag, .. } => *tag,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Greeting(name) => {
                let mut bytes = Vec::with_capacity(name.as_str().len() + 2);
                bytes.push(GREETING_TAG);
                bytes.extend_from_slice(name.as_str().as_bytes());
                bytes.push(0);
                bytes
            }
            Message::Payload { tag, body } => {
                let mut bytes = Vec::with_capacity(body.len() + 1);
                bytes.push(*tag);
                bytes.extend_from_slice(body);
                bytes
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let (&tag, rest) = bytes.split_first().ok_or(MessageError::Empty)?;

        if tag == GREETING_TAG {
            if rest.is_empty() {
                return Err(MessageError::MissingName);
            }
            return Ok(Message::Greeting(ClientName::from_wire(rest)));
        }

        Ok(Message::Payload {
            tag,
            body: rest.to_vec(),
        })
    }
}

/// Body carried by the demo payload tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoPayload {
    pub x: i32,
}

impl DemoPayload {
    /// Builds a complete tagged message carrying this payload
    pub fn into_message(self, tag: u8) -> Result<Message, bincode::Error> {
        Ok(Message::Payload {
            tag,
            body: bincode::serialize(&self)?,
        })
    }

    pub fn from_body(body: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(body)
    }
}
