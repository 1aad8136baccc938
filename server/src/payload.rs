//! Application payloads arriving at the server

use log::{info, warn};
use shared::message::{TAG_BROADCAST, TAG_BROADCAST_REQUEST, TAG_DIRECT, TAG_VALUE};
use shared::{ClientName, DemoPayload};

/// Value carried by the server's direct demo payload
pub const DIRECT_DEMO: DemoPayload = DemoPayload { x: 8 };
/// Value carried by the server's broadcast demo payload
pub const BROADCAST_DEMO: DemoPayload = DemoPayload { x: 5 };

/// Something the server should send in answer to a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Back to the client that sent the payload
    ToSender { tag: u8, body: Vec<u8> },
    /// To every connected client
    Broadcast { tag: u8, body: Vec<u8> },
}

/// Receives every non-greeting message from a roster member
pub trait PayloadHandler: Send {
    fn on_payload(&mut self, client: &ClientName, tag: u8, body: &[u8]) -> Vec<Reply>;
}

/// Logs incoming payloads and answers broadcast requests with a broadcast
#[derive(Debug, Default)]
pub struct DemoHandler;

impl PayloadHandler for DemoHandler {
    fn on_payload(&mut self, client: &ClientName, tag: u8, body: &[u8]) -> Vec<Reply> {
        let value = DemoPayload::from_body(body).ok().map(|payload| payload.x);

        match tag {
            TAG_VALUE => {
                info!("Received payload from client {} ({:?})", client, value);
                Vec::new()
            }
            TAG_BROADCAST_REQUEST => {
                info!(
                    "Received broadcast request from client {} ({:?}), sending to all clients",
                    client, value
                );
                match bincode::serialize(&BROADCAST_DEMO) {
                    Ok(body) => vec![Reply::Broadcast {
                        tag: TAG_BROADCAST,
                        body,
                    }],
                    Err(e) => {
                        warn!("Failed to encode broadcast payload: {}", e);
                        Vec::new()
                    }
                }
            }
            TAG_DIRECT | TAG_BROADCAST => {
                warn!("Client {} sent server-only payload type {}", client, tag);
                Vec::new()
            }
            _ => {
                warn!("Client {} sent unknown payload type {}", client, tag);
                Vec::new()
            }
        }
    }
}
