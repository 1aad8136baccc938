//! Application payloads arriving at a client

use log::{info, warn};
use shared::message::{TAG_BROADCAST, TAG_DIRECT};
use shared::{ClientName, DemoPayload};

/// Receives every non-greeting message a client gets from its server
pub trait PayloadHandler: Send {
    fn on_payload(&mut self, client: &ClientName, tag: u8, body: &[u8]);
}

/// Logs the demo payloads and anything else it is handed
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl PayloadHandler for LoggingHandler {
    fn on_payload(&mut self, client: &ClientName, tag: u8, body: &[u8]) {
        let value = DemoPayload::from_body(body).ok().map(|payload| payload.x);

        match tag {
            TAG_DIRECT => info!(
                "Client {}: received direct payload from server ({:?})",
                client, value
            ),
            TAG_BROADCAST => info!(
                "Client {}: received broadcast payload from server ({:?})",
                client, value
            ),
            _ => warn!(
                "Client {}: received unknown payload type {} ({} bytes)",
                client,
                tag,
                body.len()
            ),
        }
    }
}
