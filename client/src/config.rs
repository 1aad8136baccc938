//! Client tunables

use shared::{CHANNEL_COUNT, RESPONSE_TIMEOUT, SERVER_PORT, SERVICE_RATE};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port the server listens on
    pub port: u16,
    pub channel_count: u8,
    /// Target rate of a background client's service loop
    pub service_rate: u32,
    /// How long to wait for a connect or disconnect to be confirmed
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: SERVER_PORT,
            channel_count: CHANNEL_COUNT,
            service_rate: SERVICE_RATE,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }
}
