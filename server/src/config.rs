//! Server tunables

use shared::{
    CHANNEL_COUNT, DEFAULT_MAX_CLIENTS, SERVER_PORT, SERVICE_RATE, SHUTDOWN_RATE, SHUTDOWN_TIMEOUT,
};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the host listens on
    pub bind: SocketAddr,
    /// Roster slots, also the transport's peer limit
    pub max_clients: usize,
    pub channel_count: u8,
    /// Target rate of the regular service loop
    pub service_rate: u32,
    /// Target rate while waiting for clients to confirm a shutdown
    pub shutdown_rate: u32,
    /// How long clients get to confirm a shutdown disconnect
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], SERVER_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            channel_count: CHANNEL_COUNT,
            service_rate: SERVICE_RATE,
            shutdown_rate: SHUTDOWN_RATE,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}
