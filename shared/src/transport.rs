//! Transport contract consumed by the client and server lifecycles
//!
//! The lifecycles never touch sockets; they talk to a [`Transport`], which
//! hands out opaque peer handles, queues outbound data and reports what
//! happened through a non-blocking event queue.

use crate::error::TransportError;
use std::fmt;
use std::net::SocketAddr;

/// Handle to one remote peer of a transport host
///
/// Handles are only meaningful for the host that issued them and may be
/// reused once the transport has released the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u16);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events reported by [`Transport::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection to `peer` completed, inbound or outbound
    Connect { peer: PeerId },
    /// `peer` is gone and its handle has been released
    Disconnect { peer: PeerId },
    /// Data arrived from a connected peer
    Receive {
        peer: PeerId,
        channel: u8,
        data: Vec<u8>,
    },
}

impl TransportEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            TransportEvent::Connect { peer }
            | TransportEvent::Disconnect { peer }
            | TransportEvent::Receive { peer, .. } => *peer,
        }
    }
}

/// What a transport knows about one of its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: SocketAddr,
    /// Random identifier chosen when the connection was initiated
    pub connect_id: u32,
}

/// A reliable-datagram style host
pub trait Transport: Send {
    /// Starts a connection to `address`; completion is reported as a
    /// [`TransportEvent::Connect`]
    fn connect(&mut self, address: SocketAddr, channels: u8) -> Result<PeerId, TransportError>;

    /// Asks `peer` to disconnect; confirmation is reported as a
    /// [`TransportEvent::Disconnect`]. Unknown peers are ignored.
    fn disconnect(&mut self, peer: PeerId);

    /// Tells `peer` the session is over and releases it at once, without
    /// waiting for a confirmation or producing an event. Unknown peers are
    /// ignored.
    fn disconnect_now(&mut self, peer: PeerId);

    /// Drops `peer` immediately without telling the remote end and without
    /// producing an event. Unknown peers are ignored.
    fn reset(&mut self, peer: PeerId);

    /// Queues `data` for `peer`
    fn send(&mut self, peer: PeerId, channel: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Queues `data` for every connected peer
    fn broadcast(&mut self, channel: u8, data: &[u8]);

    /// Sends everything queued so far
    fn flush(&mut self);

    /// Returns the next pending event without blocking
    fn poll(&mut self) -> Option<TransportEvent>;

    fn peer_info(&self, peer: PeerId) -> Option<PeerInfo>;

    fn local_addr(&self) -> SocketAddr;

    /// Flushes pending frames and releases the host; every remaining peer is
    /// dropped without notification
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, address: SocketAddr, channels: u8) -> Result<PeerId, TransportError> {
        (**self).connect(address, channels)
    }

    fn disconnect(&mut self, peer: PeerId) {
        (**self).disconnect(peer)
    }

    fn disconnect_now(&mut self, peer: PeerId) {
        (**self).disconnect_now(peer)
    }

    fn reset(&mut self, peer: PeerId) {
        (**self).reset(peer)
    }

    fn send(&mut self, peer: PeerId, channel: u8, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(peer, channel, data)
    }

    fn broadcast(&mut self, channel: u8, data: &[u8]) {
        (**self).broadcast(channel, data)
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        (**self).poll()
    }

    fn peer_info(&self, peer: PeerId) -> Option<PeerInfo> {
        (**self).peer_info(peer)
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Resolves `host` on `port`, preferring IPv4 results
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    use std::net::ToSocketAddrs;

    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve(format!("{}: {}", host, e)))?
        .collect();

    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| TransportError::Resolve(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_numeric_address() {
        let address = resolve("127.0.0.1", 2345).unwrap();
        assert_eq!(address, "127.0.0.1:2345".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_resolve_localhost_prefers_ipv4() {
        let address = resolve("localhost", 2345).unwrap();
        assert_eq!(address.port(), 2345);
        assert!(address.ip().is_loopback());
    }

    #[test]
    fn test_resolve_garbage_fails() {
        assert!(resolve("not a host name", 2345).is_err());
    }

    #[test]
    fn test_event_peer() {
        let peer = PeerId(3);
        assert_eq!(TransportEvent::Connect { peer }.peer(), peer);
        assert_eq!(TransportEvent::Disconnect { peer }.peer(), peer);
        assert_eq!(
            TransportEvent::Receive {
                peer,
                channel: 0,
                data: vec![]
            }
            .peer(),
            peer
        );
        assert_eq!(peer.to_string(), "#3");
    }
}
