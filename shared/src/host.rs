//! Connection-oriented datagram host
//!
//! [`Host`] implements the [`Transport`] contract on top of any datagram
//! [`Link`]: a bounded peer table, a connect/accept handshake, a
//! disconnect/acknowledge handshake and tagged data frames. Outbound frames
//! are queued and only hit the link on [`Transport::flush`] or at the start of
//! a [`Transport::poll`] that finds the event queue empty.
//!
//! Frames are not retransmitted. Anything lost on the link is simply lost;
//! the lifecycles on top recover through their own timeouts.

use crate::error::TransportError;
use crate::transport::{PeerId, PeerInfo, Transport, TransportEvent};
use bincode::{deserialize, serialize};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

/// Largest datagram a host will read
pub const MAX_DATAGRAM: usize = 2048;
/// Largest payload accepted by [`Transport::send`]
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - 64;

/// A raw, unreliable datagram pipe
pub trait Link: Send {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<()>;

    /// Reads one datagram, or returns `Ok(None)` when nothing is pending
    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> SocketAddr;

    /// Releases the underlying resource
    fn close(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Frame {
    Connect { connect_id: u32, channels: u8 },
    Accept { connect_id: u32, channels: u8 },
    Disconnect { connect_id: u32 },
    DisconnectAck { connect_id: u32 },
    Data { connect_id: u32, channel: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
struct PeerSlot {
    info: PeerInfo,
    state: PeerState,
    channels: u8,
}

/// Connection-oriented datagram host over a [`Link`]
///
/// Keeps a fixed table of peers, turns incoming frames into
/// [`TransportEvent`]s and queues outgoing frames until the next `flush` or
/// `poll`.
pub struct Host<L: Link> {
    link: L,
    peers: Vec<Option<PeerSlot>>,
    channel_limit: u8,
    outbox: VecDeque<(SocketAddr, Frame)>,
    events: VecDeque<TransportEvent>,
    buffer: Vec<u8>,
}

impl<L: Link> Host<L> {
    /// Wraps `link` in a host that tracks at most `max_peers` peers
    /// Wraps `link` with room for `max_peers` sessions of at most
    /// `channel_limit` channels each
    pub fn new(link: L, max_peers: usize, channel_limit: u8) -> Self {
        let mut peers = Vec::with_capacity(max_peers);
        peers.resize_with(max_peers, || None);

        Self {
            link,
            peers,
            channel_limit: channel_limit.max(1),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            buffer: vec![0u8; MAX_DATAGRAM],
        }
    }

    pub fn capacity(&self) -> usize {
        self.peers.len()
    }

    /// Number of peers with an established connection
    pub fn connected_peers(&self) -> usize {
        self.peers
            .iter()
            .flatten()
            .filter(|slot| slot.state == PeerState::Connected)
            .count()
    }

    fn slot(&self, peer: PeerId) -> Option<&PeerSlot> {
        self.peers.get(usize::from(peer.0)).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, peer: PeerId) -> Option<&mut PeerSlot> {
        self.peers
            .get_mut(usize::from(peer.0))
            .and_then(Option::as_mut)
    }

    fn free_slot(&self) -> Option<PeerId> {
        self.peers
            .iter()
            .position(Option::is_none)
            .and_then(|index| u16::try_from(index).ok())
            .map(PeerId)
    }

    fn find(&self, address: SocketAddr, connect_id: u32) -> Option<PeerId> {
        self.peers
            .iter()
            .position(|slot| {
                slot.as_ref().map_or(false, |slot| {
                    slot.info.address == address && slot.info.connect_id == connect_id
                })
            })
            .and_then(|index| u16::try_from(index).ok())
            .map(PeerId)
    }

    fn release(&mut self, peer: PeerId) -> Option<PeerSlot> {
        self.peers
            .get_mut(usize::from(peer.0))
            .and_then(Option::take)
    }

    fn queue(&mut self, address: SocketAddr, frame: Frame) {
        self.outbox.push_back((address, frame));
    }

    fn handle_frame(&mut self, from: SocketAddr, frame: Frame) {
        match frame {
            Frame::Connect {
                connect_id,
                channels,
            } => {
                if let Some(peer) = self.find(from, connect_id) {
                    // Our accept got lost; answer the retry
                    if let Some(slot) = self.slot(peer) {
                        if slot.state == PeerState::Connected {
                            let channels = slot.channels;
                            self.queue(from, Frame::Accept { connect_id, channels });
                        }
                    }
                    return;
                }

                let Some(peer) = self.free_slot() else {
                    debug!("Refusing connection from {}: no free peers", from);
                    return;
                };

                let channels = channels.clamp(1, self.channel_limit);
                self.peers[usize::from(peer.0)] = Some(PeerSlot {
                    info: PeerInfo {
                        address: from,
                        connect_id,
                    },
                    state: PeerState::Connected,
                    channels,
                });
                self.queue(from, Frame::Accept { connect_id, channels });
                self.events.push_back(TransportEvent::Connect { peer });
            }

            Frame::Accept {
                connect_id,
                channels,
            } => match self.find(from, connect_id) {
                Some(peer) => {
                    if let Some(slot) = self.slot_mut(peer) {
                        if slot.state == PeerState::Connecting {
                            slot.state = PeerState::Connected;
                            slot.channels = slot.channels.min(channels).max(1);
                            self.events.push_back(TransportEvent::Connect { peer });
                        }
                    }
                }
                None => debug!("Ignoring stale accept from {}", from),
            },

            Frame::Disconnect { connect_id } => {
                // Acknowledge even unknown sessions so the remote end can finish
                self.queue(from, Frame::DisconnectAck { connect_id });

                if let Some(peer) = self.find(from, connect_id) {
                    self.release(peer);
                    self.events.push_back(TransportEvent::Disconnect { peer });
                }
            }

            Frame::DisconnectAck { connect_id } => {
                if let Some(peer) = self.find(from, connect_id) {
                    let disconnecting = self
                        .slot(peer)
                        .map_or(false, |slot| slot.state == PeerState::Disconnecting);

                    if disconnecting {
                        self.release(peer);
                        self.events.push_back(TransportEvent::Disconnect { peer });
                    }
                }
            }

            Frame::Data {
                connect_id,
                channel,
                payload,
            } => {
                let Some(peer) = self.find(from, connect_id) else {
                    debug!("Dropping data from unknown peer {}", from);
                    return;
                };

                let accepted = self.slot(peer).map_or(false, |slot| {
                    slot.state != PeerState::Connecting && channel < slot.channels
                });

                if accepted {
                    self.events.push_back(TransportEvent::Receive {
                        peer,
                        channel,
                        data: payload,
                    });
                } else {
                    warn!("Dropping data on channel {} from {}", channel, from);
                }
            }
        }
    }

    fn receive_pending(&mut self) {
        loop {
            match self.link.recv_from(&mut self.buffer) {
                Ok(Some((len, from))) => match deserialize::<Frame>(&self.buffer[..len]) {
                    Ok(frame) => self.handle_frame(from, frame),
                    Err(_) => warn!("Failed to deserialize frame from {}", from),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Error receiving datagram: {}", e);
                    break;
                }
            }
        }
    }
}

impl<L: Link> Transport for Host<L> {
    fn connect(&mut self, address: SocketAddr, channels: u8) -> Result<PeerId, TransportError> {
        let peer = self.free_slot().ok_or(TransportError::NoFreePeers {
            capacity: self.capacity(),
        })?;

        let connect_id = rand::random::<u32>();
        let channels = channels.clamp(1, self.channel_limit);

        self.peers[usize::from(peer.0)] = Some(PeerSlot {
            info: PeerInfo {
                address,
                connect_id,
            },
            state: PeerState::Connecting,
            channels,
        });
        self.queue(
            address,
            Frame::Connect {
                connect_id,
                channels,
            },
        );

        debug!("Connecting to {} as peer {}", address, peer);
        Ok(peer)
    }

    fn disconnect(&mut self, peer: PeerId) {
        let Some(slot) = self.slot_mut(peer) else {
            return;
        };
        if slot.state == PeerState::Disconnecting {
            return;
        }

        slot.state = PeerState::Disconnecting;
        let address = slot.info.address;
        let connect_id = slot.info.connect_id;
        self.queue(address, Frame::Disconnect { connect_id });
    }

    fn disconnect_now(&mut self, peer: PeerId) {
        let Some(slot) = self.release(peer) else {
            return;
        };

        if slot.state != PeerState::Disconnecting {
            let connect_id = slot.info.connect_id;
            self.queue(slot.info.address, Frame::Disconnect { connect_id });
        }
        self.flush();
        debug!("Disconnected peer {} ({}) without waiting", peer, slot.info.address);
    }

    fn reset(&mut self, peer: PeerId) {
        if let Some(slot) = self.release(peer) {
            debug!("Reset peer {} ({})", peer, slot.info.address);
        }
    }

    fn send(&mut self, peer: PeerId, channel: u8, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max_size: MAX_PAYLOAD,
            });
        }

        let slot = self.slot(peer).ok_or(TransportError::UnknownPeer(peer))?;
        if slot.state != PeerState::Connected {
            return Err(TransportError::NotConnected(peer));
        }
        if channel >= slot.channels {
            return Err(TransportError::InvalidChannel {
                channel,
                limit: slot.channels,
            });
        }

        let address = slot.info.address;
        let connect_id = slot.info.connect_id;
        self.queue(
            address,
            Frame::Data {
                connect_id,
                channel,
                payload: data.to_vec(),
            },
        );
        Ok(())
    }

    fn broadcast(&mut self, channel: u8, data: &[u8]) {
        let targets: Vec<PeerId> = self
            .peers
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Some(slot) if slot.state == PeerState::Connected => {
                    u16::try_from(index).ok().map(PeerId)
                }
                _ => None,
            })
            .collect();

        for peer in targets {
            if let Err(e) = self.send(peer, channel, data) {
                warn!("Failed to broadcast to peer {}: {}", peer, e);
            }
        }
    }

    fn flush(&mut self) {
        while let Some((address, frame)) = self.outbox.pop_front() {
            match serialize(&frame) {
                Ok(bytes) => {
                    if let Err(e) = self.link.send_to(&bytes, address) {
                        warn!("Failed to send frame to {}: {}", address, e);
                    }
                }
                Err(e) => warn!("Failed to serialize frame for {}: {}", address, e),
            }
        }
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }

        self.flush();
        self.receive_pending();
        // Handshake replies queued while receiving go out right away
        self.flush();

        self.events.pop_front()
    }

    fn peer_info(&self, peer: PeerId) -> Option<PeerInfo> {
        self.slot(peer).map(|slot| slot.info)
    }

    fn local_addr(&self) -> SocketAddr {
        self.link.local_addr()
    }

    fn close(&mut self) {
        self.flush();
        for slot in self.peers.iter_mut() {
            *slot = None;
        }
        self.events.clear();
        self.link.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNetwork;
    use tokio_test::{assert_err, assert_ok};

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn drain<T: Transport>(host: &mut T) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = host.poll() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_handshake() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();
        let mut client = network.open(None, 1, 2).unwrap();

        let peer = client.connect(address(2345), 2).unwrap();
        assert!(drain(&mut client).is_empty());

        let events = drain(&mut server);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransportEvent::Connect { .. }));

        assert_eq!(drain(&mut client), vec![TransportEvent::Connect { peer }]);
        assert_eq!(client.connected_peers(), 1);
        assert_eq!(server.connected_peers(), 1);
    }

    #[test]
    fn test_connect_refused_when_full() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 1, 2).unwrap();
        let mut first = network.open(None, 1, 2).unwrap();
        let mut second = network.open(None, 1, 2).unwrap();

        first.connect(address(2345), 2).unwrap();
        second.connect(address(2345), 2).unwrap();
        first.flush();
        second.flush();

        assert_eq!(drain(&mut server).len(), 1);
        assert_eq!(drain(&mut first).len(), 1);
        assert!(drain(&mut second).is_empty());
    }

    #[test]
    fn test_local_connect_capacity() {
        let network = LoopbackNetwork::new();
        let mut client = network.open(None, 1, 2).unwrap();

        assert_ok!(client.connect(address(2345), 2));
        assert_err!(client.connect(address(2345), 2));
    }

    #[test]
    fn test_data_and_graceful_disconnect() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();
        let mut client = network.open(None, 1, 2).unwrap();

        let peer = client.connect(address(2345), 2).unwrap();
        client.flush();
        let server_peer = drain(&mut server)[0].peer();
        drain(&mut client);

        client.send(peer, 0, b"hello").unwrap();
        client.flush();
        assert_eq!(
            drain(&mut server),
            vec![TransportEvent::Receive {
                peer: server_peer,
                channel: 0,
                data: b"hello".to_vec()
            }]
        );

        client.disconnect(peer);
        client.flush();
        assert_eq!(
            drain(&mut server),
            vec![TransportEvent::Disconnect { peer: server_peer }]
        );
        assert_eq!(drain(&mut client), vec![TransportEvent::Disconnect { peer }]);
        assert!(client.peer_info(peer).is_none());
    }

    #[test]
    fn test_disconnect_now_releases_and_notifies() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();
        let mut client = network.open(None, 1, 2).unwrap();

        let peer = client.connect(address(2345), 2).unwrap();
        client.flush();
        let server_peer = drain(&mut server)[0].peer();
        drain(&mut client);

        client.disconnect_now(peer);
        assert!(client.peer_info(peer).is_none());
        assert_eq!(client.connected_peers(), 0);

        assert_eq!(
            drain(&mut server),
            vec![TransportEvent::Disconnect { peer: server_peer }]
        );
        // the acknowledgement finds no session left to release
        assert!(drain(&mut client).is_empty());
        assert_ok!(client.connect(address(2345), 2));
    }

    #[test]
    fn test_reset_is_silent() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();
        let mut client = network.open(None, 1, 2).unwrap();

        let peer = client.connect(address(2345), 2).unwrap();
        client.flush();
        drain(&mut server);
        drain(&mut client);

        client.reset(peer);
        assert!(client.peer_info(peer).is_none());
        assert!(drain(&mut client).is_empty());
        assert!(drain(&mut server).is_empty());
        assert_eq!(server.connected_peers(), 1);
    }

    #[test]
    fn test_send_checks() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();
        let mut client = network.open(None, 1, 2).unwrap();

        let peer = client.connect(address(2345), 2).unwrap();
        assert!(matches!(
            client.send(peer, 0, b"early"),
            Err(TransportError::NotConnected(_))
        ));
        assert!(matches!(
            client.send(PeerId(9), 0, b"nobody"),
            Err(TransportError::UnknownPeer(_))
        ));

        client.flush();
        drain(&mut server);
        drain(&mut client);

        assert!(matches!(
            client.send(peer, 2, b"bad channel"),
            Err(TransportError::InvalidChannel { channel: 2, limit: 2 })
        ));
        assert!(matches!(
            client.send(peer, 0, &vec![0u8; MAX_PAYLOAD + 1]),
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_broadcast_reaches_connected_peers() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 3, 2).unwrap();
        let mut clients: Vec<_> = (0..2).map(|_| network.open(None, 1, 2).unwrap()).collect();

        for client in clients.iter_mut() {
            client.connect(address(2345), 2).unwrap();
            client.flush();
        }
        drain(&mut server);
        for client in clients.iter_mut() {
            drain(client);
        }

        server.broadcast(1, b"all");
        server.flush();

        for client in clients.iter_mut() {
            let events = drain(client);
            assert_eq!(events.len(), 1);
            assert!(matches!(
                &events[0],
                TransportEvent::Receive { channel: 1, data, .. } if data == b"all"
            ));
        }
    }

    #[test]
    fn test_garbage_datagram_is_ignored() {
        let network = LoopbackNetwork::new();
        let mut server = network.open(Some(address(2345)), 2, 2).unwrap();

        network.inject(address(40000), address(2345), vec![0xff; 3]);
        assert!(drain(&mut server).is_empty());
    }
}
