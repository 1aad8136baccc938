//! Server lifecycle: roster upkeep while running, two-phase teardown on shutdown
//!
//! While running, every tick drains the transport: greetings admit clients to
//! the [`Roster`], disconnects free their slots and payloads go to the
//! [`PayloadHandler`]. Shutdown is graceful first: every roster member is asked
//! to disconnect and the server keeps servicing events until they have all
//! confirmed or the shutdown timeout runs out. Whoever is left is then reset
//! and the host closed, so teardown always finishes within the timeout plus one
//! frame.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::payload::{DemoHandler, PayloadHandler, Reply};
use crate::roster::{Admission, Roster};
use log::{debug, error, info, warn};
use shared::host::Host;
use shared::message::GREETING_TAG;
use shared::service::Service;
use shared::udp::{self, UdpLink};
use shared::{ClientName, Message, PeerId, Transport, TransportEvent, MESSAGE_CHANNEL};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Shutdown,
    Running,
    ShuttingDown,
}

/// The most recent message received from any peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastEvent {
    pub connect_id: u32,
    pub at: Instant,
}

/// How a teardown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    /// Clients that confirmed the disconnect in time
    pub confirmed: usize,
    /// Clients reset after the timeout ran out
    pub forced: usize,
    pub elapsed: Duration,
}

/// Read-only snapshot of a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub state: ServerState,
    pub client_count: usize,
    /// Active roster slots as `(index, name)`
    pub clients: Vec<(usize, ClientName)>,
    pub shutdown_timeout: Duration,
    pub last_event: Option<LastEvent>,
}

struct Teardown {
    started: Instant,
    notified: usize,
}

/// A server accepting up to `max_clients` greeted clients over a transport `T`
pub struct Server<T: Transport> {
    transport: T,
    config: ServerConfig,
    roster: Roster,
    state: ServerState,
    shutdown_timeout: Duration,
    last_event: Option<LastEvent>,
    handler: Box<dyn PayloadHandler>,
    teardown: Option<Teardown>,
    report: Option<TeardownReport>,
    closed: bool,
}

impl Server<Host<UdpLink>> {
    /// Opens the UDP host the server listens on
    ///
    /// The host admits at most `max_clients` peers, so connections beyond the
    /// roster's capacity are refused by the transport itself.
    pub fn open(config: ServerConfig) -> Result<Self, ServerError> {
        let transport = udp::open(Some(config.bind), config.max_clients, config.channel_count)
            .map_err(|e| {
                error!("Failed to open server host on {}: {}", config.bind, e);
                e
            })?;

        info!("Server listening on {}", transport.local_addr());
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> Server<T> {
    /// Creates a shut down server with an empty roster on an already opened
    /// transport
    pub fn with_transport(transport: T, config: ServerConfig) -> Self {
        Self {
            transport,
            roster: Roster::new(config.max_clients),
            config,
            state: ServerState::Shutdown,
            shutdown_timeout: Duration::ZERO,
            last_event: None,
            handler: Box::new(DemoHandler),
            teardown: None,
            report: None,
            closed: false,
        }
    }

    pub fn with_handler(mut self, handler: impl PayloadHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn client_count(&self) -> usize {
        self.roster.client_count()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn last_event(&self) -> Option<LastEvent> {
        self.last_event
    }

    /// Result of the last completed teardown
    pub fn teardown_report(&self) -> Option<TeardownReport> {
        self.report
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            state: self.state,
            client_count: self.roster.client_count(),
            clients: self
                .roster
                .active()
                .map(|(index, slot)| (index, slot.name.clone()))
                .collect(),
            shutdown_timeout: self.shutdown_timeout,
            last_event: self.last_event,
        }
    }

    /// Moves a freshly opened server into the running state
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.closed {
            return Err(ServerError::Closed);
        }
        if self.state != ServerState::Shutdown {
            info!("Server already launched");
            return Ok(());
        }

        self.state = ServerState::Running;
        self.report = None;
        info!("Server launched");
        Ok(())
    }

    /// Returns a server whose launch fell through to the shut down state
    pub(crate) fn stop(&mut self) {
        self.state = ServerState::Shutdown;
    }

    /// Sends a payload to the client in roster slot `slot`
    pub fn send_to_one(&mut self, slot: usize, tag: u8, body: &[u8]) -> Result<(), ServerError> {
        if tag == GREETING_TAG {
            return Err(ServerError::ReservedTag(tag));
        }
        let peer = self
            .roster
            .get(slot)
            .map(|slot| slot.peer)
            .ok_or(ServerError::InactiveSlot(slot))?;

        let message = Message::Payload {
            tag,
            body: body.to_vec(),
        };
        self.transport.send(peer, MESSAGE_CHANNEL, &message.encode())?;
        Ok(())
    }

    /// Sends a payload to every connected client
    pub fn broadcast(&mut self, tag: u8, body: &[u8]) -> Result<(), ServerError> {
        if tag == GREETING_TAG {
            return Err(ServerError::ReservedTag(tag));
        }

        let message = Message::Payload {
            tag,
            body: body.to_vec(),
        };
        self.transport.broadcast(MESSAGE_CHANNEL, &message.encode());
        Ok(())
    }

    /// One running frame: drains and dispatches every pending transport event
    pub fn frame(&mut self) {
        while let Some(event) = self.transport.poll() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect { peer } => match self.transport.peer_info(peer) {
                Some(info) => info!("Connection from {}", info.address),
                None => info!("Connection from peer {}", peer),
            },
            TransportEvent::Disconnect { peer } => match self.roster.remove_by_peer(peer) {
                Some((_, slot)) => info!("Client {} disconnected", slot.name),
                None => debug!("Peer {} disconnected without a roster slot", peer),
            },
            TransportEvent::Receive { peer, data, .. } => {
                if let Some(info) = self.transport.peer_info(peer) {
                    self.last_event = Some(LastEvent {
                        connect_id: info.connect_id,
                        at: Instant::now(),
                    });
                }

                match Message::decode(&data) {
                    Ok(Message::Greeting(name)) => self.on_greeting(peer, name),
                    Ok(Message::Payload { tag, body }) => self.on_payload(peer, tag, &body),
                    Err(e) => warn!("Bad message from peer {}: {}", peer, e),
                }
            }
        }
    }

    fn on_greeting(&mut self, peer: PeerId, name: ClientName) {
        info!("Received greeting from client {}", name);

        match self.roster.admit(peer, name) {
            Admission::Admitted(_) => {}
            Admission::AlreadyAdmitted(index) => {
                warn!("Peer {} greeted again, keeping slot {}", peer, index);
            }
            Admission::Full => {
                warn!("No free roster slot for peer {}, disconnecting it", peer);
                self.transport.disconnect(peer);
            }
        }
    }

    fn on_payload(&mut self, peer: PeerId, tag: u8, body: &[u8]) {
        let Some(index) = self.roster.find_by_peer(peer) else {
            warn!("Ignoring payload type {} from ungreeted peer {}", tag, peer);
            return;
        };
        let name = match self.roster.get(index) {
            Some(slot) => slot.name.clone(),
            None => return,
        };

        for reply in self.handler.on_payload(&name, tag, body) {
            let result = match reply {
                Reply::ToSender { tag, body } => self.send_to_one(index, tag, &body),
                Reply::Broadcast { tag, body } => self.broadcast(tag, &body),
            };
            if let Err(e) = result {
                warn!("Failed to answer client {}: {}", name, e);
            }
        }
    }

    /// Starts a graceful teardown; returns whether any client has to confirm
    pub fn begin_shutdown(&mut self) -> bool {
        info!("Server shutting down");
        self.state = ServerState::ShuttingDown;

        let peers: Vec<(PeerId, ClientName)> = self
            .roster
            .active()
            .map(|(_, slot)| (slot.peer, slot.name.clone()))
            .collect();

        for (peer, name) in &peers {
            info!("Sending disconnect to client {}", name);
            self.transport.disconnect(*peer);
        }

        self.shutdown_timeout = if peers.is_empty() {
            Duration::ZERO
        } else {
            self.config.shutdown_timeout
        };
        self.teardown = Some(Teardown {
            started: Instant::now(),
            notified: peers.len(),
        });

        !peers.is_empty()
    }

    /// One teardown frame: advances the shutdown timeout and collects
    /// disconnect confirmations
    pub fn shutdown_frame(&mut self, frame_time: Duration) {
        if !self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = self.shutdown_timeout.saturating_sub(frame_time);
        }

        while let Some(event) = self.transport.poll() {
            match event {
                TransportEvent::Disconnect { peer } => {
                    if let Some((_, slot)) = self.roster.remove_by_peer(peer) {
                        info!("Received disconnect from client {}", slot.name);
                    }
                }
                event => debug!("Ignoring {:?} during shutdown", event),
            }
        }
    }

    /// Whether the teardown is still waiting for confirmations
    pub fn teardown_pending(&self) -> bool {
        !self.roster.is_empty() && !self.shutdown_timeout.is_zero()
    }

    /// Resets whoever did not confirm in time and closes the host
    pub fn finish_shutdown(&mut self) -> TeardownReport {
        let evicted = self.roster.clear();
        for (_, slot) in &evicted {
            warn!("Client {} did not confirm disconnect, resetting", slot.name);
            self.transport.reset(slot.peer);
        }

        let (started, notified) = self
            .teardown
            .take()
            .map_or((Instant::now(), evicted.len()), |teardown| {
                (teardown.started, teardown.notified)
            });

        self.transport.close();
        self.closed = true;
        self.shutdown_timeout = Duration::ZERO;
        self.state = ServerState::Shutdown;

        let report = TeardownReport {
            confirmed: notified.saturating_sub(evicted.len()),
            forced: evicted.len(),
            elapsed: started.elapsed(),
        };
        self.report = Some(report);

        info!(
            "Server shut down ({} confirmed, {} reset)",
            report.confirmed, report.forced
        );
        report
    }
}

impl<T: Transport> Service for Server<T> {
    fn service(&mut self, _frame_time: Duration) {
        self.frame();
    }

    fn keep_running(&mut self, quit_requested: bool) -> bool {
        !quit_requested
    }
}

/// Drives the teardown frames once shutdown has begun
pub(crate) struct TeardownService<'a, T: Transport> {
    pub(crate) server: &'a mut Server<T>,
}

impl<T: Transport> Service for TeardownService<'_, T> {
    fn service(&mut self, frame_time: Duration) {
        self.server.shutdown_frame(frame_time);
    }

    fn keep_running(&mut self, _quit_requested: bool) -> bool {
        self.server.teardown_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BROADCAST_DEMO, DIRECT_DEMO};
    use assert_approx_eq::assert_approx_eq;
    use shared::loopback::{LoopbackLink, LoopbackNetwork};
    use shared::message::{TAG_BROADCAST, TAG_BROADCAST_REQUEST, TAG_DIRECT};
    use shared::DemoPayload;
    use std::net::SocketAddr;
    use tokio_test::{assert_err, assert_ok};

    const SERVER: ([u8; 4], u16) = ([127, 0, 0, 1], 2345);

    struct Peer {
        host: Host<LoopbackLink>,
        id: PeerId,
    }

    impl Peer {
        fn events(&mut self) -> Vec<TransportEvent> {
            let mut events = Vec::new();
            while let Some(event) = self.host.poll() {
                events.push(event);
            }
            events
        }
    }

    fn server_with(network: &LoopbackNetwork, max_clients: usize) -> Server<Host<LoopbackLink>> {
        let config = ServerConfig {
            bind: SocketAddr::from(SERVER),
            max_clients,
            ..ServerConfig::default()
        };
        let host = network
            .open(Some(config.bind), config.max_clients, config.channel_count)
            .unwrap();
        let mut server = Server::with_transport(host, config);
        server.start().unwrap();
        server
    }

    /// Connects a bare transport peer and optionally greets
    fn connect(
        network: &LoopbackNetwork,
        server: &mut Server<Host<LoopbackLink>>,
        greeting: Option<&str>,
    ) -> Peer {
        let mut host = network.open(None, 1, 2).unwrap();
        let id = host.connect(SocketAddr::from(SERVER), 2).unwrap();
        host.flush();
        server.frame();

        let mut peer = Peer { host, id };
        assert!(matches!(peer.events()[..], [TransportEvent::Connect { .. }]));

        if let Some(name) = greeting {
            let greeting = Message::greeting(&ClientName::new(name).unwrap()).encode();
            peer.host.send(id, MESSAGE_CHANNEL, &greeting).unwrap();
            peer.host.flush();
            server.frame();
        }
        peer
    }

    #[test]
    fn test_new_server_is_shut_down() {
        let network = LoopbackNetwork::new();
        let host = network.open(None, 3, 2).unwrap();
        let server = Server::with_transport(host, ServerConfig::default());

        assert_eq!(server.state(), ServerState::Shutdown);
        assert_eq!(server.client_count(), 0);
        assert!(server.last_event().is_none());
        assert!(!server.is_closed());
    }

    #[test]
    fn test_greeting_admits_client() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        connect(&network, &mut server, Some("alice"));

        assert_eq!(server.client_count(), 1);
        let status = server.status();
        assert_eq!(status.clients, vec![(0, ClientName::new("alice").unwrap())]);
        assert!(status.last_event.is_some());
    }

    #[test]
    fn test_connection_without_greeting_has_no_slot() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        connect(&network, &mut server, None);
        assert_eq!(server.client_count(), 0);
        assert_eq!(server.transport().connected_peers(), 1);
    }

    #[test]
    fn test_unplaceable_greeting_is_disconnected() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 2);
        // shrink the roster below the host's peer limit
        server.roster = Roster::new(1);

        connect(&network, &mut server, Some("a"));
        let mut late = connect(&network, &mut server, Some("b"));

        assert_eq!(server.client_count(), 1);
        assert_eq!(
            late.events(),
            vec![TransportEvent::Disconnect { peer: late.id }]
        );
    }

    #[test]
    fn test_disconnect_frees_slot() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let mut a = connect(&network, &mut server, Some("a"));
        connect(&network, &mut server, Some("b"));

        a.host.disconnect(a.id);
        a.host.flush();
        server.frame();

        assert_eq!(server.client_count(), 1);
        assert_eq!(
            server.status().clients,
            vec![(1, ClientName::new("b").unwrap())]
        );

        // the freed slot is the first one handed out again
        connect(&network, &mut server, Some("c"));
        assert_eq!(server.roster().get(0).unwrap().name.as_str(), "c");
    }

    #[test]
    fn test_broadcast_request_is_answered_to_everyone() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let mut a = connect(&network, &mut server, Some("a"));
        let mut b = connect(&network, &mut server, Some("b"));

        let body = bincode::serialize(&DemoPayload { x: 7 }).unwrap();
        let mut request = vec![TAG_BROADCAST_REQUEST];
        request.extend_from_slice(&body);
        a.host.send(a.id, MESSAGE_CHANNEL, &request).unwrap();
        a.host.flush();
        server.frame();
        server.transport.flush();

        for peer in [&mut a, &mut b] {
            let events = peer.events();
            assert_eq!(events.len(), 1);
            match &events[0] {
                TransportEvent::Receive { data, .. } => {
                    assert_eq!(data[0], TAG_BROADCAST);
                    assert_eq!(DemoPayload::from_body(&data[1..]).unwrap(), BROADCAST_DEMO);
                }
                other => panic!("Expected payload, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_payload_from_ungreeted_peer_is_ignored() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let mut peer = connect(&network, &mut server, None);
        peer.host.send(peer.id, MESSAGE_CHANNEL, &[TAG_BROADCAST_REQUEST]).unwrap();
        peer.host.flush();
        server.frame();
        server.transport.flush();

        assert!(peer.events().is_empty());
    }

    #[test]
    fn test_send_to_one() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let mut a = connect(&network, &mut server, Some("a"));
        let mut b = connect(&network, &mut server, Some("b"));

        let body = bincode::serialize(&DIRECT_DEMO).unwrap();
        assert_ok!(server.send_to_one(1, TAG_DIRECT, &body));
        assert!(matches!(
            server.send_to_one(2, TAG_DIRECT, &body),
            Err(ServerError::InactiveSlot(2))
        ));
        assert_err!(server.send_to_one(0, GREETING_TAG, &body));
        server.transport.flush();

        assert!(a.events().is_empty());
        assert!(matches!(
            &b.events()[..],
            [TransportEvent::Receive { data, .. }] if data[0] == TAG_DIRECT
        ));
    }

    #[test]
    fn test_shutdown_without_clients_needs_no_wait() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        assert!(!server.begin_shutdown());
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(!server.teardown_pending());

        let report = server.finish_shutdown();
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.forced, 0);
        assert_eq!(server.state(), ServerState::Shutdown);
        assert!(server.is_closed());
        assert!(matches!(server.start(), Err(ServerError::Closed)));
    }

    #[test]
    fn test_shutdown_with_confirming_clients() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let mut peers: Vec<Peer> = ["a", "b", "c"]
            .iter()
            .map(|name| connect(&network, &mut server, Some(name)))
            .collect();

        assert!(server.begin_shutdown());
        assert_eq!(server.shutdown_timeout(), Duration::from_secs(3));

        // disconnect requests leave with the first teardown poll
        server.shutdown_frame(Duration::from_millis(100));
        for peer in peers.iter_mut() {
            assert_eq!(
                peer.events(),
                vec![TransportEvent::Disconnect { peer: peer.id }]
            );
        }

        server.shutdown_frame(Duration::from_millis(100));
        assert_eq!(server.client_count(), 0);
        assert!(!server.teardown_pending());
        assert_approx_eq!(server.shutdown_timeout().as_secs_f64(), 2.8, 1e-9);

        let report = server.finish_shutdown();
        assert_eq!(report.confirmed, 3);
        assert_eq!(report.forced, 0);
    }

    #[test]
    fn test_shutdown_with_silent_clients_forces_at_expiry() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        let peers: Vec<Peer> = ["a", "b"]
            .iter()
            .map(|name| connect(&network, &mut server, Some(name)))
            .collect();
        for peer in &peers {
            network.mute(peer.host.local_addr());
        }

        server.begin_shutdown();
        for _ in 0..29 {
            server.shutdown_frame(Duration::from_millis(100));
            assert!(server.teardown_pending());
            assert_eq!(server.client_count(), 2);
        }

        server.shutdown_frame(Duration::from_millis(100));
        assert!(!server.teardown_pending());
        assert_eq!(server.client_count(), 2);

        let report = server.finish_shutdown();
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.forced, 2);
        assert_eq!(server.client_count(), 0);
        assert_eq!(server.teardown_report(), Some(report));
    }

    #[test]
    fn test_late_connection_during_shutdown_is_ignored() {
        let network = LoopbackNetwork::new();
        let mut server = server_with(&network, 3);

        connect(&network, &mut server, Some("a"));
        server.begin_shutdown();

        let mut late = network.open(None, 1, 2).unwrap();
        late.connect(SocketAddr::from(SERVER), 2).unwrap();
        late.flush();
        server.shutdown_frame(Duration::from_millis(10));

        assert_eq!(server.client_count(), 1);
    }
}
