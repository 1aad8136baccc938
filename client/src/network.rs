//! Client connection state machine
//!
//! A [`Client`] owns one outbound session. Its connection state moves only on
//! explicit requests ([`Client::connect`], [`Client::disconnect`]), transport
//! events drained in [`Client::service`], and expiry of the response timeout.
//! The thread lifecycle (running, shutting down, shut down) is tracked
//! separately so a session can be shutting down while it is still
//! disconnecting.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::payload::{LoggingHandler, PayloadHandler};
use log::{debug, error, info, warn};
use shared::host::Host;
use shared::service::Service;
use shared::transport::resolve;
use shared::udp::{self, UdpLink};
use shared::{ClientName, Message, PeerId, Transport, TransportEvent, MESSAGE_CHANNEL};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Thread lifecycle of a client, independent of its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Read-only snapshot of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub name: ClientName,
    pub state: ConnectionState,
    pub lifecycle: Lifecycle,
    pub awaiting_response: bool,
    pub response_timeout: Duration,
}

/// One outbound session to a server over a transport `T`
pub struct Client<T: Transport> {
    name: ClientName,
    config: ClientConfig,
    transport: T,
    /// The server we are connected to, owned exclusively by this session
    remote_server: Option<PeerId>,
    state: ConnectionState,
    lifecycle: Lifecycle,
    awaiting_response: bool,
    response_timeout: Duration,
    frame_time: Duration,
    quit_seen: bool,
    handler: Box<dyn PayloadHandler>,
}

impl Client<Host<UdpLink>> {
    /// Creates a client on a fresh UDP host with room for a single peer
    pub fn initialize(name: &str, config: ClientConfig) -> Result<Self, ClientError> {
        let name = ClientName::new(name)?;
        let transport = udp::open(None, 1, config.channel_count).map_err(|e| {
            error!("Failed to create client host: {}", e);
            e
        })?;

        Ok(Self::with_transport(name, transport, config))
    }
}

impl<T: Transport> Client<T> {
    /// Creates a disconnected, shut down client on an already opened transport
    pub fn with_transport(name: ClientName, transport: T, config: ClientConfig) -> Self {
        Self {
            name,
            config,
            transport,
            remote_server: None,
            state: ConnectionState::Disconnected,
            lifecycle: Lifecycle::Shutdown,
            awaiting_response: false,
            response_timeout: Duration::ZERO,
            frame_time: Duration::ZERO,
            quit_seen: false,
            handler: Box::new(LoggingHandler),
        }
    }

    pub fn with_handler(mut self, handler: impl PayloadHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn name(&self) -> &ClientName {
        &self.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn remote_server(&self) -> Option<PeerId> {
        self.remote_server
    }

    /// Duration of the most recently serviced frame
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            name: self.name.clone(),
            state: self.state,
            lifecycle: self.lifecycle,
            awaiting_response: self.awaiting_response,
            response_timeout: self.response_timeout,
        }
    }

    /// Starts connecting to `host` on the configured server port
    ///
    /// Rejected while already connected. A connect or disconnect still waiting
    /// for its answer is abandoned and its peer reset first.
    pub fn connect(&mut self, host: &str) -> Result<(), ClientError> {
        if self.state == ConnectionState::Connected {
            warn!("Client {}: already connected", self.name);
            return Err(ClientError::AlreadyConnected);
        }
        if self.lifecycle == Lifecycle::ShuttingDown {
            warn!("Client {}: refusing to connect while shutting down", self.name);
            return Err(ClientError::ShuttingDown);
        }

        let address = resolve(host, self.config.port).map_err(|e| {
            warn!("Client {}: {}", self.name, e);
            e
        })?;

        if let Some(stale) = self.remote_server.take() {
            warn!(
                "Client {}: abandoning pending {} attempt",
                self.name, self.state
            );
            self.transport.reset(stale);
            self.enter_disconnected();
        }

        let peer = self
            .transport
            .connect(address, self.config.channel_count)
            .map_err(|e| {
                error!("Client {}: failed to start connection: {}", self.name, e);
                e
            })?;

        self.remote_server = Some(peer);
        self.state = ConnectionState::Connecting;
        self.awaiting_response = true;
        self.response_timeout = self.config.response_timeout;

        info!("Client {}: connecting to {}", self.name, address);
        Ok(())
    }

    /// Disconnects from the server
    ///
    /// With `wait_for_response` the session stays in
    /// [`ConnectionState::Disconnecting`] until the server confirms or the
    /// response timeout expires; otherwise it is disconnected right away.
    pub fn disconnect(&mut self, wait_for_response: bool) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Disconnected => {
                info!("Client {}: not connected", self.name);
                Err(ClientError::NotConnected(self.state))
            }
            ConnectionState::Connected => {
                if wait_for_response {
                    if let Some(peer) = self.remote_server {
                        self.transport.disconnect(peer);
                    }
                    self.state = ConnectionState::Disconnecting;
                    self.awaiting_response = true;
                    self.response_timeout = self.config.response_timeout;
                } else {
                    if let Some(peer) = self.remote_server.take() {
                        self.transport.disconnect_now(peer);
                    }
                    self.enter_disconnected();
                    info!("Client {}: disconnected from server", self.name);
                }
                Ok(())
            }
            state => {
                warn!(
                    "Client {}: requested disconnect, but is {}",
                    self.name, state
                );
                Err(ClientError::NotConnected(state))
            }
        }
    }

    /// Sends an application payload to the server
    pub fn send_payload(&mut self, tag: u8, body: &[u8]) -> Result<(), ClientError> {
        if tag == shared::message::GREETING_TAG {
            return Err(ClientError::ReservedTag(tag));
        }

        let peer = match (self.state, self.remote_server) {
            (ConnectionState::Connected, Some(peer)) => peer,
            (state, _) => return Err(ClientError::NotConnected(state)),
        };

        let message = Message::Payload {
            tag,
            body: body.to_vec(),
        };
        self.transport
            .send(peer, MESSAGE_CHANNEL, &message.encode())
            .map_err(ClientError::from)
    }

    /// One frame of work: drains transport events, then advances the
    /// response timeout by `frame_time`
    pub fn frame(&mut self, frame_time: Duration) {
        self.frame_time = frame_time;

        while let Some(event) = self.transport.poll() {
            self.handle_event(event);
        }

        self.advance_timeout(frame_time);
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect { peer } => {
                if self.state == ConnectionState::Connecting && self.remote_server == Some(peer) {
                    self.on_connected(peer);
                } else {
                    warn!(
                        "Client {}: received connect from {} while {}",
                        self.name, peer, self.state
                    );
                }
            }
            TransportEvent::Disconnect { peer } => {
                if self.remote_server != Some(peer) {
                    debug!("Client {}: ignoring disconnect of stale peer {}", self.name, peer);
                    return;
                }

                if self.state == ConnectionState::Disconnecting {
                    info!("Client {}: server confirmed disconnect", self.name);
                    self.enter_disconnected();
                } else {
                    // the transport has already released the peer
                    info!("Client {}: server told client to disconnect", self.name);
                    self.enter_disconnected();
                }
            }
            TransportEvent::Receive { peer, data, .. } => match Message::decode(&data) {
                Ok(Message::Payload { tag, body }) => {
                    self.handler.on_payload(&self.name, tag, &body);
                }
                Ok(Message::Greeting(name)) => {
                    warn!(
                        "Client {}: unexpected greeting ({}) from {}",
                        self.name, name, peer
                    );
                }
                Err(e) => warn!("Client {}: bad message from {}: {}", self.name, peer, e),
            },
        }
    }

    fn on_connected(&mut self, peer: PeerId) {
        match self.transport.peer_info(peer) {
            Some(info) => info!("Client {}: connected to {}", self.name, info.address),
            None => info!("Client {}: connected", self.name),
        }

        self.state = ConnectionState::Connected;
        self.awaiting_response = false;
        self.response_timeout = Duration::ZERO;

        // greeting registers us in the server roster
        let greeting = Message::greeting(&self.name).encode();
        if let Err(e) = self.transport.send(peer, MESSAGE_CHANNEL, &greeting) {
            error!("Client {}: failed to send greeting: {}", self.name, e);
        }
        self.transport.flush();
    }

    fn advance_timeout(&mut self, frame_time: Duration) {
        if !self.response_timeout.is_zero() {
            self.response_timeout = self.response_timeout.saturating_sub(frame_time);
        }

        if !self.awaiting_response || !self.response_timeout.is_zero() {
            return;
        }

        match self.state {
            ConnectionState::Connecting => {
                warn!("Client {}: failed to connect to server", self.name)
            }
            ConnectionState::Disconnecting => warn!(
                "Client {}: no disconnect from server, forcefully disconnecting",
                self.name
            ),
            state => debug!("Client {}: response timeout while {}", self.name, state),
        }

        if let Some(peer) = self.remote_server.take() {
            self.transport.reset(peer);
        }
        self.enter_disconnected();
    }

    fn enter_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.remote_server = None;
        self.awaiting_response = false;
        self.response_timeout = Duration::ZERO;
    }

    /// Marks the client as running on a service loop
    ///
    /// [`Client::launch`] does this itself; a foreground owner calls it before
    /// its first tick.
    pub fn start_running(&mut self) {
        self.lifecycle = Lifecycle::Running;
        self.quit_seen = false;
    }

    /// Marks the service loop as finished
    pub fn finish_running(&mut self) {
        self.lifecycle = Lifecycle::Shutdown;
        self.quit_seen = false;
        info!("Client {}: shut down", self.name);
    }

    fn begin_shutdown(&mut self) {
        self.lifecycle = Lifecycle::ShuttingDown;

        match self.state {
            ConnectionState::Connected => {
                let _ = self.disconnect(true);
            }
            ConnectionState::Connecting => {
                if let Some(peer) = self.remote_server.take() {
                    self.transport.reset(peer);
                }
                self.enter_disconnected();
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
        }
    }
}

impl<T: Transport> Service for Client<T> {
    fn service(&mut self, frame_time: Duration) {
        self.frame(frame_time);
    }

    /// A quit request first turns into a graceful disconnect; the loop only
    /// ends once no disconnect handshake is in flight
    fn keep_running(&mut self, quit_requested: bool) -> bool {
        if quit_requested && !self.quit_seen {
            self.quit_seen = true;
            self.begin_shutdown();
        }

        !(quit_requested && self.state != ConnectionState::Disconnecting)
    }
}
