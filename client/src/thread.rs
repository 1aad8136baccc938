//! Background clients
//!
//! [`Client::launch`] moves a client onto its own OS thread running a
//! [`ServiceLoop`]. The returned [`ClientThread`] is the only way to reach it
//! afterwards: requests go in through a command queue drained at the start of
//! every tick, and the loop publishes a [`ClientStatus`] snapshot at the end of
//! every tick.

use crate::error::ClientError;
use crate::network::{Client, ClientStatus, ConnectionState};
use log::{error, info, warn};
use shared::service::{Service, ServiceLoop};
use shared::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use shared::{ClientName, Transport};
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

/// Requests queued for a background client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Connect(String),
    Disconnect { wait_for_response: bool },
    SendPayload { tag: u8, body: Vec<u8> },
}

/// A launch that never got its thread; the client is handed back untouched
pub struct LaunchFailure<T: Transport> {
    pub client: Client<T>,
    pub error: ClientError,
}

impl<T: Transport> fmt::Debug for LaunchFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchFailure")
            .field("client", self.client.name())
            .field("error", &self.error)
            .finish()
    }
}

impl<T: Transport> fmt::Display for LaunchFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to launch client {}: {}", self.client.name(), self.error)
    }
}

impl<T: Transport> std::error::Error for LaunchFailure<T> {}

/// Handle to a client running on its own thread
pub struct ClientThread<T: Transport + 'static> {
    name: ClientName,
    commands: mpsc::UnboundedSender<ClientCommand>,
    status: watch::Receiver<ClientStatus>,
    trigger: ShutdownTrigger,
    handle: JoinHandle<Option<Client<T>>>,
}

impl<T: Transport + 'static> Client<T> {
    /// Runs this client on a dedicated thread until shutdown is requested
    pub fn launch(mut self) -> Result<ClientThread<T>, LaunchFailure<T>> {
        let name = self.name().clone();
        let service_rate = self.config().service_rate;

        self.start_running();
        let (status_tx, status_rx) = watch::channel(self.status());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (trigger, signal) = shutdown_channel();
        let (client_tx, client_rx) = oneshot::channel::<Client<T>>();

        let spawned = thread::Builder::new()
            .name(format!("client-{}", name))
            .spawn(move || {
                let client = client_rx.blocking_recv().ok()?;
                Some(run(client, service_rate, command_rx, status_tx, signal))
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to create thread for client {}: {}", name, e);
                self.finish_running();
                return Err(LaunchFailure {
                    client: self,
                    error: ClientError::ThreadSpawn(e),
                });
            }
        };

        if let Err(mut client) = client_tx.send(self) {
            // The thread died before it could take the client
            let _ = handle.join();
            client.finish_running();
            return Err(LaunchFailure {
                client,
                error: ClientError::ThreadGone,
            });
        }

        info!("Client {} launched", name);
        Ok(ClientThread {
            name,
            commands: command_tx,
            status: status_rx,
            trigger,
            handle,
        })
    }
}

fn run<T: Transport>(
    mut client: Client<T>,
    service_rate: u32,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    status: watch::Sender<ClientStatus>,
    mut signal: ShutdownSignal,
) -> Client<T> {
    let mut service_loop = ServiceLoop::new(service_rate);
    {
        let mut runner = Runner {
            client: &mut client,
            commands,
            status: &status,
        };
        service_loop.run(&mut runner, &mut signal);
    }

    client.finish_running();
    status.send_replace(client.status());
    client
}

/// Glues the command queue and status snapshots onto a client's own ticks
struct Runner<'a, T: Transport> {
    client: &'a mut Client<T>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    status: &'a watch::Sender<ClientStatus>,
}

impl<T: Transport> Runner<'_, T> {
    fn apply(&mut self, command: ClientCommand) {
        // Failures are already logged by the client
        let _ = match command {
            ClientCommand::Connect(host) => self.client.connect(&host),
            ClientCommand::Disconnect { wait_for_response } => {
                self.client.disconnect(wait_for_response)
            }
            ClientCommand::SendPayload { tag, body } => {
                self.client.send_payload(tag, &body).map_err(|e| {
                    warn!("Client {}: failed to send payload: {}", self.client.name(), e);
                    e
                })
            }
        };
    }

    fn publish(&self) {
        self.status.send_replace(self.client.status());
    }
}

impl<T: Transport> Service for Runner<'_, T> {
    fn service(&mut self, frame_time: Duration) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        self.client.service(frame_time);
    }

    fn keep_running(&mut self, quit_requested: bool) -> bool {
        let keep_running = self.client.keep_running(quit_requested);
        self.publish();
        keep_running
    }
}

impl<T: Transport + 'static> ClientThread<T> {
    pub fn name(&self) -> &ClientName {
        &self.name
    }

    /// The snapshot published at the end of the last tick
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// A receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Blocks until a published snapshot satisfies `condition` or `timeout`
    /// passes; returns whether it was satisfied
    pub fn wait_for(&self, timeout: Duration, condition: impl Fn(&ClientStatus) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition(&*self.status.borrow()) {
                return true;
            }
            if Instant::now() >= deadline || self.is_finished() {
                return condition(&*self.status.borrow());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Queues a connect; the outcome shows up in [`ClientThread::status`]
    pub fn connect(&self, host: &str) -> Result<(), ClientError> {
        self.send(ClientCommand::Connect(host.to_string()))
    }

    pub fn disconnect(&self, wait_for_response: bool) -> Result<(), ClientError> {
        self.send(ClientCommand::Disconnect { wait_for_response })
    }

    pub fn send_payload(&self, tag: u8, body: Vec<u8>) -> Result<(), ClientError> {
        self.send(ClientCommand::SendPayload { tag, body })
    }

    fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::ThreadGone)
    }

    /// Asks the loop to stop; a connected client disconnects first
    pub fn request_shutdown(&self) {
        if !self.trigger.is_triggered() {
            info!("Client {}: shutdown requested", self.name);
        }
        self.trigger.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Requests shutdown and waits for the thread, handing the client back
    pub fn join(self) -> Result<Client<T>, ClientError> {
        self.request_shutdown();

        match self.handle.join() {
            Ok(Some(client)) => Ok(client),
            Ok(None) => Err(ClientError::ThreadGone),
            Err(_) => {
                error!("Client {} thread panicked", self.name);
                Err(ClientError::ThreadPanicked)
            }
        }
    }
}
