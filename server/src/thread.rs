//! Running a server on its own thread

use crate::error::ServerError;
use crate::network::{Server, ServerState, ServerStatus, TeardownService};
use log::{error, info, warn};
use shared::service::{Service, ServiceLoop};
use shared::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use shared::Transport;
use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

/// Requests queued for a running server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    SendToOne { slot: usize, tag: u8, body: Vec<u8> },
    Broadcast { tag: u8, body: Vec<u8> },
}

/// A launch that never got its thread; the server is handed back shut down
pub struct LaunchFailure<T: Transport> {
    pub server: Server<T>,
    pub error: ServerError,
}

impl<T: Transport> fmt::Debug for LaunchFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchFailure")
            .field("state", &self.server.state())
            .field("error", &self.error)
            .finish()
    }
}

impl<T: Transport> fmt::Display for LaunchFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to launch server: {}", self.error)
    }
}

impl<T: Transport> std::error::Error for LaunchFailure<T> {}

/// Handle to a server running on its own thread
pub struct ServerThread<T: Transport + 'static> {
    commands: mpsc::UnboundedSender<ServerCommand>,
    status: watch::Receiver<ServerStatus>,
    trigger: ShutdownTrigger,
    handle: JoinHandle<Option<Server<T>>>,
}

impl<T: Transport + 'static> Server<T> {
    /// Starts the server loop on a dedicated thread
    pub fn launch(mut self) -> Result<ServerThread<T>, LaunchFailure<T>> {
        if let Err(error) = self.start() {
            return Err(LaunchFailure {
                server: self,
                error,
            });
        }

        let service_rate = self.config().service_rate;
        let shutdown_rate = self.config().shutdown_rate;
        let (status_tx, status_rx) = watch::channel(self.status());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (trigger, signal) = shutdown_channel();
        let (server_tx, server_rx) = oneshot::channel::<Server<T>>();

        let spawned = thread::Builder::new()
            .name("server".to_string())
            .spawn(move || {
                let server = server_rx.blocking_recv().ok()?;
                Some(run(
                    server,
                    service_rate,
                    shutdown_rate,
                    command_rx,
                    status_tx,
                    signal,
                ))
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Server thread error: {}", e);
                self.stop();
                return Err(LaunchFailure {
                    server: self,
                    error: ServerError::ThreadSpawn(e),
                });
            }
        };

        if let Err(mut server) = server_tx.send(self) {
            let _ = handle.join();
            server.stop();
            return Err(LaunchFailure {
                server,
                error: ServerError::ThreadGone,
            });
        }

        Ok(ServerThread {
            commands: command_tx,
            status: status_rx,
            trigger,
            handle,
        })
    }
}

fn run<T: Transport>(
    mut server: Server<T>,
    service_rate: u32,
    shutdown_rate: u32,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
    status: watch::Sender<ServerStatus>,
    mut signal: ShutdownSignal,
) -> Server<T> {
    info!("Server loop started");

    {
        let mut runner = Runner {
            server: &mut server,
            commands,
            status: &status,
        };
        ServiceLoop::new(service_rate).run(&mut runner, &mut signal);
    }

    if server.begin_shutdown() {
        status.send_replace(server.status());
        let mut teardown = TeardownService {
            server: &mut server,
        };
        ServiceLoop::new(shutdown_rate).run(&mut teardown, &mut signal);
    }

    server.finish_shutdown();
    status.send_replace(server.status());
    server
}

struct Runner<'a, T: Transport> {
    server: &'a mut Server<T>,
    commands: mpsc::UnboundedReceiver<ServerCommand>,
    status: &'a watch::Sender<ServerStatus>,
}

impl<T: Transport> Service for Runner<'_, T> {
    fn service(&mut self, frame_time: Duration) {
        while let Ok(command) = self.commands.try_recv() {
            let result = match command {
                ServerCommand::SendToOne { slot, tag, body } => {
                    self.server.send_to_one(slot, tag, &body)
                }
                ServerCommand::Broadcast { tag, body } => self.server.broadcast(tag, &body),
            };
            if let Err(e) = result {
                warn!("Server command failed: {}", e);
            }
        }

        self.server.service(frame_time);
    }

    fn keep_running(&mut self, quit_requested: bool) -> bool {
        self.status.send_replace(self.server.status());
        self.server.keep_running(quit_requested)
    }
}

impl<T: Transport + 'static> ServerThread<T> {
    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ServerState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.clone()
    }

    /// Blocks until a published snapshot satisfies `condition` or `timeout`
    /// passes; returns whether it was satisfied
    pub fn wait_for(&self, timeout: Duration, condition: impl Fn(&ServerStatus) -> bool) -> bool {
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

    pub fn send_to_one(&self, slot: usize, tag: u8, body: Vec<u8>) -> Result<(), ServerError> {
        self.send(ServerCommand::SendToOne { slot, tag, body })
    }

    pub fn broadcast(&self, tag: u8, body: Vec<u8>) -> Result<(), ServerError> {
        self.send(ServerCommand::Broadcast { tag, body })
    }

    fn send(&self, command: ServerCommand) -> Result<(), ServerError> {
        self.commands
            .send(command)
            .map_err(|_| ServerError::ThreadGone)
    }

    /// Asks the server to shut down at its next tick boundary
    pub fn request_shutdown(&self) {
        if !self.trigger.is_triggered() {
            info!("Server shutdown requested");
        }
        self.trigger.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Requests shutdown and waits until teardown has completed
    pub fn join(self) -> Result<Server<T>, ServerError> {
        self.request_shutdown();

        match self.handle.join() {
            Ok(Some(server)) => Ok(server),
            Ok(None) => Err(ServerError::ThreadGone),
            Err(_) => {
                error!("Server thread panicked");
                Err(ServerError::ThreadPanicked)
            }
        }
    }
}
