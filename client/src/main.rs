use clap::Parser;
use client::{Client, ClientConfig, ClientThread, ConnectionState};
use log::{error, info, warn};
use shared::message::{TAG_BROADCAST_REQUEST, TAG_VALUE};
use shared::service::{Service, ServiceLoop};
use shared::shutdown::{shutdown_channel, ShutdownSignal};
use shared::{DemoPayload, Transport, SERVER_PORT, SERVICE_RATE};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Number of clients running on their own threads
    #[arg(short = 'b', long, default_value = "2")]
    background: usize,

    /// Service loop rate in ticks per second
    #[arg(short = 'r', long, default_value_t = SERVICE_RATE)]
    rate: u32,

    /// Seconds to wait for the server to answer a connect or disconnect
    #[arg(short = 't', long, default_value = "3.0")]
    response_timeout: f64,

    /// Send the demo payloads once the foreground client is connected
    #[arg(long)]
    demo: bool,
}

/// The client ticked by the main loop
struct Foreground<T: Transport> {
    client: Client<T>,
    send_demo: bool,
}

impl<T: Transport> Foreground<T> {
    fn send_demo_payloads(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let body = bincode::serialize(&DemoPayload { x: 7 })?;
        for tag in [TAG_VALUE, TAG_BROADCAST_REQUEST] {
            self.client.send_payload(tag, &body)?;
        }
        Ok(())
    }
}

impl<T: Transport> Service for Foreground<T> {
    fn service(&mut self, frame_time: Duration) {
        self.client.service(frame_time);

        if self.send_demo && self.client.state() == ConnectionState::Connected {
            self.send_demo = false;
            if let Err(e) = self.send_demo_payloads() {
                warn!("Failed to send demo payloads: {}", e);
            }
        }
    }

    fn keep_running(&mut self, quit_requested: bool) -> bool {
        self.client.keep_running(quit_requested)
    }
}

/// Timeout flag value in seconds; negative, NaN and oversized values are rejected
fn parse_timeout(seconds: f64) -> Result<Duration, std::time::TryFromFloatSecsError> {
    Duration::try_from_secs_f64(seconds)
}

/// Ticks the foreground client on the calling thread until it has shut down
fn run_foreground<T: Transport>(app: &mut Foreground<T>, rate: u32, signal: &mut ShutdownSignal) {
    app.client.start_running();
    ServiceLoop::new(rate).run(app, signal);
    app.client.finish_running();
    app.client.transport_mut().close();
}

fn join_background<T: Transport + 'static>(background: Vec<ClientThread<T>>) {
    for handle in &background {
        handle.request_shutdown();
    }

    for handle in background {
        let name = handle.name().clone();
        match handle.join() {
            Ok(mut client) => client.transport_mut().close(),
            Err(e) => error!("Client {} did not shut down cleanly: {}", name, e),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ClientConfig {
        port: args.port,
        service_rate: args.rate,
        response_timeout: parse_timeout(args.response_timeout)?,
        ..ClientConfig::default()
    };

    info!("Starting clients...");
    info!("Connecting to: {}:{}", args.host, config.port);

    let mut background = Vec::with_capacity(args.background);
    for index in 1..=args.background {
        let client = Client::initialize(&index.to_string(), config.clone())?;
        let handle = client.launch()?;
        handle.connect(&args.host)?;
        background.push(handle);
    }

    let mut foreground = Client::initialize("0", config.clone())?;
    if let Err(e) = foreground.connect(&args.host) {
        error!("Foreground client failed to connect: {}", e);
    }

    // the runtime only watches for Ctrl+C
    let (trigger, mut signal) = shutdown_channel();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        trigger.trigger();
    });

    info!("Press Ctrl+C to shut down");
    let mut app = Foreground {
        client: foreground,
        send_demo: args.demo,
    };
    run_foreground(&mut app, config.service_rate, &mut signal);

    join_background(background);

    info!("All clients shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::Lifecycle;
    use shared::loopback::LoopbackNetwork;
    use shared::ClientName;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(3.0).unwrap(), Duration::from_secs(3));
        assert_eq!(parse_timeout(0.25).unwrap(), Duration::from_millis(250));
        assert!(parse_timeout(f64::INFINITY).is_err());
        assert!(parse_timeout(f64::NAN).is_err());
        assert!(parse_timeout(1e30).is_err());
        assert!(parse_timeout(-1.0).is_err());
    }

    #[test]
    fn test_foreground_runs_on_calling_thread() {
        let network = LoopbackNetwork::new();
        let client = Client::with_transport(
            ClientName::new("0").unwrap(),
            network.open(None, 1, 2).unwrap(),
            ClientConfig::default(),
        );
        let mut app = Foreground {
            client,
            send_demo: true,
        };

        let (trigger, mut signal) = shutdown_channel();
        trigger.trigger();
        run_foreground(&mut app, 100, &mut signal);

        assert_eq!(app.client.lifecycle(), Lifecycle::Shutdown);
        assert_eq!(app.client.state(), ConnectionState::Disconnected);
        assert!(app.send_demo);
    }

    #[test]
    fn test_join_background_shuts_clients_down() {
        let network = LoopbackNetwork::new();
        let handle = Client::with_transport(
            ClientName::new("1").unwrap(),
            network.open(None, 1, 2).unwrap(),
            ClientConfig::default(),
        )
        .launch()
        .unwrap();
        let status = handle.subscribe();

        join_background(vec![handle]);
        assert_eq!(status.borrow().lifecycle, Lifecycle::Shutdown);
    }
}
