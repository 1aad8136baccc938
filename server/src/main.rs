use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig};
use shared::{DEFAULT_MAX_CLIENTS, SERVER_PORT, SERVICE_RATE, SHUTDOWN_RATE};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Shutdown timeout flag in seconds; negative, NaN and oversized values are rejected
fn parse_timeout(seconds: f64) -> Result<Duration, std::time::TryFromFloatSecsError> {
    Duration::try_from_secs_f64(seconds)
}

/// Main-method of the application.
/// Parses command-line arguments, launches the server thread and waits for Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: IpAddr,
        /// Port to listen on
        #[clap(short, long, default_value_t = SERVER_PORT)]
        port: u16,
        /// Roster capacity
        #[clap(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
        max_clients: usize,
        /// Service loop rate in ticks per second
        #[clap(short, long, default_value_t = SERVICE_RATE)]
        rate: u32,
        /// Seconds clients get to confirm a shutdown disconnect
        #[clap(short, long, default_value = "3.0")]
        shutdown_timeout: f64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig {
        bind: SocketAddr::new(args.host, args.port),
        max_clients: args.max_clients,
        service_rate: args.rate,
        shutdown_rate: SHUTDOWN_RATE,
        shutdown_timeout: parse_timeout(args.shutdown_timeout)?,
        ..ServerConfig::default()
    };

    info!("Starting server...");
    let handle = Server::open(config)?.launch()?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");

    let join = tokio::task::spawn_blocking(move || handle.join());
    match join.await? {
        Ok(server) => {
            if let Some(report) = server.teardown_report() {
                info!(
                    "Teardown took {:.2}s: {} confirmed, {} reset",
                    report.elapsed.as_secs_f64(),
                    report.confirmed,
                    report.forced
                );
            }
        }
        Err(e) => error!("Server did not shut down cleanly: {}", e),
    }

    Ok(())
}
