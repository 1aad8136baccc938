//! Timing checks for frame pacing and shutdown latency
//!
//! Bounds are loose on the upper side since CI machines oversleep; the lower
//! bounds are what the pacing actually guarantees.

use client::{Client, ClientConfig, ConnectionState};
use server::{Server, ServerConfig};
use shared::frame_limiter::{frame_interval, FrameLimiter};
use shared::loopback::LoopbackNetwork;
use shared::service::{Service, ServiceLoop};
use shared::shutdown::shutdown_channel;
use shared::ClientName;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Ticks a fixed number of frames, doing no work
struct Frames {
    remaining: u32,
    frame_times: Vec<Duration>,
}

impl Service for Frames {
    fn service(&mut self, frame_time: Duration) {
        self.frame_times.push(frame_time);
        self.remaining = self.remaining.saturating_sub(1);
    }

    fn keep_running(&mut self, _quit_requested: bool) -> bool {
        self.remaining > 0
    }
}

/// Paces 50 frames at 100 Hz
#[test]
fn limiter_paces_to_target_rate() {
    let mut limiter = FrameLimiter::new();
    let frames = 50;
    let start = Instant::now();

    for _ in 0..frames {
        limiter.start();
        limiter.end(100);
    }

    let duration = start.elapsed();
    println!(
        "Limiter: {} frames in {:?} ({:.2} ms/frame)",
        frames,
        duration,
        duration.as_secs_f64() * 1000.0 / frames as f64
    );

    assert!(duration >= Duration::from_millis(490));
    assert!(duration < Duration::from_millis(1500));
}

/// A zero rate is treated as the maximum rate
#[test]
fn limiter_clamps_out_of_range_rate() {
    assert_eq!(frame_interval(0), Duration::from_millis(5));
    assert_eq!(frame_interval(1000), Duration::from_millis(5));

    let mut limiter = FrameLimiter::new();
    let start = Instant::now();
    for _ in 0..20 {
        limiter.start();
        limiter.end(0);
    }

    let duration = start.elapsed();
    assert!(duration >= Duration::from_millis(95));
    assert!(duration < Duration::from_millis(600));
}

/// A frame that overran its interval is not padded further
#[test]
fn limiter_skips_wait_after_overrun() {
    let mut limiter = FrameLimiter::new();
    limiter.start();
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(limiter.end(100), Duration::ZERO);
}

/// Frame times reported to a service track the loop's pacing
#[test]
fn service_loop_reports_frame_times() {
    let (_trigger, mut signal) = shutdown_channel();
    let mut frames = Frames {
        remaining: 20,
        frame_times: Vec::new(),
    };

    let mut service_loop = ServiceLoop::new(50);
    service_loop.run(&mut frames, &mut signal);
    assert_eq!(service_loop.ticks(), 20);

    let paced: Duration = frames.frame_times.iter().skip(1).sum();
    println!("Service loop: 19 paced frames took {:?}", paced);
    assert!(paced >= Duration::from_millis(19 * 20 - 5));
    assert!(paced < Duration::from_millis(19 * 20 * 3));
}

/// An empty server shuts down within a couple of shutdown-rate ticks
#[test]
fn empty_server_shutdown_latency() {
    let network = LoopbackNetwork::new();
    let config = ServerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 2345)),
        ..ServerConfig::default()
    };
    let host = network
        .open(Some(config.bind), config.max_clients, config.channel_count)
        .unwrap();
    let thread = Server::with_transport(host, config).launch().unwrap();

    let start = Instant::now();
    let server = thread.join().unwrap();
    let duration = start.elapsed();

    println!("Empty server shutdown took {:?}", duration);
    assert!(duration < Duration::from_millis(500));
    assert!(server.is_closed());
}

/// A server whose client never answers gives up at its shutdown timeout
#[test]
fn forced_shutdown_latency() {
    let network = LoopbackNetwork::new();
    let config = ServerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 2345)),
        shutdown_timeout: Duration::from_millis(500),
        ..ServerConfig::default()
    };
    let bind = config.bind;
    let host = network
        .open(Some(bind), config.max_clients, config.channel_count)
        .unwrap();
    let thread = Server::with_transport(host, config).launch().unwrap();

    let client_config = ClientConfig::default();
    let client = Client::with_transport(
        ClientName::new("quiet").unwrap(),
        network.open(None, 1, client_config.channel_count).unwrap(),
        client_config,
    )
    .launch()
    .unwrap();
    client.connect("127.0.0.1").unwrap();
    assert!(thread.wait_for(Duration::from_secs(3), |status| status.client_count == 1));

    network.mute(bind);
    let start = Instant::now();
    let server = thread.join().unwrap();
    let duration = start.elapsed();

    println!("Forced shutdown took {:?}", duration);
    let report = server.teardown_report().unwrap();
    assert_eq!(report.forced, 1);
    // one shutdown tick of slack at 10 Hz
    assert!(duration >= Duration::from_millis(400));
    assert!(duration < Duration::from_millis(1500));

    network.unmute(bind);
    let client = client.join().unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

/// A connect that nobody answers is abandoned after the response timeout
#[test]
fn connect_timeout_latency() {
    let network = LoopbackNetwork::new();
    let config = ClientConfig {
        response_timeout: Duration::from_millis(250),
        ..ClientConfig::default()
    };
    let client = Client::with_transport(
        ClientName::new("alone").unwrap(),
        network.open(None, 1, config.channel_count).unwrap(),
        config,
    )
    .launch()
    .unwrap();

    let start = Instant::now();
    client.connect("127.0.0.1").unwrap();
    assert!(client.wait_for(Duration::from_secs(3), |status| {
        status.state == ConnectionState::Connecting
    }));
    assert!(client.wait_for(Duration::from_secs(3), |status| {
        status.state == ConnectionState::Disconnected
    }));
    let duration = start.elapsed();

    println!("Connect timeout took {:?}", duration);
    assert!(duration >= Duration::from_millis(230));
    assert!(duration < Duration::from_millis(1000));

    client.join().unwrap();
}
