//! Rate-limited service loop driver
//!
//! Both lifecycles run the same tick: start the frame limiter, let the owner
//! drain transport events and advance its timers by the measured frame time,
//! sample the shutdown signal, then pace out the rest of the frame. A
//! foreground owner can skip this driver entirely and call
//! [`Service::service`] once per host-application frame instead.

use crate::frame_limiter::FrameLimiter;
use crate::shutdown::ShutdownSignal;
use std::time::{Duration, Instant};

/// Something that can be serviced once per loop tick
pub trait Service {
    /// Drains pending transport events and advances timers by `frame_time`
    fn service(&mut self, frame_time: Duration);

    /// Sees the sampled shutdown request; returning `false` ends the loop
    fn keep_running(&mut self, quit_requested: bool) -> bool;
}

/// Measures the time between consecutive laps
#[derive(Debug, Clone, Copy)]
pub struct LapTimer {
    last: Instant,
}

impl LapTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Time since the previous lap (or since creation)
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed
    }
}

impl Default for LapTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`Service`] one paced tick at a time
pub struct ServiceLoop {
    limiter: FrameLimiter,
    timer: LapTimer,
    target_rate: u32,
    ticks: u64,
}

impl ServiceLoop {
    /// Creates a loop paced to `target_rate` ticks per second
    pub fn new(target_rate: u32) -> Self {
        Self {
            limiter: FrameLimiter::new(),
            timer: LapTimer::new(),
            target_rate,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs a single tick; returns whether the loop should continue
    pub fn tick<S: Service + ?Sized>(&mut self, service: &mut S, signal: &mut ShutdownSignal) -> bool {
        self.limiter.start();

        let frame_time = self.timer.lap();
        service.service(frame_time);

        let quit_requested = signal.poll();
        let keep_running = service.keep_running(quit_requested);

        self.limiter.end(self.target_rate);
        self.ticks += 1;

        keep_running
    }

    /// Ticks until the service asks to stop
    pub fn run<S: Service + ?Sized>(&mut self, service: &mut S, signal: &mut ShutdownSignal) {
        while self.tick(service, signal) {}
    }
}
