//! Frame pacing for service loops
//!
//! A [`FrameLimiter`] blocks the calling thread for whatever remains of the
//! target frame interval once the work of a frame is done. The wait is taken
//! against an absolute deadline on a private condition variable, so overhead
//! of the wait call itself does not accumulate as drift.
//!
//! A limiter belongs to the thread that drives the loop; it is not a rate
//! limiter shared between threads.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Highest frame rate a limiter will pace to
pub const MAX_FRAME_RATE: u32 = 200;

/// Returns the ideal frame interval for `target` frames per second
///
/// Targets outside `1..=MAX_FRAME_RATE` are forced to `MAX_FRAME_RATE`.
pub fn frame_interval(target: u32) -> Duration {
    let target = if (1..=MAX_FRAME_RATE).contains(&target) {
        target
    } else {
        MAX_FRAME_RATE
    };

    Duration::from_nanos(1_000_000_000 / u64::from(target))
}

/// Blocks out the remainder of each frame so a loop runs at a target rate
pub struct FrameLimiter {
    start_time: Instant,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl FrameLimiter {
    /// Creates a limiter whose first frame starts now
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    /// Marks the beginning of a frame
    pub fn start(&mut self) {
        self.start_time = Instant::now();
    }

    /// Blocks until the frame interval for `target` has elapsed since [`start`]
    ///
    /// Returns how long the thread was blocked. A frame that already used up
    /// its interval returns immediately with `Duration::ZERO`.
    ///
    /// [`start`]: FrameLimiter::start
    pub fn end(&mut self, target: u32) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.start_time);
        self.start_time = now;

        let remaining = match frame_interval(target).checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Duration::ZERO,
        };

        let deadline = now + remaining;
        self.block_until(deadline);

        now.elapsed()
    }

    fn block_until(&self, deadline: Instant) {
        // poisoned: plain sleep
        let mut guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(_) => {
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                return;
            }
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }

            guard = match self.wakeup.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return,
            };
        }
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new()
    }
}
