//! One-shot cancellation for service loops
//!
//! A controller holds the [`ShutdownTrigger`]; the loop thread holds the
//! [`ShutdownSignal`] and samples it once per tick. Once triggered the signal
//! stays set. A fresh pair is created for every launch.

use tokio::sync::watch;

/// Creates a connected trigger/signal pair in the "not requested" state
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx, last_seen: false })
}

/// Controller side of the shutdown request
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Requests shutdown; later calls are no-ops
    pub fn trigger(&self) {
        self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Loop side of the shutdown request
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    last_seen: bool,
}

impl ShutdownSignal {
    /// Samples the request, remembering the result
    ///
    /// A dropped trigger counts as a shutdown request so a loop can never
    /// outlive its controller unnoticed.
    pub fn poll(&mut self) -> bool {
        if self.last_seen {
            return true;
        }

        self.last_seen = match self.rx.has_changed() {
            Ok(true) => *self.rx.borrow_and_update(),
            Ok(false) => *self.rx.borrow(),
            Err(_) => true,
        };

        self.last_seen
    }

    /// The most recently sampled value, without touching the channel
    pub fn last_seen(&self) -> bool {
        self.last_seen
    }
}
