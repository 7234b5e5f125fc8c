//! Elapsed-time gate and stop flag shared by the replay drivers.

use embassy_time::{Duration, Instant};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Elapsed virtual time since a driver started playing its traces.
#[derive(Debug, Clone, Copy)]
pub struct TraceClock {
    started: Instant,
}

impl TraceClock {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time in seconds, the unit trace timestamps are recorded in.
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_micros() as f64 / 1_000_000.0
    }
}

/// Cooperative cancellation flag checked by every driver once per poll iteration.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
