//! Poll loop shared by the three replay drivers.
//!
//! Each iteration:
//! 1) Check the stop token.
//! 2) Read the driver's trace clock and let it apply every event that is due.
//! 3) Sleep for the poll interval.
//!
//! Events therefore fire at most one poll interval late; a driver that falls
//! further behind catches up in its next `poll`.

use embassy_time::{Duration, Timer};
use std::fmt;

use super::clock::{StopToken, TraceClock};

/// Which trace a driver replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Position,
    Bandwidth,
    Rssi,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Position => write!(f, "position"),
            DriverKind::Bandwidth => write!(f, "bandwidth"),
            DriverKind::Rssi => write!(f, "rssi"),
        }
    }
}

/// How a driver's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    /// Every node's trace was exhausted.
    Completed,
    /// The stop token fired first.
    Stopped,
    /// The driver thread panicked.
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub kind: DriverKind,
    pub outcome: DriverOutcome,
    pub events_applied: usize,
}

/// A trace-playback state machine advanced by elapsed time.
pub trait ReplayDriver: Send + 'static {
    fn kind(&self) -> DriverKind;

    /// Apply every event due at `elapsed` seconds. Returns the number of events consumed.
    fn poll(&mut self, elapsed: f64) -> usize;

    /// Number of nodes still holding pending events.
    fn active_nodes(&self) -> usize;

    fn is_finished(&self) -> bool {
        self.active_nodes() == 0
    }
}

/// Run `driver` until its working set empties or `stop` fires.
pub async fn drive<D: ReplayDriver>(mut driver: D, stop: StopToken, poll_interval: Duration) -> DriverReport {
    let kind = driver.kind();
    let clock = TraceClock::start();
    let mut events_applied = 0;

    log::info!("Replaying {} traces for {} nodes", kind, driver.active_nodes());

    while !driver.is_finished() {
        if stop.is_stopped() {
            log::info!("Replaying {} traces stopped after {} events", kind, events_applied);
            return DriverReport {
                kind,
                outcome: DriverOutcome::Stopped,
                events_applied,
            };
        }
        events_applied += driver.poll(clock.elapsed_secs());
        Timer::after(poll_interval).await;
    }

    log::info!("Replaying {} traces finished: {} events applied", kind, events_applied);
    DriverReport {
        kind,
        outcome: DriverOutcome::Completed,
        events_applied,
    }
}
