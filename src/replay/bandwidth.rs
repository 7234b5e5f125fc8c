//! Bandwidth trace replay.
//!
//! Each due `(timestamp, bandwidth)` pair is pushed to the shaper with loss,
//! latency and delay held at zero. At most one pair per node is applied per
//! poll. A node stops being replayed as soon as a single pair is left after an
//! application: that last pair marks the end of the capture and is never
//! applied.

use std::sync::Arc;

use crate::collaborators::{LinkParams, LinkShaper};
use crate::types::{NodeRef, lock};

use super::driver::{DriverKind, ReplayDriver};

/// Shaped interface.
const INTERFACE: usize = 0;

/// Replays recorded bandwidth samples through the shaping collaborator.
pub struct BandwidthReplay {
    working_set: Vec<NodeRef>,
    shaper: Arc<dyn LinkShaper>,
}

impl BandwidthReplay {
    pub fn new(stations: &[NodeRef], shaper: Arc<dyn LinkShaper>) -> Self {
        let working_set = stations.iter().filter(|node| !lock(node).bandwidth_trace.is_empty()).cloned().collect();
        Self { working_set, shaper }
    }
}

impl ReplayDriver for BandwidthReplay {
    fn kind(&self) -> DriverKind {
        DriverKind::Bandwidth
    }

    fn poll(&mut self, elapsed: f64) -> usize {
        let shaper = &self.shaper;
        let mut applied = 0;

        self.working_set.retain(|node| {
            let (sample, remaining) = {
                let mut guard = lock(node);
                match guard.bandwidth_trace.front() {
                    None => return false,
                    Some(next) if elapsed < next.timestamp => return true,
                    Some(_) => {}
                }
                let Some(sample) = guard.bandwidth_trace.pop_front() else {
                    debug_assert!(false, "bandwidth trace of {} emptied while locked", guard.name);
                    return false;
                };
                log::debug!("{}: bandwidth {} Mbit/s at t={:.3}s", guard.name, sample.value, sample.timestamp);
                (sample, guard.bandwidth_trace.len())
            };

            if let Err(err) = shaper.apply(node, INTERFACE, &LinkParams::bandwidth_only(sample.value)) {
                log::warn!("Applying bandwidth {} Mbit/s failed: {}", sample.value, err);
            }
            applied += 1;

            remaining > 1
        });

        applied
    }

    fn active_nodes(&self) -> usize {
        self.working_set.len()
    }
}
