//! Position trace replay.
//!
//! Every station with a recorded position queue moves to its next queued
//! position once per `1 / speed` seconds. A station whose queue runs dry leaves
//! the working set for good. After a poll moves a station, the registry
//! recomputes which access points cover it.

use std::sync::Arc;

use crate::collaborators::{NodeRegistry, Visualizer, visualize};
use crate::error::ReplayError;
use crate::types::{NodeRef, lock};

use super::driver::{DriverKind, ReplayDriver};

struct PositionTrack {
    node: NodeRef,
    /// Seconds between consecutive positions.
    step: f64,
    /// Elapsed time at which the next queued position is due.
    next_due: f64,
}

/// Replays recorded position queues in real time.
pub struct PositionReplay {
    working_set: Vec<PositionTrack>,
    registry: Arc<dyn NodeRegistry>,
    visualizer: Option<Arc<dyn Visualizer>>,
}

impl PositionReplay {
    /// Build the working set from the stations that still have positions queued.
    ///
    /// # Errors
    ///
    /// [`ReplayError::InvalidSpeed`] if such a station has a speed that is not
    /// finite and strictly positive.
    pub fn new(stations: &[NodeRef], registry: Arc<dyn NodeRegistry>, visualizer: Option<Arc<dyn Visualizer>>) -> Result<Self, ReplayError> {
        let mut working_set = Vec::new();
        for node in stations {
            let guard = lock(node);
            if guard.position_trace.is_empty() {
                continue;
            }
            if !guard.speed.is_finite() || guard.speed <= 0.0 {
                return Err(ReplayError::InvalidSpeed {
                    node: guard.name.clone(),
                    speed: guard.speed,
                });
            }
            let step = 1.0 / guard.speed;
            working_set.push(PositionTrack {
                node: node.clone(),
                step,
                next_due: step,
            });
        }
        Ok(Self {
            working_set,
            registry,
            visualizer,
        })
    }
}

impl ReplayDriver for PositionReplay {
    fn kind(&self) -> DriverKind {
        DriverKind::Position
    }

    fn poll(&mut self, elapsed: f64) -> usize {
        let visualizer = self.visualizer.as_ref();
        let mut applied = 0;
        let mut moved = Vec::new();

        self.working_set.retain_mut(|track| {
            let mut node = lock(&track.node);
            let before = applied;
            while elapsed >= track.next_due {
                let Some(position) = node.position_trace.pop_front() else {
                    break;
                };
                node.move_to(position);
                visualize(visualizer, &node);
                log::debug!("{} moved to {}", node.name, position);
                track.next_due += track.step;
                applied += 1;
            }
            if applied > before {
                moved.push(track.node.clone());
            }
            !node.position_trace.is_empty()
        });

        // Node locks are released; range updates lock the station and access points themselves.
        for node in &moved {
            self.registry.update_aps_in_range(node);
        }

        applied
    }

    fn active_nodes(&self) -> usize {
        self.working_set.len()
    }
}
