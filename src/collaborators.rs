//! Boundaries between the replay engine and the framework embedding it.
//!
//! The engine never owns nodes, never touches a network interface and never
//! draws anything. It reaches those concerns only through the traits here:
//! - `NodeRegistry`: candidate nodes and access point range recomputation
//! - `LinkShaper`: applies bandwidth/loss/latency/delay to a node's link
//! - `Visualizer`: best-effort display updates
//!
//! `LogShaper` and `ChannelVisualizer` are the implementations used by the binary.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use std::sync::Arc;

use crate::types::{Node, NodeRef, Position, lock};

/// Source of the nodes a replay runs against.
pub trait NodeRegistry: Send + Sync {
    /// Snapshot of the candidate nodes. Drivers derive their private working sets from it once.
    fn stations(&self) -> Vec<NodeRef>;

    /// Re-resolve which access points cover `node` after its position changed.
    ///
    /// Called without any node lock held.
    fn update_aps_in_range(&self, node: &NodeRef);
}

/// Link impairment parameters applied in one shaping call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkParams {
    /// Mbit/s.
    pub bandwidth: f64,
    /// Percent.
    pub loss: f64,
    /// Milliseconds.
    pub latency: f64,
    /// Milliseconds.
    pub delay: f64,
}

impl LinkParams {
    /// Bandwidth-only update, as issued by bandwidth replay.
    pub fn bandwidth_only(bandwidth: f64) -> Self {
        Self {
            bandwidth,
            ..Self::default()
        }
    }
}

/// Applies link parameters to a node's simulated interface.
pub trait LinkShaper: Send + Sync {
    /// Apply all four parameters atomically. Called without the node's lock held.
    fn apply(&self, node: &NodeRef, interface: usize, params: &LinkParams) -> anyhow::Result<()>;
}

/// Display side effect invoked after a node moves.
pub trait Visualizer: Send + Sync {
    /// Called with the node locked; implementations must not lock it again.
    ///
    /// A returned error is logged and dropped. A panic is not caught: it ends
    /// the calling driver, which then reports `DriverOutcome::Panicked`.
    fn update(&self, node: &Node) -> anyhow::Result<()>;
}

/// Forward a node to the visualizer, swallowing any failure.
pub(crate) fn visualize(visualizer: Option<&Arc<dyn Visualizer>>, node: &Node) {
    if let Some(visualizer) = visualizer {
        if let Err(err) = visualizer.update(node) {
            log::trace!("Visual update for {} dropped: {}", node.name, err);
        }
    }
}

/// Shaper that only records the requested parameters in the log.
pub struct LogShaper;

impl LinkShaper for LogShaper {
    fn apply(&self, node: &NodeRef, interface: usize, params: &LinkParams) -> anyhow::Result<()> {
        let name = lock(node).name.clone();
        log::info!(
            "{}-wlan{}: rate {:.3} Mbit/s, loss {:.3}%, latency {:.3} ms, delay {:.3} ms",
            name,
            interface,
            params.bandwidth,
            params.loss,
            params.latency,
            params.delay
        );
        Ok(())
    }
}

/// Position change published for a display layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub name: String,
    pub position: Position,
    pub rssi: f64,
}

/// Depth of the visual update channel. When the consumer falls behind, new updates are dropped.
pub const VISUAL_UPDATE_QUEUE_SIZE: usize = 256;
pub type VisualUpdateQueue = Channel<CriticalSectionRawMutex, NodeUpdate, VISUAL_UPDATE_QUEUE_SIZE>;

/// Visualizer that publishes node updates into a bounded channel.
pub struct ChannelVisualizer {
    queue: Arc<VisualUpdateQueue>,
}

impl ChannelVisualizer {
    pub fn new(queue: Arc<VisualUpdateQueue>) -> Self {
        Self { queue }
    }
}

impl Visualizer for ChannelVisualizer {
    fn update(&self, node: &Node) -> anyhow::Result<()> {
        let update = NodeUpdate {
            name: node.name.clone(),
            position: node.position,
            rssi: node.radio(0).map(|r| r.rssi).unwrap_or_default(),
        };
        self.queue
            .try_send(update)
            .map_err(|_| anyhow::anyhow!("visual update queue full ({} entries)", VISUAL_UPDATE_QUEUE_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    #[test]
    fn channel_visualizer_reports_full_queue() {
        let queue = Arc::new(VisualUpdateQueue::new());
        let visualizer = ChannelVisualizer::new(queue.clone());
        let mut node = Node::new("sta1", NodeKind::Station);
        for i in 0..VISUAL_UPDATE_QUEUE_SIZE {
            node.move_to(Position::new(i as f64, 0.0, 0.0));
            visualizer.update(&node).unwrap();
        }
        assert!(visualizer.update(&node).is_err());

        let first = queue.try_receive().unwrap();
        assert_eq!(first.name, "sta1");
        assert_eq!(first.position, Position::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn visualize_swallows_failures() {
        struct Broken;
        impl Visualizer for Broken {
            fn update(&self, _node: &Node) -> anyhow::Result<()> {
                anyhow::bail!("display gone")
            }
        }
        let visualizer: Arc<dyn Visualizer> = Arc::new(Broken);
        visualize(Some(&visualizer), &Node::new("sta1", NodeKind::Station));
        visualize(None, &Node::new("sta2", NodeKind::Station));
    }
}
