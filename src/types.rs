//! Node state shared between the registry and the replay drivers.
//!
//! Contains:
//! - Node records (stations and access points) with their trace queues
//! - Per-interface radio parameters
//! - Positions and timestamped trace samples
//! - The shared `NodeRef` handle and its lock helper

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Shared, lockable handle to a node owned by the registry.
pub type NodeRef = Arc<Mutex<Node>>;

/// Lock a node, recovering the data if another driver panicked while holding it.
pub fn lock(node: &NodeRef) -> MutexGuard<'_, Node> {
    node.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Position in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in metres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Drop the fractional part of every coordinate.
    pub fn truncated(&self) -> Position {
        Position::new(self.x.trunc(), self.y.trunc(), self.z.trunc())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// One recorded `(timestamp, value)` pair. Timestamps are seconds since replay start.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TraceSample {
    pub timestamp: f64,
    pub value: f64,
}

impl TraceSample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Station,
    AccessPoint,
}

/// Parameters of a single radio interface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RadioParams {
    /// Transmit power in dBm.
    #[serde(default = "default_tx_power")]
    pub tx_power: f64,
    /// Antenna gain in dBi.
    #[serde(default = "default_antenna_gain")]
    pub antenna_gain: f64,
    /// Operating frequency in GHz.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    /// IEEE 802.11 channel number. When set, it takes precedence over `frequency`.
    #[serde(default)]
    pub channel: Option<u8>,
    /// IEEE 802.11 mode ("a", "b", "g", "n", "ac").
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Last position applied to this interface.
    #[serde(skip)]
    pub position: Position,
    /// Last RSSI recorded on this interface (dBm).
    #[serde(skip)]
    pub rssi: f64,
}

fn default_tx_power() -> f64 {
    14.0
}

fn default_antenna_gain() -> f64 {
    5.0
}

fn default_frequency() -> f64 {
    2.412
}

fn default_mode() -> String {
    "g".to_string()
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            tx_power: default_tx_power(),
            antenna_gain: default_antenna_gain(),
            frequency: default_frequency(),
            channel: None,
            mode: default_mode(),
            position: Position::default(),
            rssi: 0.0,
        }
    }
}

/// A simulated wireless endpoint.
///
/// Nodes are built by the registry. Replay drivers only consume the trace
/// queues and update `position`, the radio records and `aps_in_range`.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub position: Position,
    /// Movement rate. Position replay steps one queued position every `1 / speed` seconds.
    pub speed: f64,
    pub position_trace: VecDeque<Position>,
    pub bandwidth_trace: VecDeque<TraceSample>,
    pub rssi_trace: VecDeque<TraceSample>,
    pub associated_ap: Option<Weak<Mutex<Node>>>,
    pub radios: Vec<RadioParams>,
    /// Coverage radius in metres (access points).
    pub range: f64,
    pub equipment_model: Option<String>,
    /// Names of access points currently covering this node.
    pub aps_in_range: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            position: Position::default(),
            speed: 1.0,
            position_trace: VecDeque::new(),
            bandwidth_trace: VecDeque::new(),
            rssi_trace: VecDeque::new(),
            associated_ap: None,
            radios: vec![RadioParams::default()],
            range: 0.0,
            equipment_model: None,
            aps_in_range: Vec::new(),
        }
    }

    pub fn into_ref(self) -> NodeRef {
        Arc::new(Mutex::new(self))
    }

    pub fn radio(&self, interface: usize) -> Option<&RadioParams> {
        self.radios.get(interface)
    }

    pub fn radio_mut(&mut self, interface: usize) -> Option<&mut RadioParams> {
        self.radios.get_mut(interface)
    }

    /// The associated access point, if one is set and still alive.
    pub fn associated_ap(&self) -> Option<NodeRef> {
        self.associated_ap.as_ref().and_then(Weak::upgrade)
    }

    pub fn associate(&mut self, access_point: &NodeRef) {
        self.associated_ap = Some(Arc::downgrade(access_point));
    }

    /// Move the node and mirror the position onto every radio interface.
    pub fn move_to(&mut self, position: Position) {
        self.position = position;
        for radio in &mut self.radios {
            radio.position = position;
        }
    }
}

/// Copy of the access point fields needed to derive a station's link.
///
/// Taken under the access point's lock so drivers never hold two node locks.
#[derive(Debug, Clone)]
pub struct ApSnapshot {
    pub name: String,
    pub position: Position,
    pub radio: RadioParams,
    pub equipment_model: Option<String>,
}

impl ApSnapshot {
    pub fn capture(access_point: &Node, interface: usize) -> Option<Self> {
        Some(Self {
            name: access_point.name.clone(),
            position: access_point.position,
            radio: access_point.radio(interface)?.clone(),
            equipment_model: access_point.equipment_model.clone(),
        })
    }
}
