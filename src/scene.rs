//! Scene loading, validation, and the in-memory node registry built from it.
//!
//! A scene file is the trace source for a replay: it lists the access points
//! and stations of a capture, their radios, and the recorded position,
//! bandwidth and RSSI traces attached to each station.

use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::collaborators::NodeRegistry;
use crate::types::{Node, NodeKind, NodeRef, Position, RadioParams, TraceSample, lock};

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// An access point as described in the scene file.
#[derive(Debug, Deserialize, Clone)]
pub struct AccessPointEntry {
    pub name: String,
    pub position: Position,
    pub radios: Vec<RadioParams>,
    /// Coverage radius in metres.
    #[serde(default = "default_range")]
    pub range: f64,
    #[serde(default)]
    pub equipment_model: Option<String>,
}

fn default_range() -> f64 {
    33.0
}

fn default_speed() -> f64 {
    1.0
}

/// A station and its recorded traces.
#[derive(Debug, Deserialize, Clone)]
pub struct StationEntry {
    pub name: String,
    #[serde(default)]
    pub position: Position,
    pub radios: Vec<RadioParams>,
    /// Movement rate; one queued position is replayed every `1 / speed` seconds.
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Name of the access point the station is associated with during the capture.
    #[serde(default)]
    pub associated_to: Option<String>,
    #[serde(default)]
    pub position_trace: Vec<Position>,
    #[serde(default)]
    pub bandwidth_trace: Vec<TraceSample>,
    #[serde(default)]
    pub rssi_trace: Vec<TraceSample>,
}

/// Root structure of a scene file.
#[derive(Debug, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub access_points: Vec<AccessPointEntry>,
    pub stations: Vec<StationEntry>,
}

/// Load, parse and validate a scene file.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| SceneLoadError::FileReadError(format!("{:#}", e)))?;
    parse_scene(&data)
}

/// Parse and validate a scene from its JSON text.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data).map_err(|e| SceneLoadError::ParseError(e.to_string()))?;
    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;
    Ok(scene)
}

/// Reject scenes the replay drivers cannot play back faithfully.
///
/// Checks:
/// - Node names are unique across access points and stations
/// - Every node has at least one radio
/// - Associations name an existing access point
/// - Trace timestamps are finite and non-decreasing
/// - Stations with a position trace have a finite, positive speed
fn validate_scene(scene: &Scene) -> Result<(), String> {
    if scene.stations.is_empty() {
        return Err("Scene must contain at least one station".to_string());
    }

    let mut names = HashSet::new();
    let node_names = scene.access_points.iter().map(|ap| &ap.name).chain(scene.stations.iter().map(|sta| &sta.name));
    for name in node_names {
        if !names.insert(name.as_str()) {
            return Err(format!("Duplicate node name found: {}", name));
        }
    }

    for ap in &scene.access_points {
        if ap.radios.is_empty() {
            return Err(format!("Access point {} has no radios", ap.name));
        }
        if !ap.range.is_finite() || ap.range < 0.0 {
            return Err(format!("Access point {} has invalid range {}", ap.name, ap.range));
        }
    }

    let ap_names: HashSet<&str> = scene.access_points.iter().map(|ap| ap.name.as_str()).collect();
    for sta in &scene.stations {
        if sta.radios.is_empty() {
            return Err(format!("Station {} has no radios", sta.name));
        }
        if let Some(ap) = &sta.associated_to {
            if !ap_names.contains(ap.as_str()) {
                return Err(format!("Station {} is associated to unknown access point {}", sta.name, ap));
            }
        }
        if !sta.position_trace.is_empty() && (!sta.speed.is_finite() || sta.speed <= 0.0) {
            return Err(format!("Station {} replays positions but has speed {}", sta.name, sta.speed));
        }
        check_timestamps(&sta.name, "bandwidth", &sta.bandwidth_trace)?;
        check_timestamps(&sta.name, "rssi", &sta.rssi_trace)?;
    }

    Ok(())
}

fn check_timestamps(node: &str, trace: &str, samples: &[TraceSample]) -> Result<(), String> {
    if let Some(sample) = samples.iter().find(|s| !s.timestamp.is_finite() || s.timestamp < 0.0) {
        return Err(format!("Station {} {} trace has invalid timestamp {}", node, trace, sample.timestamp));
    }
    if let Some(pair) = samples.windows(2).find(|w| w[1].timestamp < w[0].timestamp) {
        return Err(format!(
            "Station {} {} trace goes back in time ({} after {})",
            node, trace, pair[1].timestamp, pair[0].timestamp
        ));
    }
    Ok(())
}

/// Node registry holding every node of a loaded scene.
pub struct SceneRegistry {
    access_points: Vec<NodeRef>,
    stations: Vec<NodeRef>,
}

impl SceneRegistry {
    /// Instantiate the scene's nodes and wire station associations.
    pub fn from_scene(scene: Scene) -> Self {
        let mut by_name: HashMap<String, NodeRef> = HashMap::new();
        let access_points: Vec<NodeRef> = scene
            .access_points
            .into_iter()
            .map(|entry| {
                let mut node = Node::new(entry.name, NodeKind::AccessPoint);
                node.radios = entry.radios;
                node.range = entry.range;
                node.equipment_model = entry.equipment_model;
                node.move_to(entry.position);
                let node = node.into_ref();
                by_name.insert(lock(&node).name.clone(), node.clone());
                node
            })
            .collect();

        let stations = scene
            .stations
            .into_iter()
            .map(|entry| {
                let mut node = Node::new(entry.name, NodeKind::Station);
                node.radios = entry.radios;
                node.speed = entry.speed;
                node.move_to(entry.position);
                node.position_trace = entry.position_trace.into();
                node.bandwidth_trace = entry.bandwidth_trace.into();
                node.rssi_trace = entry.rssi_trace.into();
                if let Some(ap) = entry.associated_to.and_then(|name| by_name.get(&name)) {
                    node.associate(ap);
                }
                node.into_ref()
            })
            .collect();

        Self { access_points, stations }
    }

    pub fn access_points(&self) -> &[NodeRef] {
        &self.access_points
    }

    pub fn find(&self, name: &str) -> Option<NodeRef> {
        self.access_points.iter().chain(self.stations.iter()).find(|node| lock(node).name == name).cloned()
    }
}

impl NodeRegistry for SceneRegistry {
    fn stations(&self) -> Vec<NodeRef> {
        self.stations.clone()
    }

    /// Refresh `aps_in_range` and, for an unassociated station, associate it with the nearest covering access point.
    ///
    /// An existing association is kept even when the access point is out of range: during replay the
    /// recorded trace decides which access point the station talks to.
    fn update_aps_in_range(&self, node: &NodeRef) {
        let position = lock(node).position;

        let mut in_range: Vec<(f64, String, &NodeRef)> = self
            .access_points
            .iter()
            .filter_map(|ap| {
                let ap_guard = lock(ap);
                let distance = ap_guard.position.distance_to(&position);
                (distance <= ap_guard.range).then(|| (distance, ap_guard.name.clone(), ap))
            })
            .collect();
        in_range.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut station = lock(node);
        station.aps_in_range = in_range.iter().map(|(_, name, _)| name.clone()).collect();
        if station.associated_ap().is_none() {
            if let Some((distance, name, ap)) = in_range.first() {
                log::debug!("{} associated to {} at {:.2} m", station.name, name, distance);
                station.associate(ap);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "access_points": [
            { "name": "ap1", "position": { "x": 0, "y": 0 }, "range": 50,
              "radios": [{ "tx_power": 15, "antenna_gain": 5, "frequency": 2.4 }] },
            { "name": "ap2", "position": { "x": 100, "y": 0 }, "range": 30, "equipment_model": "TL-WR740N",
              "radios": [{ "channel": 36, "mode": "a" }] }
        ],
        "stations": [
            { "name": "sta1", "associated_to": "ap1", "speed": 2,
              "radios": [{ "antenna_gain": 5, "frequency": 2.4 }],
              "position_trace": [{ "x": 1, "y": 1 }, { "x": 2, "y": 2 }],
              "rssi_trace": [{ "timestamp": 0, "value": -40 }, { "timestamp": 1, "value": -60 }] },
            { "name": "sta2", "position": { "x": 90, "y": 5 },
              "radios": [{}],
              "bandwidth_trace": [{ "timestamp": 0.5, "value": 11 }] }
        ]
    }"#;

    fn with_station(extra: &str) -> String {
        format!(r#"{{ "access_points": [], "stations": [{{ "name": "sta1", "radios": [{{}}] {} }}] }}"#, extra)
    }

    #[test]
    fn scene_parses_with_defaults() {
        let scene = parse_scene(SCENE).unwrap();
        assert_eq!(scene.access_points.len(), 2);
        let sta2 = &scene.stations[1];
        assert_eq!(sta2.speed, 1.0);
        assert_eq!(sta2.radios[0].tx_power, 14.0);
        assert_eq!(sta2.radios[0].mode, "g");
        assert_eq!(scene.stations[0].rssi_trace[1], TraceSample::new(1.0, -60.0));
        assert_eq!(scene.access_points[1].radios[0].channel, Some(36));
    }

    #[test]
    fn registry_wires_associations_and_traces() {
        let registry = SceneRegistry::from_scene(parse_scene(SCENE).unwrap());
        let stations = registry.stations();
        assert_eq!(stations.len(), 2);
        assert_eq!(registry.access_points().len(), 2);

        let sta1 = lock(&stations[0]);
        assert_eq!(lock(&sta1.associated_ap().unwrap()).name, "ap1");
        assert_eq!(sta1.position_trace.len(), 2);
        assert_eq!(sta1.rssi_trace.len(), 2);
        assert!(lock(&stations[1]).associated_ap().is_none());
        assert_eq!(lock(&stations[1]).radios[0].position, Position::new(90.0, 5.0, 0.0));
    }

    #[test]
    fn range_update_associates_nearest_covering_ap() {
        let registry = SceneRegistry::from_scene(parse_scene(SCENE).unwrap());
        let sta2 = registry.find("sta2").unwrap();
        registry.update_aps_in_range(&sta2);
        let guard = lock(&sta2);
        assert_eq!(guard.aps_in_range, vec!["ap2".to_string()]);
        assert_eq!(lock(&guard.associated_ap().unwrap()).name, "ap2");
    }

    #[test]
    fn range_update_keeps_recorded_association() {
        let registry = SceneRegistry::from_scene(parse_scene(SCENE).unwrap());
        let sta1 = registry.find("sta1").unwrap();
        lock(&sta1).move_to(Position::new(95.0, 0.0, 0.0));
        registry.update_aps_in_range(&sta1);
        let guard = lock(&sta1);
        assert_eq!(guard.aps_in_range, vec!["ap2".to_string()]);
        assert_eq!(lock(&guard.associated_ap().unwrap()).name, "ap1");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let json = r#"{ "access_points": [{ "name": "n", "position": { "x": 0, "y": 0 }, "radios": [{}] }],
                        "stations": [{ "name": "n", "radios": [{}] }] }"#;
        assert!(matches!(parse_scene(json), Err(SceneLoadError::ValidationError(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn unknown_association_is_rejected() {
        let json = with_station(r#", "associated_to": "ghost""#);
        assert!(matches!(parse_scene(&json), Err(SceneLoadError::ValidationError(msg)) if msg.contains("ghost")));
    }

    #[test]
    fn decreasing_timestamps_are_rejected() {
        let json = with_station(r#", "rssi_trace": [{ "timestamp": 2, "value": -40 }, { "timestamp": 1, "value": -50 }]"#);
        assert!(matches!(parse_scene(&json), Err(SceneLoadError::ValidationError(msg)) if msg.contains("back in time")));
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let json = with_station(r#", "bandwidth_trace": [{ "timestamp": 1, "value": 5 }, { "timestamp": 1, "value": 6 }]"#);
        assert!(parse_scene(&json).is_ok());
    }

    #[test]
    fn stationary_speed_with_positions_is_rejected() {
        let json = with_station(r#", "speed": 0, "position_trace": [{ "x": 1, "y": 1 }]"#);
        assert!(matches!(parse_scene(&json), Err(SceneLoadError::ValidationError(_))));
    }

    #[test]
    fn radioless_station_is_rejected() {
        let json = r#"{ "stations": [{ "name": "sta1", "radios": [] }] }"#;
        assert!(matches!(parse_scene(json), Err(SceneLoadError::ValidationError(_))));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(parse_scene("{ not json"), Err(SceneLoadError::ParseError(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            load_scene(Path::new("/nonexistent/wifi-replay/scene.json")),
            Err(SceneLoadError::FileReadError(_))
        ));
    }
}
