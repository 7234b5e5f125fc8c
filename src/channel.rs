//! Link-quality helpers that turn a station/access point distance into shaping parameters.
//!
//! The replay drivers treat these as external collaborators (`ChannelModel`,
//! `DataRateLookup`); `DefaultChannel` and `StaticDataRate` are the stock
//! implementations.

use crate::types::{ApSnapshot, Node, RadioParams};

/// Whether a bandwidth is derived for trace replay or for live mobility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    Replay,
    Live,
}

/// Closed-form channel helpers, all functions of distance in metres.
pub trait ChannelModel: Send + Sync {
    /// Current operating frequency (GHz) of `node` on `interface`.
    fn frequency(&self, node: &Node, interface: usize) -> f64;
    /// Packet loss in percent.
    fn loss(&self, distance: f64) -> f64;
    /// Latency in milliseconds.
    fn latency(&self, distance: f64) -> f64;
    /// Delay in milliseconds.
    fn delay(&self, distance: f64, interface: usize) -> f64;
    /// Achievable bandwidth in Mbit/s between a station and its access point.
    fn bandwidth(&self, station: &RadioParams, access_point: &ApSnapshot, distance: f64, interface: usize, mode: RateMode) -> f64;
}

/// Baseline data-rate capability of a station/access point pair.
pub trait DataRateLookup: Send + Sync {
    /// Nominal rate in Mbit/s.
    fn data_rate(&self, station: &RadioParams, access_point: &ApSnapshot) -> f64;
}

/// Nominal PHY rate per 802.11 mode of the access point.
pub struct StaticDataRate;

impl DataRateLookup for StaticDataRate {
    fn data_rate(&self, _station: &RadioParams, access_point: &ApSnapshot) -> f64 {
        match access_point.radio.mode.as_str() {
            "b" => 11.0,
            "a" | "g" => 54.0,
            "n" => 150.0,
            "ac" => 866.7,
            _ => 54.0,
        }
    }
}

/// Centre frequency (GHz) of an IEEE 802.11 channel number.
///
/// Returns `None` for numbers outside the 2.4 GHz (1-14) and 5 GHz (32-177) bands.
pub fn frequency_for_channel(channel: u8) -> Option<f64> {
    match channel {
        1..=13 => Some(2.407 + 0.005 * channel as f64),
        14 => Some(2.484),
        32..=177 => Some(5.0 + 0.005 * channel as f64),
        _ => None,
    }
}

/// Rate estimate for a link `distance` metres long.
///
/// Equipment with a known model sustains a fixed fraction of its nominal rate;
/// generic equipment decays geometrically with distance. A non-positive or
/// non-finite result becomes 1; small positive rates are returned as is.
pub fn estimate_rate(baseline: f64, has_equipment_model: bool, distance: f64) -> f64 {
    let rate = if has_equipment_model {
        baseline / 2.5
    } else {
        baseline * 1.1f64.powf(-distance)
    };
    if rate <= 0.0 || !rate.is_finite() { 1.0 } else { rate }
}

/// Stock channel helpers.
pub struct DefaultChannel<R: DataRateLookup = StaticDataRate> {
    rates: R,
}

impl DefaultChannel<StaticDataRate> {
    pub fn new() -> Self {
        Self { rates: StaticDataRate }
    }
}

impl Default for DefaultChannel<StaticDataRate> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: DataRateLookup> DefaultChannel<R> {
    pub fn with_rates(rates: R) -> Self {
        Self { rates }
    }
}

impl<R: DataRateLookup> ChannelModel for DefaultChannel<R> {
    fn frequency(&self, node: &Node, interface: usize) -> f64 {
        let Some(radio) = node.radio(interface) else {
            return 0.0;
        };
        radio.channel.and_then(frequency_for_channel).unwrap_or(radio.frequency)
    }

    fn loss(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            return 0.0;
        }
        (distance * distance).log10().max(0.0)
    }

    fn latency(&self, distance: f64) -> f64 {
        2.0 + distance
    }

    fn delay(&self, distance: f64, _interface: usize) -> f64 {
        5.0 * distance
    }

    fn bandwidth(&self, station: &RadioParams, access_point: &ApSnapshot, distance: f64, _interface: usize, mode: RateMode) -> f64 {
        let baseline = self.rates.data_rate(station, access_point);
        match mode {
            RateMode::Replay => estimate_rate(baseline, access_point.equipment_model.is_some(), distance),
            // Live mobility ignores the equipment model.
            RateMode::Live => estimate_rate(baseline, false, distance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeKind, Position};

    fn ap(mode: &str, equipment_model: Option<&str>) -> ApSnapshot {
        ApSnapshot {
            name: "ap1".to_string(),
            position: Position::default(),
            radio: RadioParams {
                mode: mode.to_string(),
                ..RadioParams::default()
            },
            equipment_model: equipment_model.map(str::to_string),
        }
    }

    #[test]
    fn channel_numbers_map_to_centre_frequencies() {
        assert!((frequency_for_channel(1).unwrap() - 2.412).abs() < 1e-9);
        assert!((frequency_for_channel(6).unwrap() - 2.437).abs() < 1e-9);
        assert_eq!(frequency_for_channel(14), Some(2.484));
        assert!((frequency_for_channel(36).unwrap() - 5.18).abs() < 1e-9);
        assert_eq!(frequency_for_channel(0), None);
        assert_eq!(frequency_for_channel(200), None);
    }

    #[test]
    fn frequency_prefers_channel_number() {
        let channel = DefaultChannel::new();
        let mut node = Node::new("sta1", NodeKind::Station);
        node.radios[0].frequency = 2.4;
        assert_eq!(channel.frequency(&node, 0), 2.4);
        node.radios[0].channel = Some(11);
        assert!((channel.frequency(&node, 0) - 2.462).abs() < 1e-9);
        assert_eq!(channel.frequency(&node, 3), 0.0);
    }

    #[test]
    fn non_positive_rate_estimate_becomes_one() {
        let far = estimate_rate(54.0, false, 1000.0);
        assert!(far > 0.0 && far < 1e-30, "got {far}");
        assert_eq!(estimate_rate(0.0, true, 10.0), 1.0);
        assert_eq!(estimate_rate(0.0, false, 10.0), 1.0);
        assert_eq!(estimate_rate(-5.0, true, 10.0), 1.0);
        assert!((estimate_rate(54.0, true, 500.0) - 21.6).abs() < 1e-9);
        assert!((estimate_rate(54.0, false, 0.0) - 54.0).abs() < 1e-9);
    }

    #[test]
    fn impairments_grow_with_distance() {
        let channel = DefaultChannel::new();
        let station = RadioParams::default();
        let ap = ap("g", None);
        let (near, far) = (12.5, 125.0);
        assert!(channel.loss(far) > channel.loss(near));
        assert!(channel.latency(far) > channel.latency(near));
        assert!(channel.delay(far, 0) > channel.delay(near, 0));
        assert!(
            channel.bandwidth(&station, &ap, far, 0, RateMode::Replay) < channel.bandwidth(&station, &ap, near, 0, RateMode::Replay)
        );
        assert_eq!(channel.loss(0.0), 0.0);
    }

    #[test]
    fn known_equipment_keeps_fixed_fraction() {
        let channel = DefaultChannel::new();
        let station = RadioParams::default();
        let ap = ap("n", Some("TL-WR740N"));
        assert!((channel.bandwidth(&station, &ap, 80.0, 0, RateMode::Replay) - 60.0).abs() < 1e-9);
        assert!(channel.bandwidth(&station, &ap, 80.0, 0, RateMode::Live) < 1.0 + 1e-9);
    }
}
