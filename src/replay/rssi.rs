//! RSSI trace replay.
//!
//! For every due RSSI sample the station's distance to its access point is
//! recovered through the configured propagation model. The station is then
//! placed at that distance from the access point along a bearing fixed at
//! start, and loss, latency, delay and bandwidth derived from the distance are
//! applied in one shaping call.
//!
//! Lock discipline: the access point is snapshotted under its own lock before
//! the station is locked, and no node lock is held while the registry or the
//! shaper is called.

use rand::Rng;
use std::sync::Arc;

use crate::channel::{ChannelModel, RateMode};
use crate::collaborators::{LinkParams, LinkShaper, NodeRegistry, Visualizer, visualize};
use crate::propagation::{PropagationModel, calculate_distance};
use crate::types::{ApSnapshot, NodeRef, Position, RadioParams, TraceSample, lock};

use super::driver::{DriverKind, ReplayDriver};

/// Radio interface every RSSI sample refers to.
const INTERFACE: usize = 0;

struct RssiTrack {
    node: NodeRef,
    /// Bearing from the access point, in degrees within [0, 360).
    bearing: f64,
}

/// Everything the RSSI driver talks to besides the nodes themselves.
pub struct RssiCollaborators {
    pub registry: Arc<dyn NodeRegistry>,
    pub shaper: Arc<dyn LinkShaper>,
    pub channel: Arc<dyn ChannelModel>,
    pub visualizer: Option<Arc<dyn Visualizer>>,
}

/// Replays recorded RSSI samples as station movement plus link shaping.
pub struct RssiReplay {
    working_set: Vec<RssiTrack>,
    model: PropagationModel,
    collaborators: RssiCollaborators,
}

impl RssiReplay {
    /// Prepare every station that has an RSSI trace.
    ///
    /// Each one gets a uniformly random bearing and its interface frequency
    /// refreshed from the channel model.
    pub fn new<R: Rng>(stations: &[NodeRef], model: PropagationModel, collaborators: RssiCollaborators, rng: &mut R) -> Self {
        let mut working_set = Vec::new();
        for node in stations {
            let mut guard = lock(node);
            if guard.rssi_trace.is_empty() {
                continue;
            }
            let frequency = collaborators.channel.frequency(&guard, INTERFACE);
            if let Some(radio) = guard.radio_mut(INTERFACE) {
                radio.frequency = frequency;
            }
            working_set.push(RssiTrack {
                node: node.clone(),
                bearing: rng.gen_range(0.0..360.0),
            });
        }
        Self {
            working_set,
            model,
            collaborators,
        }
    }

    /// Consume the due sample of one station. Returns `(applied, keep_active)`.
    fn replay_next(&self, track: &RssiTrack, elapsed: f64) -> (bool, bool) {
        let (sample, access_point) = {
            let guard = lock(&track.node);
            match guard.rssi_trace.front() {
                None => return (false, false),
                Some(next) if elapsed < next.timestamp => return (false, true),
                Some(next) => (*next, guard.associated_ap()),
            }
        };

        let access_point = access_point.and_then(|ap| {
            let guard = lock(&ap);
            ApSnapshot::capture(&guard, INTERFACE)
        });

        let (placement, keep_active) = {
            let mut node = lock(&track.node);
            let Some(radio) = node.radio_mut(INTERFACE) else {
                log::warn!("{} has no radio interface {}, dropping RSSI sample", node.name, INTERFACE);
                node.rssi_trace.pop_front();
                return (true, !node.rssi_trace.is_empty());
            };
            radio.rssi = sample.value;
            let station_radio = radio.clone();

            let placement = access_point.and_then(|ap| match calculate_distance(&station_radio, &ap.radio, sample.value, self.model) {
                Ok(distance) => {
                    node.move_to(place_around(&ap.position, distance, track.bearing));
                    visualize(self.collaborators.visualizer.as_ref(), &node);
                    Some((ap, station_radio, distance))
                }
                Err(err) => {
                    log::warn!("{}: skipping RSSI {} dBm at t={:.3}s: {}", node.name, sample.value, sample.timestamp, err);
                    None
                }
            });

            if node.rssi_trace.pop_front().is_none() {
                debug_assert!(false, "RSSI trace of {} emptied while locked", node.name);
            }
            (placement, !node.rssi_trace.is_empty())
        };

        if let Some((ap, station_radio, distance)) = placement {
            self.shape(track, &sample, &ap, &station_radio, distance);
        }
        (true, keep_active)
    }

    fn shape(&self, track: &RssiTrack, sample: &TraceSample, ap: &ApSnapshot, station_radio: &RadioParams, distance: f64) {
        let RssiCollaborators {
            registry, shaper, channel, ..
        } = &self.collaborators;

        registry.update_aps_in_range(&track.node);

        let params = LinkParams {
            loss: channel.loss(distance),
            latency: channel.latency(distance),
            delay: channel.delay(distance, INTERFACE),
            bandwidth: channel.bandwidth(station_radio, ap, distance, INTERFACE, RateMode::Replay),
        };
        log::debug!(
            "RSSI {} dBm at t={:.3}s -> {:.2} m from {} ({:?})",
            sample.value,
            sample.timestamp,
            distance,
            ap.name,
            params
        );
        if let Err(err) = shaper.apply(&track.node, INTERFACE, &params) {
            log::warn!("Shaping after RSSI {} dBm failed: {}", sample.value, err);
        }
    }
}

/// Point `distance` metres from `center` (truncated to whole metres) along `bearing` degrees, at ground level.
fn place_around(center: &Position, distance: f64, bearing: f64) -> Position {
    let origin = center.truncated();
    let angle = bearing.to_radians();
    Position::new(origin.x + distance * angle.cos(), origin.y + distance * angle.sin(), 0.0)
}

impl ReplayDriver for RssiReplay {
    fn kind(&self) -> DriverKind {
        DriverKind::Rssi
    }

    fn poll(&mut self, elapsed: f64) -> usize {
        let mut applied = 0;
        let mut working_set = std::mem::take(&mut self.working_set);
        working_set.retain(|track| {
            let (consumed, keep_active) = self.replay_next(track, elapsed);
            applied += consumed as usize;
            keep_active
        });
        self.working_set = working_set;
        applied
    }

    fn active_nodes(&self) -> usize {
        self.working_set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DefaultChannel;
    use crate::types::{Node, NodeKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingShaper {
        calls: Mutex<Vec<LinkParams>>,
    }

    impl LinkShaper for RecordingShaper {
        fn apply(&self, _node: &NodeRef, _interface: usize, params: &LinkParams) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(*params);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRegistry {
        range_updates: AtomicUsize,
    }

    impl NodeRegistry for CountingRegistry {
        fn stations(&self) -> Vec<NodeRef> {
            Vec::new()
        }

        fn update_aps_in_range(&self, node: &NodeRef) {
            // Must be callable without deadlocking on the station.
            drop(lock(node));
            self.range_updates.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        shaper: Arc<RecordingShaper>,
        registry: Arc<CountingRegistry>,
        ap: NodeRef,
        station: NodeRef,
    }

    fn radio(frequency: f64) -> RadioParams {
        RadioParams {
            tx_power: 15.0,
            antenna_gain: 5.0,
            frequency,
            ..RadioParams::default()
        }
    }

    fn fixture(samples: &[(f64, f64)], associated: bool) -> Fixture {
        let mut ap = Node::new("ap1", NodeKind::AccessPoint);
        ap.radios = vec![radio(2.4)];
        ap.move_to(Position::new(10.7, 20.2, 0.0));
        let ap = ap.into_ref();

        let mut sta = Node::new("sta1", NodeKind::Station);
        sta.radios = vec![radio(2.4)];
        sta.rssi_trace = samples.iter().map(|&(t, v)| TraceSample::new(t, v)).collect();
        if associated {
            sta.associate(&ap);
        }

        Fixture {
            shaper: Arc::new(RecordingShaper::default()),
            registry: Arc::new(CountingRegistry::default()),
            ap,
            station: sta.into_ref(),
        }
    }

    fn replay(fixture: &Fixture, model: PropagationModel) -> RssiReplay {
        let collaborators = RssiCollaborators {
            registry: fixture.registry.clone(),
            shaper: fixture.shaper.clone(),
            channel: Arc::new(DefaultChannel::new()),
            visualizer: None,
        };
        let mut rng = StdRng::seed_from_u64(7);
        RssiReplay::new(&[fixture.station.clone()], model, collaborators, &mut rng)
    }

    #[test]
    fn station_is_placed_at_estimated_distance() {
        let fx = fixture(&[(0.0, -40.0)], true);
        let mut replay = replay(&fx, PropagationModel::Friis);
        let bearing = replay.working_set[0].bearing;
        assert!((0.0..360.0).contains(&bearing));

        assert_eq!(replay.poll(0.0), 1);
        let sta = lock(&fx.station);
        let expected = calculate_distance(&sta.radios[0], &lock(&fx.ap).radios[0], -40.0, PropagationModel::Friis).unwrap();
        let from_ap = sta.position.distance_to(&Position::new(10.0, 20.0, 0.0));
        assert!((from_ap - expected).abs() < 1e-9, "{from_ap} vs {expected}");
        assert_eq!(sta.position.z, 0.0);
        assert_eq!(sta.radios[0].rssi, -40.0);
        assert_eq!(fx.registry.range_updates.load(Ordering::SeqCst), 1);
        assert_eq!(fx.shaper.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn weaker_samples_push_the_station_away() {
        let fx = fixture(&[(0.0, -40.0), (1.0, -60.0)], true);
        let mut replay = replay(&fx, PropagationModel::LogDistance);
        let ap_origin = Position::new(10.0, 20.0, 0.0);

        replay.poll(0.0);
        let near = lock(&fx.station).position.distance_to(&ap_origin);
        assert_eq!(replay.poll(0.5), 0);
        replay.poll(1.0);
        let far = lock(&fx.station).position.distance_to(&ap_origin);

        assert!(far > near);
        assert!(replay.is_finished());
        let calls = fx.shaper.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].latency > calls[0].latency);
        assert!(calls[1].bandwidth < calls[0].bandwidth);
    }

    #[test]
    fn unassociated_station_only_records_rssi() {
        let fx = fixture(&[(0.0, -55.0), (0.0, -57.0)], false);
        let mut replay = replay(&fx, PropagationModel::Itu);

        assert_eq!(replay.poll(0.0), 1);
        {
            let sta = lock(&fx.station);
            assert_eq!(sta.radios[0].rssi, -55.0);
            assert_eq!(sta.position, Position::default());
            assert_eq!(sta.rssi_trace.len(), 1);
        }
        assert_eq!(replay.poll(0.0), 1);
        assert!(replay.is_finished());
        assert!(fx.shaper.calls.lock().unwrap().is_empty());
        assert_eq!(fx.registry.range_updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn non_physical_distance_skips_shaping_but_consumes_sample() {
        let fx = fixture(&[(0.0, -40.0)], true);
        let mut replay = replay(&fx, PropagationModel::Friis);
        // A zero frequency makes the wavelength infinite.
        lock(&fx.station).radios[0].frequency = 0.0;

        assert_eq!(replay.poll(0.0), 1);
        assert!(replay.is_finished());
        assert!(fx.shaper.calls.lock().unwrap().is_empty());
        assert_eq!(lock(&fx.station).position, Position::default());
    }

    #[test]
    fn frequency_is_refreshed_at_start() {
        let fx = fixture(&[(0.0, -40.0)], true);
        lock(&fx.station).radios[0].channel = Some(6);
        let _replay = replay(&fx, PropagationModel::Friis);
        assert!((lock(&fx.station).radios[0].frequency - 2.437).abs() < 1e-9);
    }

    #[test]
    fn sample_timestamps_are_consumed_in_order() {
        let fx = fixture(&[(0.0, -40.0), (0.2, -45.0), (0.4, -50.0), (0.6, -55.0)], true);
        let mut replay = replay(&fx, PropagationModel::Friis);
        let mut seen = Vec::new();
        let mut t = 0.0;
        while !replay.is_finished() {
            let before = lock(&fx.station).rssi_trace.front().map(|s| s.timestamp);
            if replay.poll(t) > 0 {
                seen.push(before.unwrap());
            }
            t += 0.1;
        }
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn placement_truncates_the_access_point_position() {
        let p = place_around(&Position::new(3.9, 4.2, 7.0), 2.0, 90.0);
        assert!((p.x - 3.0).abs() < 1e-9);
        assert!((p.y - 6.0).abs() < 1e-9);
        assert_eq!(p.z, 0.0);
    }
}
