//! Composition root: builds the enabled drivers from a registry snapshot and runs each on its own thread.

use embassy_time::Duration;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channel::ChannelModel;
use crate::collaborators::{LinkShaper, NodeRegistry, Visualizer};
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::time_driver;

use super::bandwidth::BandwidthReplay;
use super::clock::StopToken;
use super::driver::{DriverKind, DriverOutcome, DriverReport, ReplayDriver, drive};
use super::position::PositionReplay;
use super::rssi::{RssiCollaborators, RssiReplay};

/// Replays the traces held by a registry's nodes.
pub struct ReplayEngine {
    registry: Arc<dyn NodeRegistry>,
    shaper: Arc<dyn LinkShaper>,
    channel: Arc<dyn ChannelModel>,
    visualizer: Option<Arc<dyn Visualizer>>,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(registry: Arc<dyn NodeRegistry>, shaper: Arc<dyn LinkShaper>, channel: Arc<dyn ChannelModel>) -> Self {
        Self {
            registry,
            shaper,
            channel,
            visualizer: None,
            config: ReplayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Start every enabled driver.
    ///
    /// All drivers are constructed before the first thread is spawned, so a
    /// configuration error leaves nothing running. If a later spawn fails the
    /// drivers already started are stopped and joined before returning.
    ///
    /// The replay speed is process-wide: starting an engine applies its
    /// `replay-speed-percent` to every driver already running in the process,
    /// including those of other engines.
    pub fn start(&self) -> Result<ReplayHandle, ReplayError> {
        let config = &self.config;
        time_driver::set_replay_speed_percent(config.replay_speed_percent);

        let stations = self.registry.stations();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let position = if config.replay_position {
            Some(PositionReplay::new(&stations, self.registry.clone(), self.visualizer.clone())?)
        } else {
            None
        };
        let bandwidth = config.replay_bandwidth.then(|| BandwidthReplay::new(&stations, self.shaper.clone()));
        let rssi = config.replay_rssi.then(|| {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let collaborators = RssiCollaborators {
                registry: self.registry.clone(),
                shaper: self.shaper.clone(),
                channel: self.channel.clone(),
                visualizer: self.visualizer.clone(),
            };
            RssiReplay::new(&stations, config.propagation_model, collaborators, &mut rng)
        });

        log::info!(
            "Starting replay of {} stations: model {}, speed {}%, poll every {} ms",
            stations.len(),
            config.propagation_model,
            time_driver::replay_speed_percent(),
            config.poll_interval_ms
        );

        let mut handle = ReplayHandle {
            stop: StopToken::new(),
            drivers: Vec::new(),
        };
        let spawned = handle
            .spawn(position, poll_interval)
            .and_then(|()| handle.spawn(bandwidth, poll_interval))
            .and_then(|()| handle.spawn(rssi, poll_interval));

        if let Err(err) = spawned {
            log::error!("{}", err);
            handle.stop();
            handle.wait();
            return Err(err);
        }
        Ok(handle)
    }
}

/// Running replay. Dropping the handle stops every driver without waiting for it.
pub struct ReplayHandle {
    stop: StopToken,
    drivers: Vec<(DriverKind, JoinHandle<DriverReport>)>,
}

impl ReplayHandle {
    fn spawn<D: ReplayDriver>(&mut self, driver: Option<D>, poll_interval: Duration) -> Result<(), ReplayError> {
        let Some(driver) = driver else {
            return Ok(());
        };
        let kind = driver.kind();
        let stop = self.stop.clone();
        let join = thread::Builder::new()
            .name(format!("replay-{}", kind))
            .spawn(move || futures::executor::block_on(drive(driver, stop, poll_interval)))
            .map_err(ReplayError::DriverSpawn)?;
        self.drivers.push((kind, join));
        Ok(())
    }

    /// Ask every driver to stop at its next poll iteration.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// True once every driver thread has returned.
    pub fn is_finished(&self) -> bool {
        self.drivers.iter().all(|(_, join)| join.is_finished())
    }

    pub fn running(&self) -> Vec<DriverKind> {
        self.drivers.iter().filter(|(_, join)| !join.is_finished()).map(|(kind, _)| *kind).collect()
    }

    /// Block until every driver returns. Reports are in start order.
    pub fn wait(mut self) -> Vec<DriverReport> {
        std::mem::take(&mut self.drivers)
            .into_iter()
            .map(|(kind, join)| {
                join.join().unwrap_or_else(|_| {
                    log::error!("Replay {} driver panicked", kind);
                    DriverReport {
                        kind,
                        outcome: DriverOutcome::Panicked,
                        events_applied: 0,
                    }
                })
            })
            .collect()
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
