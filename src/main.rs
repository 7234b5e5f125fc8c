use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use wifi_replay::ReplayConfig;
use wifi_replay::ReplayEngine;
use wifi_replay::channel::DefaultChannel;
use wifi_replay::collaborators::{ChannelVisualizer, LogShaper, VisualUpdateQueue};
use wifi_replay::scene::{SceneRegistry, load_scene};

/// How often the main thread drains visual updates while the drivers run.
const VISUAL_DRAIN_INTERVAL: Duration = Duration::from_millis(50);

fn usage() -> String {
    "usage: wifi-replay <scene.json> [config.toml]".to_string()
}

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wifi_replay"), LevelFilter::Debug)
        .init();

    let mut args = std::env::args_os().skip(1);
    let scene_path = PathBuf::from(args.next().ok_or_else(|| anyhow::anyhow!(usage()))?);
    let config_path = args.next().map(PathBuf::from);
    anyhow::ensure!(args.next().is_none(), usage());

    let config = match &config_path {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::load_or_default(&ReplayConfig::config_path_from_scene(&scene_path))?,
    };
    let scene = load_scene(&scene_path).with_context(|| format!("Failed to load scene {}", scene_path.display()))?;
    info!(
        "Loaded scene {}: {} access points, {} stations",
        scene_path.display(),
        scene.access_points.len(),
        scene.stations.len()
    );

    let visual_updates = Arc::new(VisualUpdateQueue::new());
    let engine = ReplayEngine::new(
        Arc::new(SceneRegistry::from_scene(scene)),
        Arc::new(LogShaper),
        Arc::new(DefaultChannel::new()),
    )
    .with_visualizer(Arc::new(ChannelVisualizer::new(visual_updates.clone())))
    .with_config(config);

    let handle = engine.start().context("Failed to start replay")?;
    while !handle.is_finished() {
        while let Ok(update) = visual_updates.try_receive() {
            debug!("{} at {} (RSSI {} dBm)", update.name, update.position, update.rssi);
        }
        thread::sleep(VISUAL_DRAIN_INTERVAL);
    }

    for report in handle.wait() {
        info!("{} replay: {:?}, {} events applied", report.kind, report.outcome, report.events_applied);
    }
    Ok(())
}
