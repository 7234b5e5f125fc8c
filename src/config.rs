//! Replay engine configuration loaded from TOML.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::propagation::PropagationModel;

/// Engine settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ReplayConfig {
    /// Model used to turn RSSI samples into distances.
    pub propagation_model: PropagationModel,
    /// Sleep between driver poll iterations (ms).
    pub poll_interval_ms: u64,
    /// Virtual time speed as a percentage of real time.
    pub replay_speed_percent: u32,
    pub replay_position: bool,
    pub replay_bandwidth: bool,
    pub replay_rssi: bool,
    /// Seed for the bearing assigned to each RSSI-replayed station. Random when absent.
    pub seed: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            propagation_model: PropagationModel::Friis,
            poll_interval_ms: 10,
            replay_speed_percent: 100,
            replay_position: true,
            replay_bandwidth: true,
            replay_rssi: true,
            seed: None,
        }
    }
}

impl ReplayConfig {
    /// Parse a configuration document. An unknown propagation model is an error.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: ReplayConfig = toml::from_str(content).context("Invalid replay configuration")?;
        anyhow::ensure!(config.poll_interval_ms > 0, "poll-interval-ms must be positive");
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::from_toml(&content)
    }

    /// Load `config_path` if it exists, defaults otherwise.
    pub fn load_or_default(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            log::info!("No replay configuration at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// `config.toml` in the scene file's directory.
    pub fn config_path_from_scene(scene_path: &Path) -> PathBuf {
        scene_path.parent().unwrap_or(Path::new(".")).join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(ReplayConfig::from_toml("").unwrap(), ReplayConfig::default());
    }

    #[test]
    fn kebab_case_fields_parse() {
        let config = ReplayConfig::from_toml(
            r#"
            propagation-model = "logDistancePropagationLossModel"
            poll-interval-ms = 20
            replay-speed-percent = 250
            replay-position = false
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.propagation_model, PropagationModel::LogDistance);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.replay_speed_percent, 250);
        assert!(!config.replay_position);
        assert!(config.replay_bandwidth && config.replay_rssi);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn unknown_model_fails_to_load() {
        let err = ReplayConfig::from_toml(r#"propagation-model = "twoRayGround""#).unwrap_err();
        assert!(format!("{:#}", err).contains("twoRayGround"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(ReplayConfig::from_toml("poll-interval-ms = 0").is_err());
    }

    #[test]
    fn typos_are_not_silently_ignored() {
        assert!(ReplayConfig::from_toml("replay-rsi = false").is_err());
    }

    #[test]
    fn config_sits_next_to_scene() {
        assert_eq!(
            ReplayConfig::config_path_from_scene(Path::new("/traces/office/scene.json")),
            PathBuf::from("/traces/office/config.toml")
        );
        assert_eq!(ReplayConfig::config_path_from_scene(Path::new("scene.json")), PathBuf::from("config.toml"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ReplayConfig::load_or_default(Path::new("/nonexistent/wifi-replay/config.toml")).unwrap();
        assert_eq!(config, ReplayConfig::default());
    }
}
