//! Replays recorded wireless traces against simulated stations.
//!
//! Position, bandwidth and RSSI traces attached to each station are played
//! back in (optionally scaled) real time. RSSI samples are inverted through a
//! propagation model into a distance from the associated access point, which
//! drives station placement and link shaping.

pub mod channel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod propagation;
pub mod replay;
pub mod scene;
pub mod time_driver;
pub mod types;

pub use config::ReplayConfig;
pub use error::ReplayError;
pub use propagation::PropagationModel;
pub use replay::{ReplayEngine, ReplayHandle};
