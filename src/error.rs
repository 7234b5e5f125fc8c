//! Error types raised by the replay engine.

use std::fmt;

use crate::propagation::PropagationModel;

/// Errors that prevent a replay from starting or invalidate a single event.
#[derive(Debug)]
pub enum ReplayError {
    /// The configured propagation model name matches none of the supported models.
    UnknownPropagationModel(String),
    /// A propagation model produced a distance that is non-finite or not strictly positive.
    NonPhysicalDistance { model: PropagationModel, distance: f64 },
    /// A node carries a position trace but its speed cannot produce a finite time step.
    InvalidSpeed { node: String, speed: f64 },
    /// The OS refused to spawn a driver thread.
    DriverSpawn(std::io::Error),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::UnknownPropagationModel(name) => write!(f, "Unknown propagation model: {}", name),
            ReplayError::NonPhysicalDistance { model, distance } => {
                write!(f, "{} model produced a non-physical distance: {}", model, distance)
            }
            ReplayError::InvalidSpeed { node, speed } => write!(f, "Node {} has invalid speed {} for position replay", node, speed),
            ReplayError::DriverSpawn(err) => write!(f, "Failed to spawn replay driver thread: {}", err),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::DriverSpawn(err) => Some(err),
            _ => None,
        }
    }
}
