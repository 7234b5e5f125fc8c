//! Propagation-loss models used to turn a recorded RSSI sample back into a distance.
//!
//! Contains:
//! - Free-space path loss with a near-field clamp
//! - Friis, log-distance and ITU indoor inversions (signal level -> metres)
//! - Validation of model output before it reaches the shaping layer
//!
//! Units:
//! - Power and gains: dBm / dBi
//! - Frequency: GHz at the API boundary (converted internally as each model requires)
//! - Distance: metres

use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::ReplayError;
use crate::types::RadioParams;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Distances below this are treated as this value to keep the log domain finite.
pub const MIN_PATH_LOSS_DISTANCE: f64 = 0.1;

/// System loss factor (L) applied by the Friis inversion.
const FRIIS_SYSTEM_LOSS: f64 = 2.0;

const LOG_DISTANCE_REFERENCE: f64 = 1.0;
const LOG_DISTANCE_EXPONENT: f64 = 2.0;

/// ITU indoor power loss coefficient (N) for a residential/office environment.
const ITU_POWER_LOSS_COEFFICIENT: f64 = 32.0;
const ITU_FLOOR_PENETRATION_LOSS: f64 = 0.0;
const ITU_FLOORS: f64 = 0.0;

/// Propagation model used by the RSSI replay to estimate station distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PropagationModel {
    /// Free-space (Friis) transmission equation.
    Friis,
    /// Log-distance model with a 1 m reference and exponent 2.
    LogDistance,
    /// ITU-R P.1238 indoor model with no floor penetration.
    Itu,
}

impl PropagationModel {
    /// Estimate the transmitter-receiver distance (m) that explains `signal_level`.
    ///
    /// # Parameters
    ///
    /// - `signal_level`: received signal strength in dBm
    /// - `tx_power`: transmitter output power in dBm
    /// - `tx_gain`, `rx_gain`: antenna gains in dBi
    /// - `frequency`: carrier frequency in GHz
    ///
    /// # Returns
    ///
    /// Raw model output. Callers must reject non-finite or non-positive values;
    /// [`calculate_distance`] does this for them.
    pub fn estimate_distance(&self, signal_level: f64, tx_power: f64, tx_gain: f64, rx_gain: f64, frequency: f64) -> f64 {
        match self {
            PropagationModel::Friis => friis_distance(signal_level, tx_power, tx_gain, rx_gain, frequency),
            PropagationModel::LogDistance => log_distance_distance(signal_level, tx_power, tx_gain, rx_gain, frequency),
            PropagationModel::Itu => itu_distance(signal_level, tx_power, tx_gain, rx_gain, frequency),
        }
    }
}

impl fmt::Display for PropagationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationModel::Friis => write!(f, "Friis"),
            PropagationModel::LogDistance => write!(f, "Log-distance"),
            PropagationModel::Itu => write!(f, "ITU"),
        }
    }
}

impl FromStr for PropagationModel {
    type Err = ReplayError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "friis" | "friispropagationlossmodel" => Ok(PropagationModel::Friis),
            "log-distance" | "logdistance" | "logdistancepropagationlossmodel" => Ok(PropagationModel::LogDistance),
            "itu" | "itupropagationlossmodel" => Ok(PropagationModel::Itu),
            _ => Err(ReplayError::UnknownPropagationModel(name.to_string())),
        }
    }
}

impl TryFrom<String> for PropagationModel {
    type Error = ReplayError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Wavelength (m) of a carrier given in GHz.
fn wavelength(frequency_ghz: f64) -> f64 {
    SPEED_OF_LIGHT / (frequency_ghz * 1e9)
}

/// Free-space path loss (dB) at `distance` metres.
///
/// # Formula
///
/// ```text
/// PL(d) = 10 × log₁₀((4πd / λ)²),  λ = c / f
/// ```
///
/// Distances below [`MIN_PATH_LOSS_DISTANCE`] (including zero) are evaluated
/// at that minimum, so `path_loss(f, 0.0) == path_loss(f, 0.1)`.
pub fn path_loss(frequency_ghz: f64, distance: f64) -> f64 {
    let distance = distance.max(MIN_PATH_LOSS_DISTANCE);
    let lambda = wavelength(frequency_ghz);
    let numerator = (4.0 * PI * distance).powi(2);
    let denominator = lambda.powi(2);
    10.0 * (numerator / denominator).log10()
}

/// Invert the Friis transmission equation.
///
/// ```text
/// G    = P_tx + G_tx + G_rx
/// d    = λ / 4π × sqrt(10^(|S − G| / 10) / L),  L = 2
/// ```
pub fn friis_distance(signal_level: f64, tx_power: f64, tx_gain: f64, rx_gain: f64, frequency_ghz: f64) -> f64 {
    let gains = rx_gain + tx_gain + tx_power;
    let lambda = wavelength(frequency_ghz);
    let numerator = 10f64.powf((signal_level - gains).abs() / 10.0);
    (lambda / (4.0 * PI)) * (numerator / FRIIS_SYSTEM_LOSS).sqrt()
}

/// Invert the log-distance model anchored at 1 m with exponent 2.
pub fn log_distance_distance(signal_level: f64, tx_power: f64, tx_gain: f64, rx_gain: f64, frequency_ghz: f64) -> f64 {
    let gains = rx_gain + tx_gain + tx_power;
    let reference_loss = path_loss(frequency_ghz, LOG_DISTANCE_REFERENCE);
    let rssi = gains - signal_level - reference_loss;
    let exponent = 10.0 * LOG_DISTANCE_EXPONENT;
    10f64.powf((rssi + exponent * LOG_DISTANCE_REFERENCE.log10()) / exponent)
}

/// Invert the ITU indoor model. Frequency enters the formula in MHz.
///
/// ```text
/// d = 10^((−20 log₁₀ f + 28 + |S − G| − L_f × n) / N),  N = 32
/// ```
pub fn itu_distance(signal_level: f64, tx_power: f64, tx_gain: f64, rx_gain: f64, frequency_ghz: f64) -> f64 {
    let gains = tx_power + tx_gain + rx_gain;
    let frequency_mhz = frequency_ghz * 1e3;
    let exponent = -20.0 * frequency_mhz.log10() - ITU_FLOOR_PENETRATION_LOSS * ITU_FLOORS + 28.0 + (signal_level - gains).abs();
    10f64.powf(exponent / ITU_POWER_LOSS_COEFFICIENT)
}

/// Distance between a station and the access point it hears at `signal_level`.
///
/// The access point is the transmitter (its power and gain), the station the
/// receiver (its gain and operating frequency).
///
/// # Returns
///
/// The estimated distance in metres, or [`ReplayError::NonPhysicalDistance`]
/// when the model yields a non-finite or non-positive value.
pub fn calculate_distance(station: &RadioParams, access_point: &RadioParams, signal_level: f64, model: PropagationModel) -> Result<f64, ReplayError> {
    let distance = model.estimate_distance(
        signal_level,
        access_point.tx_power,
        access_point.antenna_gain,
        station.antenna_gain,
        station.frequency,
    );
    if !distance.is_finite() || distance <= 0.0 {
        return Err(ReplayError::NonPhysicalDistance { model, distance });
    }
    Ok(distance)
}
