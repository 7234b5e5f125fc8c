//! Trace replay drivers and the engine that runs them.
//!
//! Three independent drivers play back per-node queues recorded during a capture:
//! - `position`: moves stations through their recorded positions at `1 / speed` second steps
//! - `bandwidth`: applies recorded bandwidth samples to the link shaper
//! - `rssi`: turns recorded RSSI samples into station placement and full link shaping
//!
//! ## Module Organization
//!
//! - `clock`: per-driver elapsed-time gate and the shared stop token
//! - `driver`: the `ReplayDriver` trait and the poll loop every driver runs in
//! - `engine`: builds the enabled drivers and runs each on its own named thread
//!
//! Every driver owns a private working set derived once from a registry
//! snapshot. Nodes are shared only through their per-node locks.

pub mod bandwidth;
pub mod clock;
pub mod driver;
pub mod engine;
pub mod position;
pub mod rssi;

pub use bandwidth::BandwidthReplay;
pub use clock::{StopToken, TraceClock};
pub use driver::{DriverKind, DriverOutcome, DriverReport, ReplayDriver, drive};
pub use engine::{ReplayEngine, ReplayHandle};
pub use position::PositionReplay;
pub use rssi::{RssiCollaborators, RssiReplay};
