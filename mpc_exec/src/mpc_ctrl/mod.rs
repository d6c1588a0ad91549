//! # Model predictive control module
//!
//! Computes steering and throttle demands for a vehicle following a sequence
//! of waypoints. Each cycle:
//!
//!  1. The waypoints are moved into the vehicle frame.
//!  1. A cubic polynomial is fitted through them as the reference path.
//!  1. The measured state is advanced over the actuation delay.
//!  1. The actuator sequence over the prediction horizon is optimised against
//!     the kinematic bicycle model.
//!  1. The first actuator pair is normalised and sent along with the predicted
//!     and reference trajectories.
//!
//! Any failure rejects the cycle only, in which case the previous demands
//! should be held.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod cost;
mod frame;
mod latency;
mod model;
mod optimiser;
mod packager;
mod params;
mod poly;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use cost::*;
pub use frame::*;
pub use latency::compensate;
pub use model::*;
pub use optimiser::*;
pub use packager::{package, sample_ref_line};
pub use params::*;
pub use poly::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during MpcCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),

    #[error("Could not fit the reference polynomial: {0}")]
    PolyFitError(#[from] PolyFitError),

    #[error("Optimisation failed: {0}")]
    OptimiserError(#[from] OptimiserError),

    #[error("The solution produced a non-finite command")]
    NonFiniteCommand,

    #[error("Could not load the parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Could not create the status report archive: {0}")]
    ArchiveInitError(String),
}
