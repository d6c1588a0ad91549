//! # Actuation latency compensation
//!
//! Commands reach the vehicle some time after the telemetry they were computed
//! from was sampled. The optimiser is therefore started from the state the
//! vehicle is predicted to be in once the command is applied.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use super::{Actuators, KinematicModel, MpcState, Polynomial};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Predict the state after `delay_s` seconds under the currently applied
/// actuators.
///
/// A zero delay returns the measured state unchanged.
pub fn compensate(
    model: &KinematicModel,
    measured: &MpcState,
    applied: &Actuators,
    poly: &Polynomial,
    delay_s: f64
) -> MpcState {
    if delay_s <= 0.0 {
        return *measured
    }

    model.propagate(measured, applied, poly, delay_s)
}
