//! # Result packaging
//!
//! Converts a solution into the command sent back to the simulator.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::sim::SteerCmd;

// Internal
use super::{Params, Polynomial, Solution};
use util::maths::lin_map;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the steering command for a solution.
///
/// The steering angle is normalised by the steering limit so that it lies in
/// `[-1, 1]`, throttle is passed through unchanged.
pub fn package(solution: &Solution, poly: &Polynomial, params: &Params) -> SteerCmd {
    let first = solution.first_actuators();
    let max_steer = params.max_steer_rad();
    let (mpc_x, mpc_y) = solution.predicted_xy();
    let (next_x, next_y) = sample_ref_line(poly, params);

    SteerCmd {
        steering_angle: lin_map((-max_steer, max_steer), (-1.0, 1.0), first.steer_rad),
        throttle: first.throttle,
        mpc_x,
        mpc_y,
        next_x,
        next_y,
    }
}

/// Sample the reference polynomial at a fixed stride along the vehicle X axis,
/// starting from the origin.
pub fn sample_ref_line(poly: &Polynomial, params: &Params) -> (Vec<f64>, Vec<f64>) {
    (0..params.ref_line_num_points)
        .map(|i| {
            let x = i as f64 * params.ref_line_spacing;
            (x, poly.eval(x))
        })
        .unzip()
}
