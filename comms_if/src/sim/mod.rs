//! # Simulator Interface
//!
//! This module defines the structures exchanged with the vehicle simulator on each cycle.
//! Telemetry flows from the simulator into the controller and a steering command flows back.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod event;

pub use event::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry sent by the simulator once per cycle.
///
/// All positions are in the world frame. Fields the simulator sends which are not listed here are
/// ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// X coordinates of the reference waypoints, in path order.
    pub ptsx: Vec<f64>,

    /// Y coordinates of the reference waypoints, in path order.
    pub ptsy: Vec<f64>,

    /// Vehicle X position
    pub x: f64,

    /// Vehicle Y position
    pub y: f64,

    /// Vehicle heading
    ///
    /// Units: radians
    pub psi: f64,

    /// Vehicle scalar speed
    pub speed: f64,

    /// The steering angle currently applied to the vehicle.
    ///
    /// Units: radians
    pub steering_angle: f64,

    /// The throttle currently applied to the vehicle, in the range [-1, 1].
    pub throttle: f64,
}

/// Steering command returned to the simulator.
///
/// The trajectory sequences are all in the vehicle frame and are only used for display.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SteerCmd {
    /// Normalised steering demand in the range [-1, 1].
    pub steering_angle: f64,

    /// Throttle demand in the range [-1, 1].
    pub throttle: f64,

    /// X coordinates of the trajectory predicted by the controller
    pub mpc_x: Vec<f64>,

    /// Y coordinates of the trajectory predicted by the controller
    pub mpc_y: Vec<f64>,

    /// X coordinates of the sampled reference line
    pub next_x: Vec<f64>,

    /// Y coordinates of the sampled reference line
    pub next_y: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Telemetry {
    /// Return the number of waypoints, or `None` if the X and Y sequences differ in length.
    pub fn num_waypoints(&self) -> Option<usize> {
        if self.ptsx.len() == self.ptsy.len() {
            Some(self.ptsx.len())
        }
        else {
            None
        }
    }
}

impl SteerCmd {
    /// Build a command which only holds the given actuator demands, with no trajectories for
    /// display.
    pub fn hold(steering_angle: f64, throttle: f64) -> Self {
        Self {
            steering_angle,
            throttle,
            ..Default::default()
        }
    }
}
