//! MPC control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Internal
use util::maths::deg_to_rad;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for MPC control.
///
/// These are loaded once at startup and never modified afterwards.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Params {

    // ---- HORIZON ----

    /// Number of discrete steps in the prediction horizon (N)
    pub horizon_steps: usize,

    /// Time between two steps of the horizon
    ///
    /// Units: seconds
    pub timestep_s: f64,

    // ---- VEHICLE ----

    /// Distance between the vehicle's centre of mass and its front axle (Lf)
    pub lf_m: f64,

    /// Time between a command being issued and it taking effect on the vehicle
    ///
    /// Units: seconds
    pub actuation_delay_s: f64,

    /// Maximum absolute steering angle. Also the scale factor between the
    /// solved steering angle and the normalised steering command.
    ///
    /// Units: degrees
    pub max_steer_deg: f64,

    /// Maximum absolute throttle
    pub max_throttle: f64,

    /// The speed the controller tries to hold
    pub ref_speed: f64,

    // ---- COST ----

    /// Weights applied to each cost term
    pub weights: CostWeights,

    // ---- SOLVER ----

    /// Solver settings
    pub solver: SolverParams,

    // ---- REFERENCE LINE ----

    /// Number of points sampled from the reference polynomial for display
    pub ref_line_num_points: usize,

    /// Spacing along the vehicle X axis between reference line points
    pub ref_line_spacing: f64,
}

/// Weights of the terms of the MPC cost function.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Cross-track error
    pub cte: f64,

    /// Heading error
    pub epsi: f64,

    /// Deviation from the reference speed
    pub speed: f64,

    /// Steering magnitude
    pub steer: f64,

    /// Throttle magnitude
    pub throttle: f64,

    /// Change in steering between consecutive steps
    pub steer_rate: f64,

    /// Change in throttle between consecutive steps
    pub throttle_rate: f64,
}

/// Settings for the horizon optimiser.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// Maximum number of solver iterations in one cycle
    pub max_iterations: usize,

    /// Wall-clock budget for one solve. Once exceeded the best iterate so far
    /// is returned.
    ///
    /// Units: seconds
    pub max_solve_time_s: f64,

    /// Solve is converged once the norm of the fixed point residual of the
    /// projected gradient step is below this value
    pub tolerance: f64,

    /// Number of past iterates kept by the L-BFGS direction of PANOC
    pub lbfgs_memory: usize,

    /// If true the previous cycle's solution seeds the next solve
    pub warm_start: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a parameter set is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("The horizon must contain at least 2 steps, found {0}")]
    HorizonTooShort(usize),

    #[error("Parameter {0} must be finite and positive, found {1}")]
    NotPositive(&'static str, f64),

    #[error("Parameter {0} must be finite and non-negative, found {1}")]
    Negative(&'static str, f64),

    #[error("Parameter {0} must be at least 1")]
    Zero(&'static str),

    #[error("The maximum steering angle must be below 90 degrees, found {0}")]
    SteerLimitTooLarge(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Maximum absolute steering angle in radians.
    pub fn max_steer_rad(&self) -> f64 {
        deg_to_rad(self.max_steer_deg)
    }

    /// Check that the parameters describe a solvable problem.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.horizon_steps < 2 {
            return Err(ParamsError::HorizonTooShort(self.horizon_steps))
        }

        let positive = [
            ("timestep_s", self.timestep_s),
            ("lf_m", self.lf_m),
            ("max_steer_deg", self.max_steer_deg),
            ("max_throttle", self.max_throttle),
            ("solver.max_solve_time_s", self.solver.max_solve_time_s),
            ("solver.tolerance", self.solver.tolerance),
            ("ref_line_spacing", self.ref_line_spacing),
        ];
        for &(name, val) in positive.iter() {
            if !val.is_finite() || val <= 0.0 {
                return Err(ParamsError::NotPositive(name, val))
            }
        }

        let non_negative = [
            ("actuation_delay_s", self.actuation_delay_s),
            ("ref_speed", self.ref_speed),
            ("weights.cte", self.weights.cte),
            ("weights.epsi", self.weights.epsi),
            ("weights.speed", self.weights.speed),
            ("weights.steer", self.weights.steer),
            ("weights.throttle", self.weights.throttle),
            ("weights.steer_rate", self.weights.steer_rate),
            ("weights.throttle_rate", self.weights.throttle_rate),
        ];
        for &(name, val) in non_negative.iter() {
            if !val.is_finite() || val < 0.0 {
                return Err(ParamsError::Negative(name, val))
            }
        }

        let counts = [
            ("solver.max_iterations", self.solver.max_iterations),
            ("solver.lbfgs_memory", self.solver.lbfgs_memory),
            ("ref_line_num_points", self.ref_line_num_points),
        ];
        for &(name, val) in counts.iter() {
            if val == 0 {
                return Err(ParamsError::Zero(name))
            }
        }

        if self.max_steer_deg >= 90.0 {
            return Err(ParamsError::SteerLimitTooLarge(self.max_steer_deg))
        }

        Ok(())
    }
}

impl Default for Params {
    /// The reference configuration.
    fn default() -> Self {
        Self {
            horizon_steps: 10,
            timestep_s: 0.1,
            lf_m: 2.67,
            actuation_delay_s: 0.1,
            max_steer_deg: 25.0,
            max_throttle: 1.0,
            ref_speed: 40.0,
            weights: CostWeights::default(),
            solver: SolverParams::default(),
            ref_line_num_points: 25,
            ref_line_spacing: 2.5,
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steer: 5.0,
            throttle: 5.0,
            steer_rate: 200.0,
            throttle_rate: 10.0,
        }
    }
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_solve_time_s: 0.05,
            tolerance: 1e-3,
            lbfgs_memory: 10,
            warm_start: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        let params = Params::default();
        assert_eq!(params.validate(), Ok(()));
        assert!((params.max_steer_rad() - 0.436332).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_params() {
        let mut params = Params::default();
        params.horizon_steps = 1;
        assert_eq!(params.validate(), Err(ParamsError::HorizonTooShort(1)));

        let mut params = Params::default();
        params.timestep_s = 0.0;
        assert_eq!(params.validate(), Err(ParamsError::NotPositive("timestep_s", 0.0)));

        let mut params = Params::default();
        params.max_steer_deg = -25.0;
        assert_eq!(params.validate(), Err(ParamsError::NotPositive("max_steer_deg", -25.0)));

        let mut params = Params::default();
        params.weights.steer_rate = -1.0;
        assert_eq!(
            params.validate(),
            Err(ParamsError::Negative("weights.steer_rate", -1.0))
        );

        let mut params = Params::default();
        params.max_steer_deg = 95.0;
        assert_eq!(params.validate(), Err(ParamsError::SteerLimitTooLarge(95.0)));

        let mut params = Params::default();
        params.solver.max_solve_time_s = std::f64::NAN;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::NotPositive("solver.max_solve_time_s", _))
        ));

        let mut params = Params::default();
        params.solver.lbfgs_memory = 0;
        assert_eq!(params.validate(), Err(ParamsError::Zero("solver.lbfgs_memory")));
    }

    #[test]
    fn test_params_from_toml() {
        let toml_str = std::fs::read_to_string(
            concat!(env!("CARGO_MANIFEST_DIR"), "/../params/mpc_ctrl.toml")
        ).unwrap();
        let params: Params = util::params::from_str(&toml_str).unwrap();

        assert_eq!(params, Params::default());
    }
}
