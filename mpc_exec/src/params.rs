//! # MPC Executable Parameters
//!
//! This module provide parameters for the MPC executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MpcExecParams {

    /// Expected period between two telemetry events. Cycles which take longer than this to
    /// process are reported as overruns.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Delay applied before each response is sent, used to reproduce the actuation latency of a
    /// real vehicle.
    ///
    /// Units: milliseconds
    pub artificial_latency_ms: u64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum MpcExecParamsError {
    #[error("The cycle period must be finite and positive, found {0}")]
    InvalidCyclePeriod(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl MpcExecParams {
    /// Check that the parameters can be used to run the main loop.
    pub fn validate(&self) -> Result<(), MpcExecParamsError> {
        if !self.cycle_period_s.is_finite() || self.cycle_period_s <= 0.0 {
            return Err(MpcExecParamsError::InvalidCyclePeriod(self.cycle_period_s))
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        let mut params = MpcExecParams {
            cycle_period_s: 0.1,
            artificial_latency_ms: 100
        };
        assert_eq!(params.validate(), Ok(()));

        for &period in [0.0, -0.1, std::f64::NAN, std::f64::INFINITY].iter() {
            params.cycle_period_s = period;
            assert!(matches!(
                params.validate(),
                Err(MpcExecParamsError::InvalidCyclePeriod(_))
            ));
        }
    }

    #[test]
    fn test_params_from_toml() {
        let toml_str = std::fs::read_to_string(
            concat!(env!("CARGO_MANIFEST_DIR"), "/../params/mpc_exec.toml")
        ).unwrap();
        let params: MpcExecParams = util::params::from_str(&toml_str).unwrap();

        assert_eq!(params.validate(), Ok(()));
    }
}
