//! # Communications interface crate.
//!
//! Provides the data exchanged between the controller and the simulator.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Telemetry and steering command definitions, plus the simulator's event envelope
pub mod sim;
