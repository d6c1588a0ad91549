//! # MPC library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to
//! access items defined inside the MPC executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// MPC control module - computes steering and throttle demands to follow the waypoints
pub mod mpc_ctrl;
