//! # Horizon optimiser
//!
//! Solves the bounded problem of [`HorizonProblem`] with PANOC from
//! `optimization_engine`. The actuator limits form a box constraint, the cost
//! is the sum of squared weighted residuals and its gradient is `2 J^T r`, with
//! `J` propagated through the rollout.
//!
//! The solve is capped both in iterations and in wall-clock time. Whenever it
//! stops early the last iterate is returned, tagged with the reason in
//! [`SolveStatus`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nalgebra::DVector;
use optimization_engine::{
    constraints::Rectangle,
    panoc::{PANOCCache, PANOCOptimizer},
    core::{ExitStatus, SolverStatus},
    Optimizer, Problem, SolverError};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal
use super::{Actuators, HorizonProblem, MpcState, Params, Polynomial, SolverParams};
use super::cost::actuators_at;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A solver for the horizon problem of one cycle.
pub trait Optimiser {
    /// Find the actuator sequence minimising the horizon cost starting from
    /// `init`, tracking `poly`.
    fn solve(
        &mut self,
        init: &MpcState,
        poly: &Polynomial,
        params: &Params
    ) -> Result<Solution, OptimiserError>;

    /// Forget any state carried over from previous solves.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The result of one solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Actuators for each step of the horizon, `a_0..a_{N-1}`
    pub actuators: Vec<Actuators>,

    /// Predicted states, `s_0..s_N`
    pub states: Vec<MpcState>,

    pub status: SolveStatus,

    pub iterations: usize,

    /// Final value of the cost function
    pub cost: f64,

    pub solve_time_s: f64,
}

/// PANOC optimiser with an optional warm start from the previous cycle's
/// solution.
#[derive(Debug, Default, Clone)]
pub struct PanocOptimiser {
    /// Initial guess for the next solve, already shifted by one step
    warm_start: Option<DVector<f64>>,
}

/// Box bounds on the decision vector.
struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The reason the solver stopped.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub enum SolveStatus {
    /// Fixed point residual below the solver tolerance
    Converged,

    /// Iteration cap reached
    IterationLimit,

    /// Wall-clock budget exceeded
    TimeBudgetExceeded,
}

#[derive(Debug, Error)]
pub enum OptimiserError {
    #[error("The horizon must contain at least 2 steps, found {0}")]
    HorizonTooShort(usize),

    #[error("Solver setting {0} is out of range: {1}")]
    InvalidSetting(&'static str, f64),

    #[error("The initial state is not finite: {0:?}")]
    NonFiniteInitialState(MpcState),

    #[error("The reference polynomial has non-finite coefficients")]
    NonFinitePolynomial,

    #[error("The solver failed: {0:?}")]
    SolverFailed(SolverError),

    #[error("The solver returned a non-finite solution (cost {0})")]
    NonFiniteSolution(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Solution {
    /// Actuators to apply now.
    pub fn first_actuators(&self) -> Actuators {
        self.actuators.first().copied().unwrap_or_default()
    }

    /// Predicted positions `(x_1..x_N, y_1..y_N)` in the vehicle frame.
    pub fn predicted_xy(&self) -> (Vec<f64>, Vec<f64>) {
        self.states.iter().skip(1).map(|s| (s.x, s.y)).unzip()
    }

    pub fn is_finite(&self) -> bool {
        self.cost.is_finite()
            && self.states.iter().all(|s| s.is_finite())
            && self.actuators.iter().all(|a| a.steer_rad.is_finite() && a.throttle.is_finite())
    }
}

impl PanocOptimiser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the next solve will be seeded from a previous solution.
    pub fn is_warm(&self) -> bool {
        self.warm_start.is_some()
    }

    /// Initial guess, either the warm start or all zeros, clamped onto the
    /// bounds.
    fn initial_guess(&self, num_vars: usize, bounds: &Bounds) -> DVector<f64> {
        let mut u = match self.warm_start {
            Some(ref w) if w.len() == num_vars => w.clone(),
            _ => DVector::zeros(num_vars)
        };
        bounds.clamp(&mut u);
        u
    }

    /// Store the solution shifted by one step, repeating the last actuators.
    fn store_warm_start(&mut self, u: &DVector<f64>) {
        let n = u.len();
        let mut shifted = DVector::zeros(n);
        for i in 0..n {
            shifted[i] = u[(i + 2).min(n - 2 + i % 2)];
        }
        self.warm_start = Some(shifted);
    }
}

impl Optimiser for PanocOptimiser {
    fn solve(
        &mut self,
        init: &MpcState,
        poly: &Polynomial,
        params: &Params
    ) -> Result<Solution, OptimiserError> {
        let start = Instant::now();

        if params.horizon_steps < 2 {
            return Err(OptimiserError::HorizonTooShort(params.horizon_steps))
        }
        check_settings(&params.solver)?;
        if !init.is_finite() {
            return Err(OptimiserError::NonFiniteInitialState(*init))
        }
        if !poly.is_finite() {
            return Err(OptimiserError::NonFinitePolynomial)
        }

        let budget = Duration::from_secs_f64(params.solver.max_solve_time_s);
        let problem = HorizonProblem::new(*init, poly, params);
        let num_vars = problem.num_vars();
        let bounds = Bounds::new(params, num_vars);

        let mut u = self.initial_guess(num_vars, &bounds);
        let mut result = run_panoc(&problem, &bounds, &params.solver, budget, &mut u);

        // A warm start can land in a region where the model blows up, retry
        // from rest with whatever budget is left
        if let Err(e) = result {
            if self.is_warm() {
                debug!("Warm started solve failed ({:?}), retrying from rest", e);
                self.reset();
                u = self.initial_guess(num_vars, &bounds);
                let remaining = budget.checked_sub(start.elapsed()).unwrap_or_default();
                result = run_panoc(&problem, &bounds, &params.solver, remaining, &mut u);
            }
        }

        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                self.reset();
                return Err(OptimiserError::SolverFailed(e))
            }
        };

        let status = match exit.exit_status() {
            ExitStatus::Converged => SolveStatus::Converged,
            ExitStatus::NotConvergedIterations => SolveStatus::IterationLimit,
            ExitStatus::NotConvergedOutOfTime => SolveStatus::TimeBudgetExceeded,
        };

        let lin = problem.linearise(&u);
        let cost = lin.cost();
        if !cost.is_finite() {
            self.reset();
            return Err(OptimiserError::NonFiniteSolution(cost))
        }

        if params.solver.warm_start && status == SolveStatus::Converged {
            self.store_warm_start(&u);
        }
        else {
            self.reset();
        }

        let solution = Solution {
            actuators: (0..problem.num_steps()).map(|t| actuators_at(&u, t)).collect(),
            states: lin.states,
            status,
            iterations: exit.iterations(),
            cost,
            solve_time_s: start.elapsed().as_secs_f64(),
        };

        debug!(
            "Solve finished: {:?} after {} iterations in {:.2} ms, cost {:.4e}, fpr {:.3e}",
            solution.status,
            solution.iterations,
            solution.solve_time_s * 1000.0,
            solution.cost,
            exit.norm_fpr()
        );

        Ok(solution)
    }

    fn reset(&mut self) {
        self.warm_start = None;
    }
}

impl Bounds {
    fn new(params: &Params, num_vars: usize) -> Self {
        let max_steer = params.max_steer_rad();
        let max_throttle = params.max_throttle;

        let upper: Vec<f64> = (0..num_vars)
            .map(|i| if i % 2 == 0 { max_steer } else { max_throttle })
            .collect();

        Self {
            lower: upper.iter().map(|b| -b).collect(),
            upper,
        }
    }

    fn clamp(&self, u: &mut DVector<f64>) {
        for i in 0..u.len() {
            u[i] = u[i].max(self.lower[i]).min(self.upper[i]);
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Check the solver settings, which would otherwise make the solver panic.
fn check_settings(settings: &SolverParams) -> Result<(), OptimiserError> {
    let positive = [
        ("max_solve_time_s", settings.max_solve_time_s),
        ("tolerance", settings.tolerance),
        ("max_iterations", settings.max_iterations as f64),
        ("lbfgs_memory", settings.lbfgs_memory as f64),
    ];
    for &(name, val) in positive.iter() {
        if !val.is_finite() || val <= 0.0 {
            return Err(OptimiserError::InvalidSetting(name, val))
        }
    }

    Ok(())
}

/// Run PANOC on `problem` from `u`, leaving the last iterate in `u`.
fn run_panoc(
    problem: &HorizonProblem,
    bounds: &Bounds,
    settings: &SolverParams,
    budget: Duration,
    u: &mut DVector<f64>
) -> Result<SolverStatus, SolverError> {
    let cost = |u: &[f64], c: &mut f64| -> Result<(), SolverError> {
        *c = problem.cost(&DVector::from_column_slice(u));
        if c.is_finite() { Ok(()) } else { Err(SolverError::NotFiniteComputation) }
    };

    let gradient = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
        let g = problem.linearise(&DVector::from_column_slice(u)).gradient();
        if !g.iter().all(|v| v.is_finite()) {
            return Err(SolverError::NotFiniteComputation)
        }
        grad.copy_from_slice(g.as_slice());
        Ok(())
    };

    let rect = Rectangle::new(Some(bounds.lower.as_slice()), Some(bounds.upper.as_slice()));
    let panoc_problem = Problem::new(&rect, gradient, cost);
    let mut cache = PANOCCache::new(u.len(), settings.tolerance, settings.lbfgs_memory);

    let mut panoc = PANOCOptimizer::new(panoc_problem, &mut cache)
        .with_max_iter(settings.max_iterations)
        .with_max_duration(budget);

    panoc.solve(u.as_mut_slice())
}
