//! # Horizon cost
//!
//! The optimisation problem of one cycle, posed as a bounded nonlinear least
//! squares problem over the actuator sequence only. States are eliminated by
//! rolling the kinematic model forward from the compensated initial state, so
//! every predicted trajectory satisfies the dynamics exactly.
//!
//! The decision vector `u` has length `2N`, with `u[2t]` the steering angle and
//! `u[2t + 1]` the throttle applied over step `t`.
//!
//! Residual layout (each residual is pre-multiplied by the square root of its
//! weight so that the cost is the plain sum of squares):
//!
//! | Rows                 | Term                                   |
//! |----------------------|----------------------------------------|
//! | `3(t-1) + 0..3`      | cte, epsi and speed error of state `t`, `t = 1..N` |
//! | `3N + 2t + 0..2`     | steering and throttle at step `t`      |
//! | `5N + 2t + 0..2`     | steering and throttle change from `t` to `t + 1` |

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector, Vector6};

// Internal
use super::{Actuators, CostWeights, KinematicModel, MpcState, Params, Polynomial};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The least squares problem solved by the optimiser in one cycle.
pub struct HorizonProblem<'a> {
    model: KinematicModel,
    poly: &'a Polynomial,
    init: MpcState,
    num_steps: usize,
    dt: f64,
    ref_speed: f64,
    sqrt_weights: CostWeights,
}

/// Residuals and their Jacobian evaluated at one decision vector.
pub struct Linearisation {
    /// Predicted states `s_0..s_N`
    pub states: Vec<MpcState>,

    pub residuals: DVector<f64>,

    pub jacobian: DMatrix<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> HorizonProblem<'a> {
    pub fn new(init: MpcState, poly: &'a Polynomial, params: &Params) -> Self {
        let w = &params.weights;

        Self {
            model: KinematicModel::new(params.lf_m),
            poly,
            init,
            num_steps: params.horizon_steps,
            dt: params.timestep_s,
            ref_speed: params.ref_speed,
            sqrt_weights: CostWeights {
                cte: w.cte.sqrt(),
                epsi: w.epsi.sqrt(),
                speed: w.speed.sqrt(),
                steer: w.steer.sqrt(),
                throttle: w.throttle.sqrt(),
                steer_rate: w.steer_rate.sqrt(),
                throttle_rate: w.throttle_rate.sqrt(),
            },
        }
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_vars(&self) -> usize {
        2 * self.num_steps
    }

    pub fn num_residuals(&self) -> usize {
        7 * self.num_steps - 2
    }

    /// Predict the states `s_0..s_N` produced by the decision vector `u`.
    pub fn rollout(&self, u: &DVector<f64>) -> Vec<MpcState> {
        let mut states = Vec::with_capacity(self.num_steps + 1);
        states.push(self.init);

        for t in 0..self.num_steps {
            let next = self.model.propagate(
                &states[t],
                &actuators_at(u, t),
                self.poly,
                self.dt
            );
            states.push(next);
        }

        states
    }

    /// Evaluate the weighted residual vector.
    pub fn residuals(&self, u: &DVector<f64>) -> DVector<f64> {
        self.residuals_from_states(u, &self.rollout(u))
    }

    /// Evaluate the cost, the sum of the squared weighted residuals.
    pub fn cost(&self, u: &DVector<f64>) -> f64 {
        self.residuals(u).norm_squared()
    }

    /// Evaluate the residuals and their Jacobian with respect to `u`.
    ///
    /// The state sensitivities are propagated alongside the rollout as
    /// `S_{t+1} = A_t S_t + B_t E_t`, where `E_t` selects the actuators of step
    /// `t`.
    pub fn linearise(&self, u: &DVector<f64>) -> Linearisation {
        let n = self.num_steps;
        let w = &self.sqrt_weights;
        let states = self.rollout(u);
        let residuals = self.residuals_from_states(u, &states);

        let mut jacobian = DMatrix::zeros(self.num_residuals(), self.num_vars());

        // One column per decision variable, s_0 does not depend on u
        let mut sens = vec![Vector6::<f64>::zeros(); self.num_vars()];

        for t in 0..n {
            let s = &states[t];
            let a = self.model.state_jacobian(s, &actuators_at(u, t), self.poly, self.dt);
            let b = self.model.input_jacobian(s, self.dt);

            // Only variables of steps before t affect s_t
            for col in sens.iter_mut().take(2 * t) {
                *col = a * *col;
            }
            sens[2 * t] = b.column(0).into_owned();
            sens[2 * t + 1] = b.column(1).into_owned();

            let row = 3 * t;
            for (j, col) in sens.iter().enumerate().take(2 * (t + 1)) {
                jacobian[(row, j)] = w.cte * col[4];
                jacobian[(row + 1, j)] = w.epsi * col[5];
                jacobian[(row + 2, j)] = w.speed * col[3];
            }
        }

        for t in 0..n {
            let row = 3 * n + 2 * t;
            jacobian[(row, 2 * t)] = w.steer;
            jacobian[(row + 1, 2 * t + 1)] = w.throttle;
        }

        for t in 0..n - 1 {
            let row = 5 * n + 2 * t;
            jacobian[(row, 2 * t)] = -w.steer_rate;
            jacobian[(row, 2 * (t + 1))] = w.steer_rate;
            jacobian[(row + 1, 2 * t + 1)] = -w.throttle_rate;
            jacobian[(row + 1, 2 * (t + 1) + 1)] = w.throttle_rate;
        }

        Linearisation {
            states,
            residuals,
            jacobian,
        }
    }

    fn residuals_from_states(&self, u: &DVector<f64>, states: &[MpcState]) -> DVector<f64> {
        let n = self.num_steps;
        let w = &self.sqrt_weights;
        let mut r = DVector::zeros(self.num_residuals());

        for (t, s) in states.iter().enumerate().skip(1) {
            let row = 3 * (t - 1);
            r[row] = w.cte * s.cte;
            r[row + 1] = w.epsi * s.epsi;
            r[row + 2] = w.speed * (s.v - self.ref_speed);
        }

        for t in 0..n {
            let row = 3 * n + 2 * t;
            r[row] = w.steer * u[2 * t];
            r[row + 1] = w.throttle * u[2 * t + 1];
        }

        for t in 0..n - 1 {
            let row = 5 * n + 2 * t;
            r[row] = w.steer_rate * (u[2 * (t + 1)] - u[2 * t]);
            r[row + 1] = w.throttle_rate * (u[2 * (t + 1) + 1] - u[2 * t + 1]);
        }

        r
    }
}

impl Linearisation {
    /// Value of the cost at the linearisation point.
    pub fn cost(&self) -> f64 {
        self.residuals.norm_squared()
    }

    /// Gradient of the cost with respect to `u`, `2 J^T r`.
    pub fn gradient(&self) -> DVector<f64> {
        self.jacobian.tr_mul(&self.residuals) * 2.0
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Actuators of step `t` in the decision vector.
pub fn actuators_at(u: &DVector<f64>, t: usize) -> Actuators {
    Actuators::new(u[2 * t], u[2 * t + 1])
}
