//! # Kinematic bicycle model
//!
//! Discretised motion model shared by the latency compensation and the horizon
//! optimiser. The state is expressed in the vehicle frame of the current cycle
//! and carries the tracking errors against the reference polynomial alongside
//! the pose.
//!
//! Positive steering turns the vehicle clockwise (to the right), so heading
//! changes with the negative of the steering angle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Matrix6, Matrix6x2, Vector6};
use serde::Serialize;

// Internal
use super::Polynomial;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State of the vehicle as seen by the optimiser.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct MpcState {
    pub x: f64,
    pub y: f64,

    /// Heading
    ///
    /// Units: radians
    pub psi: f64,

    /// Speed
    pub v: f64,

    /// Cross-track error, positive when the path is to the left of the vehicle
    pub cte: f64,

    /// Heading error to the path tangent
    ///
    /// Units: radians
    pub epsi: f64,
}

/// A pair of actuator demands in native units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct Actuators {
    /// Steering angle
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// Throttle, treated by the model as an acceleration
    pub throttle: f64,
}

/// The kinematic bicycle model.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KinematicModel {
    /// Distance from the centre of mass to the front axle
    pub lf_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MpcState {
    /// Build the state of a vehicle sitting at the origin of its own frame
    /// with the given speed.
    ///
    /// The cross-track error is the polynomial's value at the origin and the
    /// heading error is the negated angle of its tangent there.
    pub fn at_origin(v: f64, poly: &Polynomial) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v,
            cte: poly.eval(0.0),
            epsi: -poly.eval_deriv(0.0).atan(),
        }
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(self.x, self.y, self.psi, self.v, self.cte, self.epsi)
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self {
            x: v[0],
            y: v[1],
            psi: v[2],
            v: v[3],
            cte: v[4],
            epsi: v[5],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|e| e.is_finite())
    }
}

impl Actuators {
    pub fn new(steer_rad: f64, throttle: f64) -> Self {
        Self { steer_rad, throttle }
    }
}

impl KinematicModel {
    pub fn new(lf_m: f64) -> Self {
        Self { lf_m }
    }

    /// Advance the state by one Euler step of length `dt`.
    pub fn propagate(
        &self,
        s: &MpcState,
        u: &Actuators,
        poly: &Polynomial,
        dt: f64
    ) -> MpcState {
        let turn = s.v * u.steer_rad / self.lf_m * dt;

        MpcState {
            x: s.x + s.v * s.psi.cos() * dt,
            y: s.y + s.v * s.psi.sin() * dt,
            psi: s.psi - turn,
            v: s.v + u.throttle * dt,
            cte: poly.eval(s.x) - s.y + s.v * s.epsi.sin() * dt,
            epsi: s.psi - poly.eval_deriv(s.x).atan() - turn,
        }
    }

    /// Jacobian of `propagate` with respect to the state, in the order
    /// (x, y, psi, v, cte, epsi).
    pub fn state_jacobian(
        &self,
        s: &MpcState,
        u: &Actuators,
        poly: &Polynomial,
        dt: f64
    ) -> Matrix6<f64> {
        let (sin_psi, cos_psi) = s.psi.sin_cos();
        let turn_v = -u.steer_rad / self.lf_m * dt;

        // d/dx atan(f'(x)) = f''(x) / (1 + f'(x)^2)
        let df = poly.eval_deriv(s.x);
        let d_tangent = poly.eval_deriv2(s.x) / (1.0 + df * df);

        #[rustfmt::skip]
        let jac = Matrix6::new(
            1.0, 0.0, -s.v * sin_psi * dt, cos_psi * dt,        0.0, 0.0,
            0.0, 1.0, s.v * cos_psi * dt,  sin_psi * dt,        0.0, 0.0,
            0.0, 0.0, 1.0,                 turn_v,              0.0, 0.0,
            0.0, 0.0, 0.0,                 1.0,                 0.0, 0.0,
            df,  -1.0, 0.0,                s.epsi.sin() * dt,   0.0, s.v * s.epsi.cos() * dt,
            -d_tangent, 0.0, 1.0,          turn_v,              0.0, 0.0,
        );

        jac
    }

    /// Jacobian of `propagate` with respect to the actuators, columns are
    /// (steering, throttle).
    pub fn input_jacobian(&self, s: &MpcState, dt: f64) -> Matrix6x2<f64> {
        let turn_delta = -s.v / self.lf_m * dt;

        #[rustfmt::skip]
        let jac = Matrix6x2::new(
            0.0,        0.0,
            0.0,        0.0,
            turn_delta, 0.0,
            0.0,        dt,
            0.0,        0.0,
            turn_delta, 0.0,
        );

        jac
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_poly() -> Polynomial {
        Polynomial::new(vec![0.4, -0.05, 0.01, -0.0004])
    }

    #[test]
    fn test_straight_motion() {
        let model = KinematicModel::new(2.67);
        let poly = Polynomial::new(vec![0.0; 4]);
        let s = MpcState { v: 10.0, ..Default::default() };

        let next = model.propagate(&s, &Actuators::default(), &poly, 0.1);

        assert!((next.x - 1.0).abs() < 1e-12);
        assert_eq!(next.y, 0.0);
        assert_eq!(next.psi, 0.0);
        assert_eq!(next.v, 10.0);
        assert_eq!(next.cte, 0.0);
        assert_eq!(next.epsi, 0.0);
    }

    #[test]
    fn test_positive_steer_turns_right() {
        let model = KinematicModel::new(2.67);
        let poly = Polynomial::new(vec![0.0; 4]);
        let s = MpcState { v: 10.0, ..Default::default() };

        let next = model.propagate(&s, &Actuators::new(0.2, 0.0), &poly, 0.1);
        assert!(next.psi < 0.0);

        let next = model.propagate(&s, &Actuators::new(-0.2, 0.0), &poly, 0.1);
        assert!(next.psi > 0.0);
    }

    #[test]
    fn test_jacobians_match_finite_difference() {
        let model = KinematicModel::new(2.67);
        let poly = test_poly();
        let dt = 0.1;
        let s = MpcState { x: 3.0, y: -0.2, psi: 0.15, v: 12.0, cte: 0.3, epsi: -0.1 };
        let u = Actuators::new(0.05, 0.4);
        let h = 1e-6;

        let a = model.state_jacobian(&s, &u, &poly, dt);
        for j in 0..6 {
            let mut plus = s.to_vector();
            let mut minus = s.to_vector();
            plus[j] += h;
            minus[j] -= h;
            let fd = (model.propagate(&MpcState::from_vector(&plus), &u, &poly, dt).to_vector()
                - model.propagate(&MpcState::from_vector(&minus), &u, &poly, dt).to_vector())
                / (2.0 * h);

            for i in 0..6 {
                assert!(
                    (a[(i, j)] - fd[i]).abs() < 1e-6,
                    "d{}/d{}: {} != {}", i, j, a[(i, j)], fd[i]
                );
            }
        }

        let b = model.input_jacobian(&s, dt);
        let perturb = [Actuators::new(h, 0.0), Actuators::new(0.0, h)];
        for (j, du) in perturb.iter().enumerate() {
            let plus = Actuators::new(u.steer_rad + du.steer_rad, u.throttle + du.throttle);
            let minus = Actuators::new(u.steer_rad - du.steer_rad, u.throttle - du.throttle);
            let fd = (model.propagate(&s, &plus, &poly, dt).to_vector()
                - model.propagate(&s, &minus, &poly, dt).to_vector())
                / (2.0 * h);

            for i in 0..6 {
                assert!((b[(i, j)] - fd[i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_at_origin() {
        let poly = test_poly();
        let s = MpcState::at_origin(5.0, &poly);

        assert_eq!(s.cte, 0.4);
        assert!((s.epsi - 0.05f64.atan()).abs() < 1e-12);
        assert_eq!(s.v, 5.0);
        assert!(s.is_finite());
    }
}
