//! # Reference polynomial
//!
//! The local waypoints are summarised by a least-squares polynomial, which is
//! the only description of the path used by the rest of the controller.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector, Point2};
use serde::Serialize;
use thiserror::Error;

// Internal
use util::maths::poly_val;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Order of the reference polynomial. Cubics follow gentle curves without
/// overfitting the handful of waypoints available each cycle.
pub const POLY_ORDER: usize = 3;

/// Singular values smaller than this fraction of the largest one are treated
/// as zero when fitting.
const RANK_EPSILON: f64 = 1e-12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A polynomial in x.
///
/// Coefficients are ordered lowest power first, so `coeffs[0]` is the value
/// at x = 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polynomial {
    coeffs: Vec<f64>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while fitting a polynomial.
#[derive(Debug, Error, PartialEq)]
pub enum PolyFitError {
    #[error("A polynomial of order {order} needs at least {} points, found {found}", .order + 1)]
    Underdetermined {
        order: usize,
        found: usize
    },

    #[error("Point {0} is not finite")]
    NonFinitePoint(usize),

    #[error("The points do not determine a unique polynomial (rank {rank}, need {required})")]
    Singular {
        rank: usize,
        required: usize
    },

    #[error("Least squares solve failed: {0}")]
    SolveFailed(&'static str)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Polynomial {

    /// Create a polynomial from its coefficients, lowest power first.
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }

    /// Fit a polynomial of the given order to the points using least squares.
    ///
    /// At least `order + 1` points with distinct x values are required.
    pub fn fit(points: &[Point2<f64>], order: usize) -> Result<Self, PolyFitError> {
        let num_coeffs = order + 1;

        if points.len() < num_coeffs {
            return Err(PolyFitError::Underdetermined {
                order,
                found: points.len()
            })
        }

        if let Some(i) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(PolyFitError::NonFinitePoint(i))
        }

        // Vandermonde matrix, column j holds x^j
        let a = DMatrix::from_fn(points.len(), num_coeffs, |i, j| {
            points[i].x.powi(j as i32)
        });
        let b = DVector::from_iterator(points.len(), points.iter().map(|p| p.y));

        let svd = a.svd(true, true);

        let eps = RANK_EPSILON * svd.singular_values.amax();
        let rank = svd.rank(eps);
        if rank < num_coeffs {
            return Err(PolyFitError::Singular {
                rank,
                required: num_coeffs
            })
        }

        let coeffs = svd.solve(&b, eps)
            .map_err(PolyFitError::SolveFailed)?;

        Ok(Self {
            coeffs: coeffs.iter().cloned().collect()
        })
    }

    /// The coefficients, lowest power first.
    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// The order of the polynomial.
    pub fn order(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Evaluate the polynomial at x.
    pub fn eval(&self, x: f64) -> f64 {
        poly_val(x, &self.coeffs)
    }

    /// Evaluate the first derivative at x.
    pub fn eval_deriv(&self, x: f64) -> f64 {
        // d/dx sum(c_i x^i) = sum(i c_i x^(i - 1)), Horner from the top
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, c)| acc * x + c * i as f64)
    }

    /// Evaluate the second derivative at x.
    pub fn eval_deriv2(&self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .enumerate()
            .skip(2)
            .rev()
            .fold(0.0, |acc, (i, c)| acc * x + c * (i * (i - 1)) as f64)
    }

    /// Returns true if every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_finite())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn points(xs: &[f64], f: impl Fn(f64) -> f64) -> Vec<Point2<f64>> {
        xs.iter().map(|&x| Point2::new(x, f(x))).collect()
    }

    #[test]
    fn test_fit_collinear() {
        let line = |x: f64| 0.5 * x - 3.0;
        let pts = points(&[-4.0, 0.0, 7.5, 15.0, 30.0, 45.0], line);

        let poly = Polynomial::fit(&pts, POLY_ORDER).unwrap();

        assert_eq!(poly.order(), POLY_ORDER);
        assert_eq!(poly.coeffs().len(), POLY_ORDER + 1);
        assert!((poly.coeffs()[0] + 3.0).abs() < 1e-6);
        assert!((poly.coeffs()[1] - 0.5).abs() < 1e-6);
        assert!(poly.coeffs()[2].abs() < 1e-6);
        assert!(poly.coeffs()[3].abs() < 1e-6);

        for p in pts.iter() {
            assert!((poly.eval(p.x) - p.y).abs() < 1e-6);
        }
        assert!((poly.eval(100.0) - line(100.0)).abs() < 1e-4);
    }

    #[test]
    fn test_fit_exact_cubic() {
        let cubic = |x: f64| 1.0 - 0.2 * x + 0.03 * x * x - 0.001 * x * x * x;
        let pts = points(&[0.0, 5.0, 10.0, 20.0, 30.0], cubic);

        let poly = Polynomial::fit(&pts, POLY_ORDER).unwrap();

        let expected = [1.0, -0.2, 0.03, -0.001];
        for (c, e) in poly.coeffs().iter().zip(expected.iter()) {
            assert!((c - e).abs() < 1e-8, "{} != {}", c, e);
        }
    }

    #[test]
    fn test_fit_underdetermined() {
        let pts = points(&[0.0, 1.0, 2.0], |x| x);

        assert_eq!(
            Polynomial::fit(&pts, POLY_ORDER),
            Err(PolyFitError::Underdetermined { order: 3, found: 3 })
        );
        assert_eq!(
            Polynomial::fit(&[], POLY_ORDER),
            Err(PolyFitError::Underdetermined { order: 3, found: 0 })
        );
    }

    #[test]
    fn test_fit_degenerate() {
        // All points share one x so no function of x passes through them
        let pts: Vec<Point2<f64>> = (0..5).map(|i| Point2::new(2.0, i as f64)).collect();
        assert!(matches!(
            Polynomial::fit(&pts, POLY_ORDER),
            Err(PolyFitError::Singular { .. })
        ));

        let mut pts = points(&[0.0, 1.0, 2.0, 3.0], |x| x);
        pts[2].y = std::f64::NAN;
        assert_eq!(Polynomial::fit(&pts, POLY_ORDER), Err(PolyFitError::NonFinitePoint(2)));
    }

    #[test]
    fn test_derivatives() {
        // 2 + 3x - x^2 + 0.5x^3
        let poly = Polynomial::new(vec![2.0, 3.0, -1.0, 0.5]);

        assert_eq!(poly.eval(0.0), 2.0);
        assert_eq!(poly.eval(2.0), 2.0 + 6.0 - 4.0 + 4.0);

        // 3 - 2x + 1.5x^2
        assert_eq!(poly.eval_deriv(0.0), 3.0);
        assert_eq!(poly.eval_deriv(2.0), 3.0 - 4.0 + 6.0);

        // -2 + 3x
        assert_eq!(poly.eval_deriv2(0.0), -2.0);
        assert_eq!(poly.eval_deriv2(2.0), 4.0);

        assert_eq!(Polynomial::new(vec![4.0]).eval_deriv(3.0), 0.0);
    }
}
