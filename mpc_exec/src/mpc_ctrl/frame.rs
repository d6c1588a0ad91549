//! # Frame transformations
//!
//! The reference waypoints arrive in the world frame. Everything downstream
//! works in the vehicle frame, where the vehicle sits at the origin and its
//! heading lies along +X.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Point2, Rotation2, Vector2};
use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose of the vehicle in the world frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Pose {
    /// Position in the world frame
    pub position: Point2<f64>,

    /// Heading, the angle from the world +X axis to the vehicle +X axis
    ///
    /// Units: radians
    pub psi_rad: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x: f64, y: f64, psi_rad: f64) -> Self {
        Self {
            position: Point2::new(x, y),
            psi_rad
        }
    }

    /// Transform a world frame point into the vehicle frame.
    pub fn to_vehicle(&self, point: &Point2<f64>) -> Point2<f64> {
        let delta: Vector2<f64> = point - self.position;
        Point2::from(Rotation2::new(-self.psi_rad) * delta)
    }

    /// Transform a vehicle frame point into the world frame.
    pub fn to_world(&self, point: &Point2<f64>) -> Point2<f64> {
        self.position + Rotation2::new(self.psi_rad) * point.coords
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Transform a sequence of world frame points into the vehicle frame,
/// preserving their order.
pub fn to_vehicle_frame(pose: &Pose, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    points.iter().map(|p| pose.to_vehicle(p)).collect()
}

/// Transform a sequence of vehicle frame points back into the world frame.
pub fn to_world_frame(pose: &Pose, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    points.iter().map(|p| pose.to_world(p)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    fn close(a: &Point2<f64>, b: &Point2<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn test_vehicle_position_is_origin() {
        let pose = Pose::new(12.0, -7.5, 2.1);
        let local = pose.to_vehicle(&Point2::new(12.0, -7.5));

        assert!(close(&local, &Point2::origin()));
    }

    #[test]
    fn test_known_transform() {
        // Vehicle facing world +Y, so a point ahead in Y is ahead in local X
        // and a point at world +X is to the vehicle's right (local -Y).
        let pose = Pose::new(1.0, 1.0, PI / 2.0);

        let local = to_vehicle_frame(&pose, &[
            Point2::new(1.0, 3.0),
            Point2::new(2.0, 1.0),
        ]);

        assert!(close(&local[0], &Point2::new(2.0, 0.0)));
        assert!(close(&local[1], &Point2::new(0.0, -1.0)));
    }

    #[test]
    fn test_matches_explicit_rotation() {
        let (px, py, psi) = (3.0, 4.0, -0.7);
        let (wx, wy) = (10.0, 2.0);
        let (dx, dy) = (wx - px, wy - py);

        let local = Pose::new(px, py, psi).to_vehicle(&Point2::new(wx, wy));

        assert!((local.x - (dx * (-psi).cos() - dy * (-psi).sin())).abs() < 1e-12);
        assert!((local.y - (dx * (-psi).sin() + dy * (-psi).cos())).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_and_order() {
        let pose = Pose::new(-20.0, 35.0, 4.0);
        let world: Vec<Point2<f64>> = (0..6)
            .map(|i| Point2::new(-20.0 + 8.0 * i as f64, 35.0 + (i * i) as f64))
            .collect();

        let local = to_vehicle_frame(&pose, &world);
        let back = to_world_frame(&pose, &local);

        assert_eq!(local.len(), world.len());
        for (w, b) in world.iter().zip(back.iter()) {
            assert!(close(w, b));
        }

        // Rigid transform, so distances between consecutive points are kept
        for i in 1..world.len() {
            let dw = (world[i] - world[i - 1]).norm();
            let dl = (local[i] - local[i - 1]).norm();
            assert!((dw - dl).abs() < 1e-9);
        }
    }
}
