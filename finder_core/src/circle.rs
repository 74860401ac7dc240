//! Algebraic least-squares circle fit.
//!
//! Minimizes Σ (u² + v² + D·u + E·v + F)² over points expressed about their
//! centroid and scaled to unit RMS radius, which keeps the 3×3 normal
//! equations well conditioned for large, nearly straight circles.

use crate::error::{ReconError, Result};
use crate::types::Point2;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Radius bound in units of the RMS point spread.
const MAX_NORMALIZED_RADIUS: f64 = 1e8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
    /// +1 or −1: sign of Σ (center × hit)_z
    pub charge: f64,
}

impl Circle {
    pub fn curvature(&self) -> f64 {
        1.0 / self.radius
    }

    /// Unsigned distance of `p` from the circle.
    pub fn distance(&self, p: &Point2) -> f64 {
        ((p - self.center).norm() - self.radius).abs()
    }

    /// Rotation sign of `p` about the center, matching `charge` for points
    /// on the track's side.
    pub fn rotation_of(&self, p: &Point2) -> f64 {
        if self.center.perp(p) >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CircleFitter;

impl CircleFitter {
    /// Fit a circle through at least three non-collinear points.
    pub fn fit(points: &[Point2]) -> Result<Circle> {
        if points.len() < 3 {
            return Err(ReconError::GeometricDegeneracy(format!(
                "circle fit needs 3 points, got {}",
                points.len()
            )));
        }

        let (mean, scale) = normalization(points);
        let mut m = Matrix3::<f64>::zeros();
        let mut rhs = Vector3::<f64>::zeros();
        for p in points {
            let q = (p - mean) * scale;
            let z = q.norm_squared();
            let row = Vector3::new(q.x, q.y, 1.0);
            m += row * row.transpose();
            rhs -= row * z;
        }

        let sol = m
            .lu()
            .solve(&rhs)
            .ok_or_else(|| ReconError::GeometricDegeneracy("collinear circle points".into()))?;
        let c = Point2::new(-0.5 * sol.x, -0.5 * sol.y);
        let r2 = c.norm_squared() - sol.z;
        if !r2.is_finite() || r2 <= 0.0 {
            return Err(ReconError::GeometricDegeneracy(
                "circle fit has no real radius".into(),
            ));
        }

        // A radius this far beyond the point spread is a straight line
        if r2.sqrt() > MAX_NORMALIZED_RADIUS {
            return Err(ReconError::GeometricDegeneracy(
                "circle fit has zero curvature".into(),
            ));
        }
        let center = mean + c / scale;
        let radius = r2.sqrt() / scale;
        if !radius.is_finite() || 1.0 / radius == 0.0 {
            return Err(ReconError::GeometricDegeneracy(
                "circle fit has zero curvature".into(),
            ));
        }

        let vote: f64 = points.iter().map(|p| center.perp(p)).sum();
        let charge = if vote >= 0.0 { 1.0 } else { -1.0 };
        Ok(Circle {
            center,
            radius,
            charge,
        })
    }
}

/// Centroid and the scale that brings the RMS distance to 1.
fn normalization(points: &[Point2]) -> (Point2, f64) {
    let n = points.len() as f64;
    let mean = points.iter().sum::<Point2>() / n;
    let rms = (points.iter().map(|p| (p - mean).norm_squared()).sum::<f64>() / n).sqrt();
    let scale = if rms > f64::EPSILON { 1.0 / rms } else { 1.0 };
    (mean, scale)
}
