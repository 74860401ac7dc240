//! Weighted straight-line fit in the (arc length, z) plane.

use crate::error::{ReconError, Result, Stage};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// One (s, z) measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SzPoint {
    pub s: f64,
    pub z: f64,
    /// z uncertainty (cm)
    pub sigma: f64,
}

impl SzPoint {
    pub fn new(s: f64, z: f64, sigma: f64) -> Self {
        Self { s, z, sigma }
    }
}

/// z = intercept + slope·s
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
    pub chi2: f64,
}

impl Line {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self {
            slope,
            intercept,
            chi2: 0.0,
        }
    }

    pub fn z_at(&self, s: f64) -> f64 {
        self.intercept + self.slope * s
    }

    /// Signed z residual of a point.
    pub fn residual(&self, p: &SzPoint) -> f64 {
        p.z - self.z_at(p.s)
    }

    /// |residual| / sigma
    pub fn pull(&self, p: &SzPoint) -> f64 {
        self.residual(p).abs() / p.sigma.max(f64::MIN_POSITIVE)
    }

    /// Weighted least-squares fit; needs two points at distinct s.
    pub fn fit(points: &[SzPoint]) -> Result<Self> {
        if points.len() < 2 {
            return Err(ReconError::InsufficientHits {
                stage: Stage::LineFit,
                found: points.len(),
                required: 2,
            });
        }
        let mut m = Matrix2::<f64>::zeros();
        let mut rhs = Vector2::<f64>::zeros();
        for p in points {
            let w = 1.0 / (p.sigma * p.sigma).max(f64::MIN_POSITIVE);
            m[(0, 0)] += w;
            m[(0, 1)] += w * p.s;
            m[(1, 1)] += w * p.s * p.s;
            rhs[0] += w * p.z;
            rhs[1] += w * p.s * p.z;
        }
        m[(1, 0)] = m[(0, 1)];
        if m.determinant().abs() <= 1e-12 * m[(0, 0)] * m[(1, 1)] {
            return Err(ReconError::GeometricDegeneracy(
                "sz points share one arc length".into(),
            ));
        }
        let sol = m
            .lu()
            .solve(&rhs)
            .ok_or_else(|| ReconError::GeometricDegeneracy("sz points share one arc length".into()))?;
        let mut line = Line::new(sol[1], sol[0]);
        line.chi2 = points.iter().map(|p| line.pull(p).powi(2)).sum();
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_line_is_recovered() {
        let pts: Vec<SzPoint> = [10.0, 25.0, 40.0, 70.0]
            .iter()
            .map(|&s| SzPoint::new(s, 3.0 + 0.75 * s, 0.5))
            .collect();
        let line = Line::fit(&pts).unwrap();
        assert_abs_diff_eq!(line.slope, 0.75, epsilon = 1e-10);
        assert_abs_diff_eq!(line.intercept, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(line.chi2, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn weights_favour_precise_points() {
        let pts = [
            SzPoint::new(0.0, 0.0, 0.01),
            SzPoint::new(10.0, 10.0, 0.01),
            SzPoint::new(20.0, 50.0, 100.0),
        ];
        let line = Line::fit(&pts).unwrap();
        assert_abs_diff_eq!(line.slope, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn degenerate_inputs_fail() {
        assert!(Line::fit(&[SzPoint::new(1.0, 1.0, 1.0)]).is_err());
        let same_s = [SzPoint::new(5.0, 1.0, 1.0), SzPoint::new(5.0, 2.0, 1.0)];
        assert!(matches!(
            Line::fit(&same_s),
            Err(ReconError::GeometricDegeneracy(_))
        ));
    }
}
