//! Helix track model, pivot at the origin.
//!
//! # Parametrization
//! a = [dr, phi0, kappa, dz, tan_lambda] with rho = 1/kappa (cm, signed):
//! ```text
//! x(φ) = dr·cos φ0 + ρ·(cos φ0 − cos(φ0 + φ))
//! y(φ) = dr·sin φ0 + ρ·(sin φ0 − sin(φ0 + φ))
//! z(φ) = dz − ρ·tan λ·φ
//! ```
//! The circle center is (dr + ρ)·(cos φ0, sin φ0). The arc length travelled
//! from the pivot is s = −ρ·φ, so z = dz + tan λ·s. Positive ρ means the
//! track turns counter-clockwise about its center.

use crate::circle::Circle;
use crate::error::{ReconError, Result};
use crate::types::{HelixVec, LeftRight, Point2, Point3};
use chamber_model::Wire;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// cm·GeV/c conversion between radius and transverse momentum at 1.5 T.
pub const ALPHA: f64 = 222.376063;

/// Convergence of the stereo closest-approach iteration (cm along the arc).
const APPROACH_CONVERGENCE: f64 = 1e-5;
const APPROACH_MAX_TRIALS: usize = 100;

/// Closest approach between the helix and one wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Approach {
    pub dphi: f64,
    pub on_track: Point3,
    pub on_wire: Point3,
    /// |on_track − on_wire|
    pub distance: f64,
    pub left_right: LeftRight,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Helix {
    a: HelixVec,
}

impl Helix {
    pub fn new(a: HelixVec) -> Self {
        Self { a }
    }

    pub fn from_parameters(dr: f64, phi0: f64, kappa: f64, dz: f64, tan_lambda: f64) -> Self {
        Self::new(HelixVec::new(dr, phi0, kappa, dz, tan_lambda))
    }

    /// Seed helix from a fitted circle: z offset and dip are zero.
    pub fn from_circle(circle: &Circle) -> Result<Self> {
        if !(circle.radius.is_finite() && circle.radius > 0.0) {
            return Err(ReconError::GeometricDegeneracy(
                "circle without finite radius".into(),
            ));
        }
        let sign = circle.charge.signum();
        let rho = sign * circle.radius;
        let phi0 = (sign * circle.center.y)
            .atan2(sign * circle.center.x)
            .rem_euclid(TAU);
        let dr = sign * circle.center.norm() - rho;
        Ok(Self::from_parameters(dr, phi0, 1.0 / rho, 0.0, 0.0))
    }

    pub fn params(&self) -> &HelixVec {
        &self.a
    }

    pub fn set_params(&mut self, a: HelixVec) {
        self.a = a;
    }

    pub fn dr(&self) -> f64 {
        self.a[0]
    }

    pub fn phi0(&self) -> f64 {
        self.a[1]
    }

    pub fn kappa(&self) -> f64 {
        self.a[2]
    }

    pub fn dz(&self) -> f64 {
        self.a[3]
    }

    pub fn tan_lambda(&self) -> f64 {
        self.a[4]
    }

    pub fn set_z_line(&mut self, dz: f64, tan_lambda: f64) {
        self.a[3] = dz;
        self.a[4] = tan_lambda;
    }

    /// Signed radius.
    pub fn rho(&self) -> f64 {
        1.0 / self.a[2]
    }

    pub fn radius(&self) -> f64 {
        self.rho().abs()
    }

    /// +1 for counter-clockwise rotation, −1 otherwise.
    pub fn charge(&self) -> f64 {
        if self.a[2] >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    pub fn center(&self) -> Point2 {
        let r = self.dr() + self.rho();
        Point2::new(r * self.phi0().cos(), r * self.phi0().sin())
    }

    pub fn impact(&self) -> f64 {
        self.dr().abs()
    }

    /// Transverse momentum (GeV/c).
    pub fn pt(&self) -> f64 {
        1.0 / (ALPHA * self.kappa().abs())
    }

    pub fn momentum(&self) -> f64 {
        self.pt() * (1.0 + self.tan_lambda().powi(2)).sqrt()
    }

    pub fn position(&self, dphi: f64) -> Point3 {
        let (dr, phi0, rho) = (self.dr(), self.phi0(), self.rho());
        let (c0, s0) = (phi0.cos(), phi0.sin());
        let (c1, s1) = ((phi0 + dphi).cos(), (phi0 + dphi).sin());
        Point3::new(
            dr * c0 + rho * (c0 - c1),
            dr * s0 + rho * (s0 - s1),
            self.dz() - rho * self.tan_lambda() * dphi,
        )
    }

    /// dx/dφ
    pub fn tangent(&self, dphi: f64) -> Point3 {
        let rho = self.rho();
        let phi = self.phi0() + dphi;
        Point3::new(rho * phi.sin(), -rho * phi.cos(), -rho * self.tan_lambda())
    }

    /// Arc length travelled from the pivot to turning angle `dphi`.
    pub fn arc_length(&self, dphi: f64) -> f64 {
        -self.rho() * dphi
    }

    /// Partial derivatives of (x, y, z) with respect to the five parameters
    /// at a fixed turning angle.
    pub fn derivatives(&self, dphi: f64) -> [HelixVec; 3] {
        let (dr, phi0, rho, tanl) = (self.dr(), self.phi0(), self.rho(), self.tan_lambda());
        let (c0, s0) = (phi0.cos(), phi0.sin());
        let (c1, s1) = ((phi0 + dphi).cos(), (phi0 + dphi).sin());
        let rho2 = rho * rho;
        [
            HelixVec::new(c0, -(dr + rho) * s0 + rho * s1, -rho2 * (c0 - c1), 0.0, 0.0),
            HelixVec::new(s0, (dr + rho) * c0 - rho * c1, -rho2 * (s0 - s1), 0.0, 0.0),
            HelixVec::new(0.0, 0.0, rho2 * tanl * dphi, 1.0, -rho * dphi),
        ]
    }

    /// Turning angle at which the helix passes closest to `p` in xy,
    /// in (−π, π].
    pub fn turning_angle(&self, p: &Point2) -> f64 {
        let c = self.center();
        let x0 = self.position(0.0).xy() - c;
        let x1 = p - c;
        x0.perp(&x1).atan2(x0.dot(&x1))
    }

    /// Outgoing turning angle at which the helix reaches radius `r`.
    pub fn crossing_at_radius(&self, r: f64) -> Option<f64> {
        let rho = self.rho();
        let d = self.dr() + rho;
        let denom = 2.0 * rho * d;
        if denom.abs() <= f64::EPSILON {
            return None;
        }
        let cos_phi = (d * d + rho * rho - r * r) / denom;
        if !(-1.0..=1.0).contains(&cos_phi) {
            return None;
        }
        Some(-rho.signum() * cos_phi.acos())
    }

    /// Closest approach to a wire. Axial wires are solved in closed form,
    /// stereo wires by Newton iteration on d|distance|²/dφ.
    pub fn approach(&self, wire: &Wire) -> Result<Approach> {
        let dphi = self.turning_angle(&wire.xy_position());
        if wire.is_axial() {
            let on_track = self.position(dphi);
            let xy = wire.xy_position();
            let on_wire = Point3::new(xy.x, xy.y, on_track.z);
            return Ok(self.make_approach(dphi, on_track, on_wire));
        }
        self.approach_stereo(wire, dphi)
    }

    fn approach_stereo(&self, wire: &Wire, start: f64) -> Result<Approach> {
        let wb = wire.backward_position();
        let v = wire.direction();
        let rho = self.rho();

        // Re-seed from the wire position at the helix z
        let z0 = self.position(start).z;
        let mut dphi = self.turning_angle(&wire.position_at_z(z0).xy());

        for _ in 0..APPROACH_MAX_TRIALS {
            let x = self.position(dphi);
            let t = self.tangent(dphi);
            let w = x - wb;
            let a = w - v * v.dot(&w);
            let f = a.dot(&t);
            let phi = self.phi0() + dphi;
            let curvature_term = Point3::new(rho * phi.cos(), rho * phi.sin(), 0.0);
            let t_perp = t - v * v.dot(&t);
            let df = t_perp.norm_squared() + a.dot(&curvature_term);
            if !(f.is_finite() && df.is_finite()) || df.abs() <= f64::MIN_POSITIVE {
                return Err(ReconError::GeometricDegeneracy(
                    "stereo approach has no stationary point".into(),
                ));
            }
            let step = f / df;
            dphi -= step;
            if (step * rho).abs() < APPROACH_CONVERGENCE {
                let on_track = self.position(dphi);
                let w = on_track - wb;
                let on_wire = wb + v * v.dot(&w);
                return Ok(self.make_approach(dphi, on_track, on_wire));
            }
        }
        Err(ReconError::ConvergenceFailure {
            iterations: APPROACH_MAX_TRIALS,
        })
    }

    fn make_approach(&self, dphi: f64, on_track: Point3, on_wire: Point3) -> Approach {
        Approach {
            dphi,
            on_track,
            on_wire,
            distance: (on_track - on_wire).norm(),
            left_right: LeftRight::from_geometry(&on_wire, &on_track),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chamber_model::{ChamberLayout, WireGeometry};

    #[test]
    fn circle_round_trip() {
        let circle = Circle {
            center: Point2::new(-30.0, 55.0),
            radius: 60.0,
            charge: -1.0,
        };
        let h = Helix::from_circle(&circle).unwrap();
        assert_abs_diff_eq!(h.center(), circle.center, epsilon = 1e-9);
        assert_abs_diff_eq!(h.radius(), 60.0, epsilon = 1e-9);
        assert_eq!(h.charge(), -1.0);
        assert_abs_diff_eq!(h.kappa().abs(), 1.0 / 60.0, epsilon = 1e-12);
        // Pivot point lies on the circle
        let p = h.position(0.0).xy();
        assert_abs_diff_eq!((p - circle.center).norm(), 60.0, epsilon = 1e-9);
    }

    #[test]
    fn crossing_and_turning_angle_agree() {
        let h = Helix::from_parameters(0.0, 0.7, 1.0 / 80.0, 3.0, 0.5);
        let dphi = h.crossing_at_radius(40.0).unwrap();
        let p = h.position(dphi);
        assert_abs_diff_eq!(p.xy().norm(), 40.0, epsilon = 1e-9);
        assert!(h.arc_length(dphi) > 0.0);
        assert_abs_diff_eq!(h.turning_angle(&p.xy()), dphi, epsilon = 1e-9);
        assert_abs_diff_eq!(p.z, 3.0 + 0.5 * h.arc_length(dphi), epsilon = 1e-9);
        assert!(h.crossing_at_radius(200.0).is_none());
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = Helix::from_parameters(0.4, 1.1, -1.0 / 70.0, 2.0, 0.3);
        let dphi = 0.35;
        let d = h.derivatives(dphi);
        for k in 0..5 {
            let eps = 1e-7;
            let (mut ap, mut am) = (*h.params(), *h.params());
            ap[k] += eps;
            am[k] -= eps;
            let diff =
                (Helix::new(ap).position(dphi) - Helix::new(am).position(dphi)) / (2.0 * eps);
            assert_abs_diff_eq!(diff.x, d[0][k], epsilon = 1e-4);
            assert_abs_diff_eq!(diff.y, d[1][k], epsilon = 1e-4);
            assert_abs_diff_eq!(diff.z, d[2][k], epsilon = 1e-4);
        }
    }

    #[test]
    fn stereo_approach_is_perpendicular() {
        let chamber = ChamberLayout::default().build();
        let h = Helix::from_parameters(0.0, 0.3, 1.0 / 150.0, 1.0, 0.4);
        let layer = 20;
        let r = chamber.layer_radius(layer).unwrap();
        let p = h.position(h.crossing_at_radius(r).unwrap());
        let wire = chamber
            .layer_wires(layer)
            .iter()
            .min_by(|a, b| {
                let da = (a.position_at_z(p.z).xy() - p.xy()).norm();
                let db = (b.position_at_z(p.z).xy() - p.xy()).norm();
                da.total_cmp(&db)
            })
            .unwrap();
        assert!(!wire.is_axial());
        let ap = h.approach(wire).unwrap();
        let sep = ap.on_track - ap.on_wire;
        assert_abs_diff_eq!(sep.dot(&wire.direction()), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sep.dot(&h.tangent(ap.dphi)), 0.0, epsilon = 1e-3);
        assert!(ap.distance < wire.cell_size());
    }
}
