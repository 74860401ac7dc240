//! Conformal mapping of hit positions.
//!
//! `c' = 2·(p − ref)/|p − ref|²` maps circles through the reference point to
//! straight lines. Segment finding works in the (phi, log r) form of the
//! mapped point so that angular binning is uniform.

use crate::error::{ReconError, Result};
use crate::types::{HitId, Link, Point2, WireHit};
use std::f64::consts::PI;

/// Offset added to `ln |c'|` so that log-radii of chamber hits stay positive.
pub const LOG_R_OFFSET: f64 = 4.0;

#[derive(Clone, Copy, Debug)]
pub struct HitTransform {
    reference: Point2,
}

impl Default for HitTransform {
    fn default() -> Self {
        Self::origin()
    }
}

impl HitTransform {
    pub fn new(reference: Point2) -> Self {
        Self { reference }
    }

    /// Transform about the chamber axis.
    pub fn origin() -> Self {
        Self::new(Point2::zeros())
    }

    pub fn reference(&self) -> Point2 {
        self.reference
    }

    /// Conformal image of `p`. Fails when `p` coincides with the reference.
    pub fn to_conformal(&self, p: &Point2) -> Result<Point2> {
        let d = p - self.reference;
        let r2 = d.norm_squared();
        if r2 <= f64::EPSILON {
            return Err(ReconError::GeometricDegeneracy(
                "hit at the conformal reference point".into(),
            ));
        }
        Ok(d * (2.0 / r2))
    }

    /// Conformal image expressed as (phi in [0, 2π), log r).
    pub fn to_phi_log_r(&self, p: &Point2) -> Result<Point2> {
        let c = self.to_conformal(p)?;
        Ok(Point2::new(c.y.atan2(c.x) + PI, c.norm().ln() + LOG_R_OFFSET))
    }

    /// Conformal links of `ids`, in input order. Hits sitting on the
    /// reference point have no image and are skipped.
    pub fn transform(&self, hits: &[WireHit], ids: &[HitId]) -> Vec<Link> {
        ids.iter()
            .filter_map(|&id| match self.to_phi_log_r(&hits[id.index()].xy_position()) {
                Ok(c) => Some(Link::new(id, c)),
                Err(e) => {
                    tracing::debug!(hit = id.index(), error = %e, "hit skipped");
                    None
                }
            })
            .collect()
    }
}
