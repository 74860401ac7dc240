//! Iterative helix fitter (Gauss-Newton on drift-distance residuals).
//!
//! # Residual
//! r_i = |x_track(φ_i) − x_wire| − d_i(lr), where φ_i is the closest
//! approach turning angle and lr the side the track passes on. The gradient
//! of |x_track − x_wire| with respect to the helix parameters is the unit
//! separation vector, projected perpendicular to the wire, dotted with
//! ∂x/∂a at fixed φ (φ is stationary at closest approach).
//!
//! # Iteration
//! 1. Accumulate g = Σ r·∇r/σ² and H = Σ ∇r·∇rᵀ/σ² over valid hits.
//! 2. Solve H·Δa = g (3×3 block when every hit is axial, 5×5 otherwise).
//! 3. Try a ← a − f·Δa; on a χ² increase halve f down to `min_step_factor`.
//! 4. Stop once the χ² improvement drops below `convergence`.
//!
//! The covariance is H⁻¹ at the final point; ndf = valid hits − free
//! parameters.

use crate::error::{ReconError, Result, Stage};
use crate::helix::Helix;
use crate::types::{HelixCov, HelixVec, Link, WireHit};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Stop once Δχ² falls below this
    pub convergence: f64,
    pub max_iterations: usize,
    /// Smallest step fraction tried after successive halvings
    pub min_step_factor: f64,
    /// Floor on the drift uncertainty (cm)
    pub min_sigma: f64,
    /// |dz| beyond this is a runaway fit (cm)
    pub max_dz: f64,
    /// |kappa| above this is a runaway fit (1/cm)
    pub max_kappa: f64,
    /// Per-hit pull thresholds of the 2D refine schedule
    pub refine_schedule: Vec<f64>,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            convergence: 1e-5,
            max_iterations: 100,
            min_step_factor: 1.0 / 64.0,
            min_sigma: 1e-3,
            max_dz: 1000.0,
            max_kappa: 1.0,
            refine_schedule: vec![30.0, 10.0, 3.0],
        }
    }
}

/// Result of a successful fit.
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub helix: Helix,
    pub covariance: HelixCov,
    pub chi2: f64,
    pub ndf: usize,
    pub iterations: usize,
    /// Number of free parameters (3 or 5)
    pub dimension: usize,
}

struct Normal {
    chi2: f64,
    gradient: HelixVec,
    hessian: HelixCov,
}

// ---------------------------------------------------------------------------
// Fitter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct HelixFitter {
    pub config: FitterConfig,
}

impl HelixFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    /// Fit `seed` to `links`. Every link is updated in place (side, closest
    /// approach points, pull) to match the returned helix.
    pub fn fit(&self, seed: &Helix, links: &mut [Link], hits: &[WireHit]) -> Result<FitOutcome> {
        let valid: Vec<&WireHit> = links
            .iter()
            .map(|l| &hits[l.hit.index()])
            .filter(|h| h.flags.fitting_valid)
            .collect();
        let n_stereo = valid.iter().filter(|h| !h.is_axial()).count();
        let n_axial = valid.len() - n_stereo;
        let dimension = if n_stereo == 0 {
            if n_axial < 3 {
                return Err(ReconError::InsufficientHits {
                    stage: Stage::HelixFit,
                    found: n_axial,
                    required: 3,
                });
            }
            3
        } else {
            if n_stereo < 2 {
                return Err(ReconError::InsufficientHits {
                    stage: Stage::HelixFit,
                    found: n_stereo,
                    required: 2,
                });
            }
            if n_axial < 3 {
                return Err(ReconError::InsufficientHits {
                    stage: Stage::HelixFit,
                    found: n_axial,
                    required: 3,
                });
            }
            5
        };

        let mut helix = seed.clone();
        let mut normal = self.evaluate(&helix, links, hits)?;
        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(ReconError::ConvergenceFailure {
                    iterations: self.config.max_iterations,
                });
            }
            let da = solve(&normal.hessian, &normal.gradient, dimension)
                .ok_or(ReconError::SingularCovariance)?;

            let mut factor = 1.0;
            let (trial, trial_normal) = loop {
                let mut trial = helix.clone();
                trial.set_params(helix.params() - da * factor);
                if self.is_sane(&trial) {
                    if let Ok(n) = self.evaluate(&trial, links, hits) {
                        if n.chi2 < normal.chi2 + self.config.convergence {
                            break (trial, n);
                        }
                    }
                }
                factor *= 0.5;
                if factor < self.config.min_step_factor {
                    tracing::trace!(iterations, chi2 = normal.chi2, "step halving floor reached");
                    return Err(ReconError::ConvergenceFailure { iterations });
                }
            };

            let improvement = normal.chi2 - trial_normal.chi2;
            tracing::trace!(iterations, chi2 = trial_normal.chi2, factor, "fit step");
            helix = trial;
            normal = trial_normal;
            if improvement < self.config.convergence {
                break;
            }
        }

        let covariance =
            invert(&normal.hessian, dimension).ok_or(ReconError::SingularCovariance)?;
        Ok(FitOutcome {
            helix,
            covariance,
            chi2: normal.chi2,
            ndf: valid.len().saturating_sub(dimension),
            iterations,
            dimension,
        })
    }

    /// Update every link against `helix` without changing it; returns χ².
    pub fn update_links(&self, helix: &Helix, links: &mut [Link], hits: &[WireHit]) -> Result<f64> {
        Ok(self.evaluate(helix, links, hits)?.chi2)
    }

    fn is_sane(&self, helix: &Helix) -> bool {
        let k = helix.kappa();
        helix.params().iter().all(|v| v.is_finite())
            && k != 0.0
            && k.abs() <= self.config.max_kappa
            && helix.dz().abs() <= self.config.max_dz
    }

    fn evaluate(&self, helix: &Helix, links: &mut [Link], hits: &[WireHit]) -> Result<Normal> {
        let mut chi2 = 0.0;
        let mut gradient = HelixVec::zeros();
        let mut hessian = HelixCov::zeros();
        let center = helix.center();

        for link in links.iter_mut() {
            let hit = &hits[link.hit.index()];
            let ap = helix.approach(&hit.wire)?;
            let lr = ap.left_right;
            let sigma = hit.drift_error_for(lr).max(self.config.min_sigma);
            let residual = ap.distance - hit.drift_for(lr);

            link.left_right = lr;
            link.on_track = ap.on_track;
            link.on_wire = ap.on_wire;
            link.dphi = ap.dphi;
            link.pull = residual.abs() / sigma;
            if !hit.flags.fitting_valid {
                continue;
            }

            // Unit separation perpendicular to the wire; radial when the
            // track runs through the wire itself.
            let w = hit.wire.direction();
            let sep = ap.on_track - ap.on_wire;
            let sep = sep - w * w.dot(&sep);
            let unit = if sep.norm() > 1e-9 {
                sep.normalize()
            } else {
                let radial = ap.on_track.xy() - center;
                let n = radial.norm().max(f64::MIN_POSITIVE);
                Vector3::new(radial.x / n, radial.y / n, 0.0)
            };
            let [dx, dy, dz] = helix.derivatives(ap.dphi);
            let d_dist = dx * unit.x + dy * unit.y + dz * unit.z;

            let w2 = 1.0 / (sigma * sigma);
            chi2 += residual * residual * w2;
            gradient += d_dist * (residual * w2);
            hessian += d_dist * d_dist.transpose() * w2;
        }

        Ok(Normal {
            chi2,
            gradient,
            hessian,
        })
    }
}

/// Solve H·Δa = g on the leading `dim` parameters.
fn solve(h: &HelixCov, g: &HelixVec, dim: usize) -> Option<HelixVec> {
    if dim == 3 {
        let h3: Matrix3<f64> = h.fixed_view::<3, 3>(0, 0).into_owned();
        let g3: Vector3<f64> = g.fixed_rows::<3>(0).into_owned();
        let d = h3.lu().solve(&g3)?;
        Some(HelixVec::new(d.x, d.y, d.z, 0.0, 0.0))
    } else {
        h.lu().solve(g)
    }
}

/// H⁻¹ on the leading `dim` parameters, zero elsewhere.
fn invert(h: &HelixCov, dim: usize) -> Option<HelixCov> {
    if dim == 3 {
        let h3: Matrix3<f64> = h.fixed_view::<3, 3>(0, 0).into_owned();
        let inv = h3.try_inverse()?;
        let mut out = HelixCov::zeros();
        out.fixed_view_mut::<3, 3>(0, 0).copy_from(&inv);
        Some(out)
    } else {
        h.try_inverse()
    }
}

/// Remove links whose pull exceeds `max_pull`; returns the removed links.
pub fn refine(links: &mut Vec<Link>, max_pull: f64) -> Vec<Link> {
    let (keep, removed): (Vec<Link>, Vec<Link>) =
        links.drain(..).partition(|l| l.pull <= max_pull);
    *links = keep;
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{helix_hits, links_for, HitSelection};
    use approx::assert_abs_diff_eq;

    fn truth() -> Helix {
        Helix::from_parameters(0.0, 0.8, 1.0 / 120.0, 2.0, 0.35)
    }

    #[test]
    fn axial_fit_recovers_circle() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let mut links = links_for(&hits);
        let seed = Helix::from_parameters(0.3, 0.78, 1.0 / 100.0, 0.0, 0.0);
        let out = HelixFitter::default().fit(&seed, &mut links, &hits).unwrap();
        assert_eq!(out.dimension, 3);
        assert_abs_diff_eq!(out.helix.kappa(), truth.kappa(), epsilon = 1e-5);
        assert_abs_diff_eq!(out.helix.phi0(), truth.phi0(), epsilon = 1e-4);
        assert_abs_diff_eq!(out.helix.dr(), 0.0, epsilon = 1e-3);
        assert!(out.chi2 < 1e-3);
        assert_eq!(out.ndf, hits.len() - 3);
        // z parameters untouched in a 2D fit
        assert_eq!(out.helix.dz(), 0.0);
        assert_eq!(out.covariance[(4, 4)], 0.0);
    }

    #[test]
    fn full_fit_recovers_dip() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::All, 0.0);
        let mut links = links_for(&hits);
        let mut seed = truth.clone();
        seed.set_z_line(0.0, 0.3);
        let out = HelixFitter::default().fit(&seed, &mut links, &hits).unwrap();
        assert_eq!(out.dimension, 5);
        assert_abs_diff_eq!(out.helix.tan_lambda(), 0.35, epsilon = 1e-3);
        assert_abs_diff_eq!(out.helix.dz(), 2.0, epsilon = 0.05);
        assert!(out.covariance[(4, 4)] > 0.0);
    }

    #[test]
    fn refit_of_converged_helix_is_stable() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let mut links = links_for(&hits);
        let fitter = HelixFitter::default();
        let first = fitter.fit(&truth, &mut links, &hits).unwrap();
        let second = fitter.fit(&first.helix, &mut links, &hits).unwrap();
        assert!((second.chi2 - first.chi2).abs() < fitter.config.convergence);
    }

    #[test]
    fn too_few_hits_is_reported() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let mut links: Vec<Link> = links_for(&hits).into_iter().take(2).collect();
        let err = HelixFitter::default().fit(&truth, &mut links, &hits).unwrap_err();
        assert!(matches!(
            err,
            ReconError::InsufficientHits {
                stage: Stage::HelixFit,
                found: 2,
                required: 3
            }
        ));
    }

    #[test]
    fn iteration_cap_is_a_convergence_failure() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let mut links = links_for(&hits);
        let seed = Helix::from_parameters(0.3, 0.78, 1.0 / 100.0, 0.0, 0.0);
        let fitter = HelixFitter::new(FitterConfig {
            max_iterations: 1,
            ..FitterConfig::default()
        });
        let err = fitter.fit(&seed, &mut links, &hits).unwrap_err();
        assert!(matches!(err, ReconError::ConvergenceFailure { iterations: 1 }));
    }

    #[test]
    fn step_halving_floor_is_a_convergence_failure() {
        let truth = truth();
        let hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let mut links = links_for(&hits);
        let seed = Helix::from_parameters(0.3, 0.78, 1.0 / 100.0, 0.0, 0.0);
        // Every trial step lands above the curvature limit
        let fitter = HelixFitter::new(FitterConfig {
            max_kappa: 1e-4,
            ..FitterConfig::default()
        });
        let err = fitter.fit(&seed, &mut links, &hits).unwrap_err();
        assert!(matches!(err, ReconError::ConvergenceFailure { iterations: 1 }));
    }

    #[test]
    fn weightless_stereo_hits_leave_the_dip_singular() {
        let truth = truth();
        let mut hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        let n_axial = hits.len();
        let stereo = helix_hits(&truth, HitSelection::Stereo, 0.0);
        hits.extend(stereo.into_iter().take(2).map(|mut h| {
            h.drift_error = [f64::INFINITY; 2];
            h
        }));
        let mut links = links_for(&hits);
        assert_eq!(links.len(), n_axial + 2);
        let err = HelixFitter::default().fit(&truth, &mut links, &hits).unwrap_err();
        assert!(matches!(err, ReconError::SingularCovariance));
    }

    #[test]
    fn refine_drops_large_pulls() {
        let truth = truth();
        let mut hits = helix_hits(&truth, HitSelection::Axial, 0.0);
        hits[3].drift = [0.9; 2];
        let mut links = links_for(&hits);
        let fitter = HelixFitter::default();
        fitter.update_links(&truth, &mut links, &hits).unwrap();
        let removed = refine(&mut links, 30.0);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].hit, crate::types::HitId(3));
        assert_eq!(links.len(), hits.len() - 1);
    }
}
