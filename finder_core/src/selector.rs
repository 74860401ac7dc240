//! Track quality gate.
//!
//! One `SelectorConfig` is consulted at every accept/reject point of a
//! candidate. The gate only decides which thresholds apply:
//!
//! | gate   | hits | super-layers | pt | impact | sigma | stereo hits | dz |
//! |--------|------|--------------|----|--------|-------|-------------|----|
//! | Seed   | ✓    | ✓            | ✓  | ✓      |       |             |    |
//! | Planar | ✓    | ✓            | ✓  | ✓      | ✓     |             |    |
//! | Stereo |      |              |    |        | ✓     | ✓           | ✓  |
//! | Final  | ✓    | ✓            | ✓  | ✓      | ✓     | if 3D       | if 3D |

use crate::helix::Helix;
use crate::types::{Link, WireHit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub min_hits: usize,
    pub min_stereo_hits: usize,
    pub min_super_layers: usize,
    /// GeV/c
    pub min_pt: f64,
    /// |dr| (cm)
    pub max_impact: f64,
    /// sqrt(χ²/ndf)
    pub max_sigma: f64,
    /// |dz| of the sz line (cm)
    pub max_distance: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_hits: 4,
            min_stereo_hits: 3,
            min_super_layers: 2,
            min_pt: 0.05,
            max_impact: 100.0,
            max_sigma: 3.0,
            max_distance: 30.0,
        }
    }
}

/// Accept/reject points of the candidate state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gate {
    /// Right after the circle seed
    Seed,
    /// After the 2D fit and refinement
    Planar,
    /// After the stereo search and 3D refit
    Stereo,
    /// Before finalizing
    Final,
}

#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectionFailure {
    #[error("{found} hits, {required} required")]
    TooFewHits { found: usize, required: usize },
    #[error("{found} stereo hits, {required} required")]
    TooFewStereoHits { found: usize, required: usize },
    #[error("{found} super-layers, {required} required")]
    TooFewSuperLayers { found: usize, required: usize },
    #[error("pt {pt:.4} below {min:.4}")]
    LowPt { pt: f64, min: f64 },
    #[error("impact {impact:.2} above {max:.2}")]
    LargeImpact { impact: f64, max: f64 },
    #[error("sigma {sigma:.3} above {max:.3}")]
    LargeSigma { sigma: f64, max: f64 },
    #[error("z distance {distance:.2} above {max:.2}")]
    LargeDistance { distance: f64, max: f64 },
}

/// Attributes of a fitted candidate that the selector looks at.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackQuality {
    pub n_hits: usize,
    pub n_axial: usize,
    pub n_stereo: usize,
    pub n_super_layers: usize,
    pub pt: f64,
    pub impact: f64,
    pub dz: f64,
    /// sqrt(χ²/ndf), zero when ndf = 0
    pub sigma: f64,
}

impl TrackQuality {
    pub fn measure(helix: &Helix, links: &[Link], hits: &[WireHit], chi2: f64, ndf: usize) -> Self {
        let mut n_stereo = 0;
        let mut super_layers = BTreeSet::new();
        for l in links {
            let h = &hits[l.hit.index()];
            if !h.is_axial() {
                n_stereo += 1;
            }
            super_layers.insert(h.super_layer());
        }
        Self {
            n_hits: links.len(),
            n_axial: links.len() - n_stereo,
            n_stereo,
            n_super_layers: super_layers.len(),
            pt: helix.pt(),
            impact: helix.impact(),
            dz: helix.dz(),
            sigma: if ndf > 0 { (chi2 / ndf as f64).sqrt() } else { 0.0 },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Selector {
    pub config: SelectorConfig,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// `three_d` says whether stereo reconstruction is part of the run; it
    /// only matters at the final gate.
    pub fn check(
        &self,
        q: &TrackQuality,
        gate: Gate,
        three_d: bool,
    ) -> Result<(), SelectionFailure> {
        let c = &self.config;
        let planar = gate != Gate::Stereo;
        let stereo = gate == Gate::Stereo || (gate == Gate::Final && three_d);

        if planar {
            if q.n_hits < c.min_hits {
                return Err(SelectionFailure::TooFewHits {
                    found: q.n_hits,
                    required: c.min_hits,
                });
            }
            if q.n_super_layers < c.min_super_layers {
                return Err(SelectionFailure::TooFewSuperLayers {
                    found: q.n_super_layers,
                    required: c.min_super_layers,
                });
            }
            if q.pt < c.min_pt {
                return Err(SelectionFailure::LowPt {
                    pt: q.pt,
                    min: c.min_pt,
                });
            }
            if q.impact > c.max_impact {
                return Err(SelectionFailure::LargeImpact {
                    impact: q.impact,
                    max: c.max_impact,
                });
            }
        }
        if gate != Gate::Seed && q.sigma > c.max_sigma {
            return Err(SelectionFailure::LargeSigma {
                sigma: q.sigma,
                max: c.max_sigma,
            });
        }
        if stereo {
            if q.n_stereo < c.min_stereo_hits {
                return Err(SelectionFailure::TooFewStereoHits {
                    found: q.n_stereo,
                    required: c.min_stereo_hits,
                });
            }
            if q.dz.abs() > c.max_distance {
                return Err(SelectionFailure::LargeDistance {
                    distance: q.dz.abs(),
                    max: c.max_distance,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> TrackQuality {
        TrackQuality {
            n_hits: 20,
            n_axial: 14,
            n_stereo: 6,
            n_super_layers: 6,
            pt: 0.5,
            impact: 0.2,
            dz: 1.0,
            sigma: 1.1,
        }
    }

    #[test]
    fn good_track_passes_every_gate() {
        let s = Selector::default();
        for gate in [Gate::Seed, Gate::Planar, Gate::Stereo, Gate::Final] {
            assert!(s.check(&good(), gate, true).is_ok());
        }
    }

    #[test]
    fn seed_gate_ignores_sigma() {
        let s = Selector::default();
        let q = TrackQuality { sigma: 50.0, ..good() };
        assert!(s.check(&q, Gate::Seed, true).is_ok());
        assert!(matches!(
            s.check(&q, Gate::Planar, true),
            Err(SelectionFailure::LargeSigma { .. })
        ));
    }

    #[test]
    fn stereo_count_only_checked_in_3d() {
        let s = Selector::default();
        let q = TrackQuality { n_stereo: 2, ..good() };
        assert_eq!(
            s.check(&q, Gate::Stereo, true),
            Err(SelectionFailure::TooFewStereoHits {
                found: 2,
                required: 3
            })
        );
        assert!(s.check(&q, Gate::Final, false).is_ok());
        assert!(s.check(&q, Gate::Planar, true).is_ok());
    }

    #[test]
    fn thresholds_are_reported() {
        let s = Selector::default();
        let q = TrackQuality { pt: 0.01, ..good() };
        let err = s.check(&q, Gate::Final, true).unwrap_err();
        assert_eq!(err.to_string(), "pt 0.0100 below 0.0500");
        let q = TrackQuality { impact: 150.0, ..good() };
        assert!(matches!(
            s.check(&q, Gate::Seed, true),
            Err(SelectionFailure::LargeImpact { .. })
        ));
    }
}
