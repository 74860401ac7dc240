//! Per-candidate track building: 2D fit, stereo extension and salvage.
//!
//! `TrackBuilder` carries the shared procedure as default methods; the
//! three topologies only differ in how stereo arc lengths are measured and
//! which leftover hits they may pick up.

use crate::circle::CircleFitter;
use crate::error::{ReconError, Result, Stage};
use crate::fitter::{FitterConfig, HelixFitter};
use crate::helix::Helix;
use crate::selector::{Gate, Selector, SelectorConfig};
use crate::stereo::{solve_sz, ArcMode, StereoConfig};
use crate::track::{BuilderKind, Candidate, CandidateState};
use crate::types::{Link, Point2, WireHit};
use std::collections::BTreeSet;

/// Settings shared by every builder variant.
#[derive(Clone, Debug)]
pub struct BuilderCore {
    pub selector: Selector,
    pub fitter: HelixFitter,
    pub stereo: StereoConfig,
    /// Pull limit for salvaged hits
    pub salvage_level: f64,
    /// Below this many core hits every link is used for the seed
    pub min_cores: usize,
    /// Distinct layers required among the seed hits
    pub min_seed_layers: usize,
    /// Whether stereo reconstruction is part of the run
    pub three_d: bool,
}

impl BuilderCore {
    pub fn new(
        selector: SelectorConfig,
        fitter: FitterConfig,
        stereo: StereoConfig,
        salvage_level: f64,
        three_d: bool,
    ) -> Self {
        Self {
            selector: Selector::new(selector),
            fitter: HelixFitter::new(fitter),
            stereo,
            salvage_level,
            min_cores: 5,
            min_seed_layers: 5,
            three_d,
        }
    }

    fn check(&self, cand: &Candidate, hits: &[WireHit], gate: Gate) -> Result<()> {
        let q = cand.quality(hits);
        self.selector
            .check(&q, gate, self.three_d)
            .map_err(ReconError::from)
    }
}

impl Default for BuilderCore {
    fn default() -> Self {
        Self::new(
            SelectorConfig::default(),
            FitterConfig::default(),
            StereoConfig::default(),
            5.0,
            true,
        )
    }
}

pub trait TrackBuilder {
    fn core(&self) -> &BuilderCore;

    fn kind(&self) -> BuilderKind;

    fn arc_mode(&self) -> ArcMode {
        ArcMode::FromOrigin
    }

    /// Stereo hits must lie in the half plane of the track's innermost wire.
    fn side_restricted(&self) -> bool {
        true
    }

    /// Whether a leftover hit may be offered to `salvage`.
    fn salvage_accepts(&self, cand: &Candidate, hit: &WireHit) -> bool {
        same_side(&cand.helix, &hit.xy_position())
    }

    /// Circle seed and 2D fit of the axial links of one segment chain.
    fn build_planar(&self, links: Vec<Link>, hits: &[WireHit]) -> Result<Candidate> {
        let core = self.core();
        let fitter = &core.fitter;

        let mut seed: Vec<Link> = links
            .iter()
            .filter(|l| hits[l.hit.index()].flags.is_core())
            .cloned()
            .collect();
        if seed.len() < core.min_cores {
            seed = links.clone();
        }

        // Every super-layer of the chain keeps at least its closest hit
        let seeded: BTreeSet<u32> = seed
            .iter()
            .map(|l| hits[l.hit.index()].super_layer())
            .collect();
        let all: BTreeSet<u32> = links
            .iter()
            .map(|l| hits[l.hit.index()].super_layer())
            .collect();
        for sl in all.difference(&seeded) {
            let closest = links
                .iter()
                .filter(|l| hits[l.hit.index()].super_layer() == *sl)
                .min_by(|a, b| {
                    hits[a.hit.index()]
                        .drift_for(Default::default())
                        .total_cmp(&hits[b.hit.index()].drift_for(Default::default()))
                });
            if let Some(l) = closest {
                seed.push(l.clone());
            }
        }

        let valid: Vec<&WireHit> = seed
            .iter()
            .map(|l| &hits[l.hit.index()])
            .filter(|h| h.flags.fitting_valid)
            .collect();
        let n_sl = valid.iter().map(|h| h.super_layer()).collect::<BTreeSet<_>>().len();
        if n_sl < 2 {
            return Err(ReconError::InsufficientHits {
                stage: Stage::Planar,
                found: n_sl,
                required: 2,
            });
        }
        let n_layers = valid.iter().map(|h| h.layer()).collect::<BTreeSet<_>>().len();
        if n_layers < core.min_seed_layers {
            return Err(ReconError::InsufficientHits {
                stage: Stage::Planar,
                found: n_layers,
                required: core.min_seed_layers,
            });
        }

        let points: Vec<Point2> = valid.iter().map(|h| h.xy_position()).collect();
        let circle = CircleFitter::fit(&points)?;
        let mut cand = Candidate::seed(Helix::from_circle(&circle)?, seed);
        cand.fit(fitter, hits)?;
        core.check(&cand, hits, Gate::Seed)?;

        let schedule = &fitter.config.refine_schedule;
        if let Some(&first) = schedule.first() {
            if !cand.refine(first).is_empty() {
                cand.fit(fitter, hits)?;
            }
        }
        core.check(&cand, hits, Gate::Planar)?;

        let rest: Vec<Link> = links
            .into_iter()
            .filter(|l| !cand.contains(l.hit))
            .collect();
        let relaxed = core.selector.config.max_sigma.sqrt();
        let added = cand.append_by_approach(rest, hits, fitter, relaxed);
        tracing::trace!(added, "non-core links absorbed");
        cand.fit_with_schedule(fitter, hits, schedule)?;
        core.check(&cand, hits, Gate::Planar)?;
        cand.state = CandidateState::Planar;
        Ok(cand)
    }

    /// Extend a planar candidate with stereo links and refit in 3D.
    fn build_stereo(&self, cand: &mut Candidate, stereo: Vec<Link>, hits: &[WireHit]) -> Result<()> {
        let core = self.core();
        let min_stereo = core.selector.config.min_stereo_hits;
        let sol = solve_sz(
            &cand.helix,
            hits,
            &stereo,
            &core.stereo,
            self.arc_mode(),
            min_stereo,
        )?;

        let mut trial = cand.clone();
        trial.helix.set_z_line(sol.line.intercept, sol.line.slope);
        trial.links.extend(sol.links);
        trial.fit_with_schedule(&core.fitter, hits, &core.stereo.refit_prune)?;
        let n_stereo = trial.n_stereo(hits);
        if n_stereo < min_stereo {
            return Err(ReconError::InsufficientHits {
                stage: Stage::Stereo,
                found: n_stereo,
                required: min_stereo,
            });
        }
        core.check(&trial, hits, Gate::Stereo)?;
        trial.state = CandidateState::Stereo;
        *cand = trial;
        Ok(())
    }

    /// Pick up leftover hits that fit the track. A failed refit leaves the
    /// candidate as it was. Returns how many hits were added.
    fn salvage(&self, cand: &mut Candidate, leftovers: Vec<Link>, hits: &[WireHit]) -> usize {
        let core = self.core();
        let offered: Vec<Link> = leftovers
            .into_iter()
            .filter(|l| self.salvage_accepts(cand, &hits[l.hit.index()]))
            .collect();
        let mut trial = cand.clone();
        let added = trial.append_by_approach(offered, hits, &core.fitter, core.salvage_level);
        if added == 0 {
            return 0;
        }
        if let Err(e) = trial.fit(&core.fitter, hits) {
            tracing::debug!(error = %e, added, "salvage refit failed, kept previous fit");
            return 0;
        }
        trial.state = CandidateState::Salvaged;
        *cand = trial;
        added
    }
}

/// `p` lies on the side of the center the track rotates through.
pub fn same_side(helix: &Helix, p: &Point2) -> bool {
    helix.center().perp(p) * helix.charge() > 0.0
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Tracks from the interaction point.
#[derive(Clone, Debug, Default)]
pub struct NormalBuilder {
    core: BuilderCore,
}

impl NormalBuilder {
    pub fn new(core: BuilderCore) -> Self {
        Self { core }
    }
}

impl TrackBuilder for NormalBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Normal
    }
}

/// Through-going tracks: no side restriction, signed arc length and a
/// loose impact cut.
#[derive(Clone, Debug)]
pub struct CosmicBuilder {
    core: BuilderCore,
}

impl CosmicBuilder {
    pub const IMPACT_SCALE: f64 = 10.0;

    pub fn new(mut core: BuilderCore) -> Self {
        core.selector.config.max_impact *= Self::IMPACT_SCALE;
        Self { core }
    }
}

impl TrackBuilder for CosmicBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Cosmic
    }

    fn arc_mode(&self) -> ArcMode {
        ArcMode::Signed
    }

    fn side_restricted(&self) -> bool {
        false
    }

    fn salvage_accepts(&self, _cand: &Candidate, _hit: &WireHit) -> bool {
        true
    }
}

/// Low-pt tracks looping inside the chamber.
#[derive(Clone, Debug, Default)]
pub struct CurlBuilder {
    core: BuilderCore,
}

impl CurlBuilder {
    pub fn new(core: BuilderCore) -> Self {
        Self { core }
    }
}

impl TrackBuilder for CurlBuilder {
    fn core(&self) -> &BuilderCore {
        &self.core
    }

    fn kind(&self) -> BuilderKind {
        BuilderKind::Curl
    }

    fn arc_mode(&self) -> ArcMode {
        ArcMode::Unwrapped
    }

    /// Both sides, as long as the hit is inside the ring the circle sweeps.
    fn salvage_accepts(&self, cand: &Candidate, hit: &WireHit) -> bool {
        let r = hit.xy_position().norm();
        r <= cand.helix.impact() + 2.0 * cand.helix.radius()
    }
}

impl BuilderKind {
    pub fn instantiate(self, core: BuilderCore) -> Box<dyn TrackBuilder> {
        match self {
            BuilderKind::Normal => Box::new(NormalBuilder::new(core)),
            BuilderKind::Cosmic => Box::new(CosmicBuilder::new(core)),
            BuilderKind::Curl => Box::new(CurlBuilder::new(core)),
        }
    }
}
