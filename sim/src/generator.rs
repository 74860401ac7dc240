//! Toy event generator.
//!
//! Produces ideal helices from the origin (or through-going tracks), the
//! wire they cross nearest in every layer, optional Gaussian drift smearing,
//! per-hit inefficiency and uniform noise hits. Hit flags are derived from
//! the neighbourhood of each hit the way an upstream hit stage would.
//!
//! Events are deterministic: each one draws from its own `ChaCha8Rng`
//! seeded from the generator seed and the event index.

use chamber_model::{Chamber, WireGeometry, WireId};
use finder_core::helix::{Helix, ALPHA};
use finder_core::metrics::ParticleTruth;
use finder_core::types::{HitFlags, WireHit};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::f64::consts::TAU;

// ---------------------------------------------------------------------------
// Particles
// ---------------------------------------------------------------------------

/// A generated charged particle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: u64,
    /// Transverse momentum (GeV/c)
    pub pt: f64,
    /// +1 / −1
    pub charge: f64,
    pub phi0: f64,
    pub tan_lambda: f64,
    pub dz: f64,
    /// Signed distance of closest approach to the z axis (cm)
    pub dr: f64,
}

impl Particle {
    pub fn helix(&self) -> Helix {
        let kappa = self.charge / (ALPHA * self.pt);
        Helix::from_parameters(self.dr, self.phi0, kappa, self.dz, self.tan_lambda)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub n_particles: usize,
    /// Uniform pt range (GeV/c)
    pub pt_range: [f64; 2],
    pub tan_lambda_range: [f64; 2],
    /// Gaussian spread of the z origin (cm)
    pub dz_sigma: f64,
    /// Uniform |dr| range (cm), sign drawn at random
    pub dr_range: [f64; 2],
    /// Gaussian σ added to every drift distance (cm)
    pub drift_smear: f64,
    /// Drift uncertainty assigned to every hit (cm)
    pub drift_error: f64,
    /// Probability that a crossed wire records a hit
    pub efficiency: f64,
    /// Probability that any wire carries a noise hit
    pub noise_fraction: f64,
    /// Record both halves of the helix (cosmics)
    pub through_going: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_particles: 1,
            pt_range: [0.5, 2.0],
            tan_lambda_range: [-0.5, 0.8],
            dz_sigma: 1.0,
            dr_range: [0.0, 0.0],
            drift_smear: 0.0,
            drift_error: 0.02,
            efficiency: 1.0,
            noise_fraction: 0.0,
            through_going: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One recorded hit: wire, drift and the particle that made it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedHit {
    pub wire: WireId,
    pub drift: f64,
    pub drift_error: f64,
    pub flags: HitFlags,
    /// `None` for noise
    pub particle: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedEvent {
    pub index: u64,
    pub particles: Vec<Particle>,
    /// Ordered by wire id
    pub hits: Vec<RecordedHit>,
}

/// Finder input of one event, with truth aligned to the hit ids the
/// pipeline assigns (axial hits first, then stereo).
#[derive(Clone, Debug)]
pub struct EventInput {
    pub axial: Vec<WireHit>,
    pub stereo: Vec<WireHit>,
    pub hit_truth: Vec<Option<u64>>,
}

impl GeneratedEvent {
    /// Materialize the hits against `geometry`.
    pub fn input(&self, geometry: &dyn WireGeometry) -> anyhow::Result<EventInput> {
        let mut axial = Vec::new();
        let mut stereo = Vec::new();
        let mut axial_truth = Vec::new();
        let mut stereo_truth = Vec::new();
        for h in &self.hits {
            let hit = WireHit::new(geometry, h.wire, h.drift, h.drift_error)
                .ok_or_else(|| anyhow::anyhow!("unknown wire {} in event {}", h.wire, self.index))?
                .with_flags(h.flags);
            if hit.is_axial() {
                axial.push(hit);
                axial_truth.push(h.particle);
            } else {
                stereo.push(hit);
                stereo_truth.push(h.particle);
            }
        }
        axial_truth.extend(stereo_truth);
        Ok(EventInput {
            axial,
            stereo,
            hit_truth: axial_truth,
        })
    }

    pub fn particle_truth(&self) -> Vec<ParticleTruth> {
        self.particles
            .iter()
            .map(|p| ParticleTruth {
                id: p.id,
                pt: p.pt,
                charge: p.charge,
                n_hits: self.hits.iter().filter(|h| h.particle == Some(p.id)).count(),
            })
            .collect()
    }

    pub fn n_noise(&self) -> usize {
        self.hits.iter().filter(|h| h.particle.is_none()).count()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct EventGenerator {
    pub config: GeneratorConfig,
    chamber: Chamber,
    seed: u64,
    next_event: u64,
}

impl EventGenerator {
    pub fn new(config: GeneratorConfig, chamber: Chamber, seed: u64) -> Self {
        Self {
            config,
            chamber,
            seed,
            next_event: 0,
        }
    }

    pub fn chamber(&self) -> &Chamber {
        &self.chamber
    }

    /// Generate the next event.
    pub fn next_event(&mut self) -> GeneratedEvent {
        let index = self.next_event;
        self.next_event += 1;
        self.generate(index)
    }

    /// Generate event `index`; the same index always gives the same event.
    pub fn generate(&self, index: u64) -> GeneratedEvent {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let particles: Vec<Particle> = (0..self.config.n_particles as u64)
            .map(|id| self.sample_particle(id, &mut rng))
            .collect();

        // wire -> (drift, particle); the smaller drift wins a shared wire
        let mut recorded: BTreeMap<WireId, (f64, Option<u64>)> = BTreeMap::new();
        for p in &particles {
            self.particle_hits(p, &mut rng, &mut recorded);
        }
        self.noise_hits(&mut rng, &mut recorded);

        let occupied: HashSet<(u32, u32)> = recorded
            .keys()
            .filter_map(|id| self.chamber.wire(*id))
            .map(|w| (w.layer, w.local_id))
            .collect();
        let hits = recorded
            .into_iter()
            .map(|(wire, (drift, particle))| RecordedHit {
                wire,
                drift,
                drift_error: self.config.drift_error,
                flags: self.flags(wire, &occupied),
                particle,
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            event = index,
            particles = particles.len(),
            hits = hits.len(),
            "event generated"
        );
        GeneratedEvent {
            index,
            particles,
            hits,
        }
    }

    fn sample_particle(&self, id: u64, rng: &mut ChaCha8Rng) -> Particle {
        let c = &self.config;
        let charge = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        let dr_sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
        Particle {
            id,
            pt: uniform(rng, c.pt_range),
            charge,
            phi0: rng.gen::<f64>() * TAU,
            tan_lambda: uniform(rng, c.tan_lambda_range),
            dz: gaussian(rng, c.dz_sigma),
            dr: dr_sign * uniform(rng, c.dr_range),
        }
    }

    fn particle_hits(
        &self,
        particle: &Particle,
        rng: &mut ChaCha8Rng,
        recorded: &mut BTreeMap<WireId, (f64, Option<u64>)>,
    ) {
        let helix = particle.helix();
        let branches: &[f64] = if self.config.through_going {
            &[1.0, -1.0]
        } else {
            &[1.0]
        };
        for layer in 0..self.chamber.n_layers() as u32 {
            let Some(r) = self.chamber.layer_radius(layer) else {
                continue;
            };
            let Some(out) = helix.crossing_at_radius(r) else {
                continue;
            };
            for &branch in branches {
                let p = helix.position(branch * out);
                let Some(wire) = self.chamber.layer_wires(layer).iter().min_by(|a, b| {
                    let da = (a.position_at_z(p.z).xy() - p.xy()).norm();
                    let db = (b.position_at_z(p.z).xy() - p.xy()).norm();
                    da.total_cmp(&db)
                }) else {
                    continue;
                };
                if !wire.contains_z(p.z) || rng.gen::<f64>() >= self.config.efficiency {
                    continue;
                }
                let Ok(approach) = helix.approach(wire) else {
                    continue;
                };
                if approach.distance > wire.cell_size() {
                    continue;
                }
                let drift = (approach.distance + gaussian(rng, self.config.drift_smear)).max(0.0);
                let entry = recorded.entry(wire.id).or_insert((f64::INFINITY, None));
                if drift < entry.0 {
                    *entry = (drift, Some(particle.id));
                }
            }
        }
    }

    fn noise_hits(&self, rng: &mut ChaCha8Rng, recorded: &mut BTreeMap<WireId, (f64, Option<u64>)>) {
        if self.config.noise_fraction <= 0.0 {
            return;
        }
        for wire in self.chamber.wires() {
            if rng.gen::<f64>() < self.config.noise_fraction && !recorded.contains_key(&wire.id) {
                let drift = rng.gen::<f64>() * 0.5 * wire.cell_size();
                recorded.insert(wire.id, (drift, None));
            }
        }
    }

    /// Neighbourhood flags: isolated when no adjacent cell of the layer
    /// fired, continuous when an adjacent layer of the super-layer fired
    /// within one cell, patterned when every adjacent layer did.
    fn flags(&self, id: WireId, occupied: &HashSet<(u32, u32)>) -> HitFlags {
        let Some(wire) = self.chamber.wire(id) else {
            return HitFlags::default();
        };
        let n = wire.n_in_layer.max(1);
        let near = |layer: u32, offsets: &[i64]| {
            offsets.iter().any(|&d| {
                let local = (wire.local_id as i64 + d).rem_euclid(n as i64) as u32;
                occupied.contains(&(layer, local))
            })
        };
        let isolated = !near(wire.layer, &[-1, 1]);
        let adjacent: Vec<u32> = [wire.layer.checked_sub(1), Some(wire.layer + 1)]
            .into_iter()
            .flatten()
            .filter(|&l| {
                self.chamber
                    .layer_wires(l)
                    .first()
                    .is_some_and(|w| w.super_layer == wire.super_layer)
            })
            .collect();
        let fired = adjacent
            .iter()
            .filter(|&&l| near(l, &[-1, 0, 1]))
            .count();
        let pattern = !adjacent.is_empty() && fired == adjacent.len();
        HitFlags {
            isolated,
            continuous: fired > 0,
            pattern_left: pattern,
            pattern_right: pattern,
            fitting_valid: true,
        }
    }
}

fn uniform(rng: &mut ChaCha8Rng, range: [f64; 2]) -> f64 {
    if range[1] > range[0] {
        rng.gen_range(range[0]..range[1])
    } else {
        range[0]
    }
}

fn gaussian(rng: &mut ChaCha8Rng, sigma: f64) -> f64 {
    match Normal::new(0.0, sigma) {
        Ok(n) if sigma > 0.0 => n.sample(rng),
        _ => 0.0,
    }
}
