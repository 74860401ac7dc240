//! Reconstruction metrics: efficiency, fake rate, clones, pt resolution.
//!
//! Tracks are matched to generated particles by hit majority. A track whose
//! leading particle owns less than `min_purity` of its hits is a fake; a
//! second track matched to an already found particle is a clone.

use crate::track::Track;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Generated particle as seen by the chamber.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleTruth {
    pub id: u64,
    pub pt: f64,
    pub charge: f64,
    /// Hits the particle left in the event
    pub n_hits: usize,
}

/// Accumulated metric statistics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructionMetrics {
    /// Minimum fraction of a track's hits owned by its matched particle
    pub min_purity: f64,
    /// Particles need this many hits to count as reconstructable
    pub min_particle_hits: usize,
    pub n_events: u64,
    pub n_particles: u64,
    pub n_tracks: u64,
    /// Reconstructable particles matched by at least one track
    pub n_found: u64,
    pub n_fakes: u64,
    pub n_clones: u64,
    /// Matched tracks with the wrong charge sign
    pub n_charge_flips: u64,
    /// Sum of squared relative pt errors of matched tracks
    pub sum_sq_pt_err: f64,
    pub n_pt_samples: u64,
    /// Total wall time reported by the pipeline
    pub total_time_us: u64,
}

impl Default for ReconstructionMetrics {
    fn default() -> Self {
        Self {
            min_purity: 0.66,
            min_particle_hits: 10,
            n_events: 0,
            n_particles: 0,
            n_tracks: 0,
            n_found: 0,
            n_fakes: 0,
            n_clones: 0,
            n_charge_flips: 0,
            sum_sq_pt_err: 0.0,
            n_pt_samples: 0,
            total_time_us: 0,
        }
    }
}

/// Leading particle of one track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackMatch {
    pub particle: u64,
    pub purity: f64,
}

/// Particle owning most of the track's hits. `hit_truth` is indexed by hit
/// id; `None` marks noise.
pub fn match_track(track: &Track, hit_truth: &[Option<u64>]) -> Option<TrackMatch> {
    if track.links.is_empty() {
        return None;
    }
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for h in track.hit_ids() {
        if let Some(Some(p)) = hit_truth.get(h.index()) {
            *counts.entry(*p).or_default() += 1;
        }
    }
    let (particle, n) = counts.into_iter().max_by_key(|&(p, n)| (n, std::cmp::Reverse(p)))?;
    Some(TrackMatch {
        particle,
        purity: n as f64 / track.n_hits() as f64,
    })
}

impl ReconstructionMetrics {
    /// Found reconstructable particles / reconstructable particles.
    pub fn efficiency(&self) -> f64 {
        if self.n_particles == 0 {
            return 1.0;
        }
        self.n_found as f64 / self.n_particles as f64
    }

    /// Fakes / tracks
    pub fn fake_rate(&self) -> f64 {
        if self.n_tracks == 0 {
            return 0.0;
        }
        self.n_fakes as f64 / self.n_tracks as f64
    }

    /// RMS of (pt_rec − pt_true) / pt_true over matched tracks.
    pub fn pt_resolution(&self) -> f64 {
        if self.n_pt_samples == 0 {
            return 0.0;
        }
        (self.sum_sq_pt_err / self.n_pt_samples as f64).sqrt()
    }

    pub fn mean_time_us(&self) -> f64 {
        if self.n_events == 0 {
            return 0.0;
        }
        self.total_time_us as f64 / self.n_events as f64
    }

    /// Accumulate one event.
    pub fn accumulate<'a>(
        &mut self,
        tracks: impl IntoIterator<Item = &'a Track>,
        hit_truth: &[Option<u64>],
        particles: &[ParticleTruth],
        time_us: u64,
    ) {
        self.n_events += 1;
        self.total_time_us += time_us;

        let truth: BTreeMap<u64, &ParticleTruth> = particles.iter().map(|p| (p.id, p)).collect();
        let reconstructable: HashSet<u64> = particles
            .iter()
            .filter(|p| p.n_hits >= self.min_particle_hits)
            .map(|p| p.id)
            .collect();
        self.n_particles += reconstructable.len() as u64;

        let mut found = HashSet::new();
        for track in tracks {
            self.n_tracks += 1;
            let Some(m) = match_track(track, hit_truth).filter(|m| m.purity >= self.min_purity)
            else {
                self.n_fakes += 1;
                continue;
            };
            if !found.insert(m.particle) {
                self.n_clones += 1;
                continue;
            }
            if reconstructable.contains(&m.particle) {
                self.n_found += 1;
            }
            if let Some(p) = truth.get(&m.particle) {
                if p.pt > 0.0 {
                    let rel = (track.pt() - p.pt) / p.pt;
                    self.sum_sq_pt_err += rel * rel;
                    self.n_pt_samples += 1;
                }
                if track.charge * p.charge < 0.0 {
                    self.n_charge_flips += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::HelixFitter;
    use crate::helix::Helix;
    use crate::selector::TrackQuality;
    use crate::test_utils::{helix_hits, links_for, HitSelection, DRIFT_ERROR};
    use crate::track::{BuilderKind, Candidate};
    use crate::types::{HitId, TrackId};
    use approx::assert_abs_diff_eq;

    fn track(id: u64, helix: &Helix, keep: impl Fn(HitId) -> bool) -> (Track, usize) {
        let hits = helix_hits(helix, HitSelection::Axial, DRIFT_ERROR);
        let links: Vec<_> = links_for(&hits).into_iter().filter(|l| keep(l.hit)).collect();
        let mut cand = Candidate::seed(helix.clone(), links);
        cand.fit(&HelixFitter::default(), &hits).unwrap();
        let q: TrackQuality = cand.quality(&hits);
        (
            Track::finalize(TrackId(id), BuilderKind::Normal, cand, q),
            hits.len(),
        )
    }

    #[test]
    fn pure_track_is_found_with_pt() {
        let helix = Helix::from_parameters(0.0, 0.5, 1.0 / 150.0, 0.0, 0.0);
        let (t, n) = track(0, &helix, |_| true);
        let truth = vec![Some(7); n];
        let particle = ParticleTruth {
            id: 7,
            pt: helix.pt(),
            charge: 1.0,
            n_hits: n,
        };
        let mut m = ReconstructionMetrics::default();
        m.accumulate([&t], &truth, &[particle], 100);
        assert_eq!(m.n_found, 1);
        assert_eq!(m.efficiency(), 1.0);
        assert_eq!(m.fake_rate(), 0.0);
        assert_abs_diff_eq!(m.pt_resolution(), 0.0, epsilon = 1e-3);
        assert_eq!(m.mean_time_us(), 100.0);
    }

    #[test]
    fn mixed_track_is_fake_and_duplicate_is_clone() {
        let helix = Helix::from_parameters(0.0, 0.5, 1.0 / 150.0, 0.0, 0.0);
        let (t, n) = track(0, &helix, |_| true);
        let (dup, _) = track(1, &helix, |h| h.index() % 2 == 0);
        let particle = ParticleTruth {
            id: 1,
            pt: helix.pt(),
            charge: 1.0,
            n_hits: n,
        };

        // Half the hits belong to another particle
        let mixed: Vec<Option<u64>> = (0..n).map(|i| Some(if i < n / 2 { 1 } else { 2 })).collect();
        let mut m = ReconstructionMetrics::default();
        m.accumulate([&t], &mixed, &[particle.clone()], 0);
        assert_eq!(m.n_fakes, 1);
        assert_eq!(m.n_found, 0);

        let clean = vec![Some(1); n];
        let mut m = ReconstructionMetrics::default();
        m.accumulate([&t, &dup], &clean, &[particle], 0);
        assert_eq!(m.n_found, 1);
        assert_eq!(m.n_clones, 1);
        assert_eq!(m.n_tracks, 2);
    }

    #[test]
    fn noise_only_track_has_no_match() {
        let helix = Helix::from_parameters(0.0, 0.5, 1.0 / 150.0, 0.0, 0.0);
        let (t, n) = track(0, &helix, |_| true);
        assert!(match_track(&t, &vec![None; n]).is_none());
    }
}
