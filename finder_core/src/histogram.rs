//! Angular histogram of conformal links for one super-layer.
//!
//! # Algorithm
//! 1. `fill`: each link goes to bin `floor((phi + offset) / width) mod n`.
//! 2. `clusters`: starting right after an empty bin, scan the ring once and
//!    cut it into runs of consecutive occupied bins. A run crossing the
//!    0/2π seam is one run, never two. When no bin is empty the whole ring
//!    is one run.
//! 3. `remove`: purge consumed links before the histogram is re-scanned.

use crate::segment::Segment;
use crate::types::EventView;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Segment finding and classification parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Histogram bins for each axial super-layer, inside out
    pub bins_per_super_layer: Vec<usize>,
    /// Phase added to phi before binning (rad)
    pub bin_offset: f64,
    /// A layer end is "fat" from this many wires on
    pub fat: u32,
    /// A segment is "tall" above this many layers
    pub tall: u32,
    /// Tolerance on |g − d1 − d2| for two hits to be one crossing (cm)
    pub dual_tolerance: f64,
    /// Dual split needs more than this many dual layers
    pub dual_split_min_pairs: u32,
    /// Dual split needs a mean duality above this (cm)
    pub dual_split_duality: f64,
    /// Dual split needs an entry angle cosine above this
    pub dual_split_angle: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bins_per_super_layer: vec![64, 96, 144, 192, 240, 288],
            bin_offset: 0.0,
            fat: 3,
            tall: 3,
            dual_tolerance: 0.5,
            dual_split_min_pairs: 2,
            dual_split_duality: 0.7,
            dual_split_angle: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Clusterer
// ---------------------------------------------------------------------------

/// Circular phi histogram holding link arena indices.
#[derive(Clone, Debug)]
pub struct Clusterer {
    offset: f64,
    bins: Vec<Vec<usize>>,
}

impl Clusterer {
    pub fn new(n_bins: usize) -> Self {
        Self::with_offset(n_bins, 0.0)
    }

    pub fn with_offset(n_bins: usize, offset: f64) -> Self {
        Self {
            offset,
            bins: vec![Vec::new(); n_bins.max(1)],
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn bin_width(&self) -> f64 {
        TAU / self.bins.len() as f64
    }

    pub fn bin_of(&self, phi: f64) -> usize {
        let n = self.bins.len() as i64;
        let b = ((phi + self.offset) / self.bin_width()).floor() as i64;
        b.rem_euclid(n) as usize
    }

    pub fn occupancy(&self, bin: usize) -> usize {
        self.bins.get(bin).map_or(0, Vec::len)
    }

    pub fn n_entries(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Add links (arena indices) to the histogram.
    pub fn fill(&mut self, view: &EventView<'_>, members: &[usize]) {
        for &idx in members {
            let b = self.bin_of(view.link(idx).conformal.x);
            self.bins[b].push(idx);
        }
    }

    /// Purge the given links from every bin.
    pub fn remove(&mut self, used: &[usize]) {
        if used.is_empty() {
            return;
        }
        for bin in &mut self.bins {
            bin.retain(|idx| !used.contains(idx));
        }
    }

    /// Link groups of each run of consecutive occupied bins.
    pub fn runs(&self) -> Vec<Vec<usize>> {
        let n = self.bins.len();
        let Some(empty) = self.bins.iter().position(Vec::is_empty) else {
            // Fully occupied ring
            return vec![self.bins.iter().flatten().copied().collect()];
        };

        let mut runs = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        for k in 1..=n {
            let bin = &self.bins[(empty + k) % n];
            if bin.is_empty() {
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            } else {
                current.extend_from_slice(bin);
            }
        }
        // The scan ends on the starting empty bin, so `current` is flushed.
        runs
    }

    /// One raw segment per run.
    pub fn clusters(&self, view: &EventView<'_>, config: &ClusterConfig) -> Vec<Segment> {
        self.runs()
            .into_iter()
            .map(|links| Segment::new(links, view, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HitId, Link, Point2};

    fn links_at(phis: &[f64]) -> Vec<Link> {
        phis.iter()
            .enumerate()
            .map(|(i, &phi)| Link::new(HitId(i as u32), Point2::new(phi, 3.0)))
            .collect()
    }

    fn filled(n_bins: usize, phis: &[f64]) -> Clusterer {
        let links = links_at(phis);
        let view = EventView {
            hits: &[],
            links: &links,
        };
        let mut c = Clusterer::new(n_bins);
        let members: Vec<usize> = (0..links.len()).collect();
        c.fill(&view, &members);
        c
    }

    fn bin_centre(bin: usize, n: usize) -> f64 {
        (bin as f64 + 0.5) * TAU / n as f64
    }

    #[test]
    fn one_contiguous_run_is_one_cluster() {
        let phis: Vec<f64> = (10..14).map(|b| bin_centre(b, 64)).collect();
        let c = filled(64, &phis);
        let runs = c.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 4);
    }

    #[test]
    fn two_disjoint_runs_are_two_clusters() {
        let mut phis: Vec<f64> = (10..13).map(|b| bin_centre(b, 64)).collect();
        phis.extend((30..32).map(|b| bin_centre(b, 64)));
        let c = filled(64, &phis);
        assert_eq!(c.runs().len(), 2);
    }

    #[test]
    fn run_across_the_seam_is_one_cluster() {
        let phis = [
            bin_centre(62, 64),
            bin_centre(63, 64),
            bin_centre(0, 64),
            bin_centre(1, 64),
        ];
        let c = filled(64, &phis);
        let runs = c.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 4);
    }

    #[test]
    fn fully_occupied_ring_is_one_cluster() {
        let phis: Vec<f64> = (0..8).map(|b| bin_centre(b, 8)).collect();
        let c = filled(8, &phis);
        assert_eq!(c.runs().len(), 1);
    }

    #[test]
    fn remove_splits_a_run() {
        let phis: Vec<f64> = (10..15).map(|b| bin_centre(b, 64)).collect();
        let mut c = filled(64, &phis);
        c.remove(&[2]);
        assert_eq!(c.runs().len(), 2);
        assert_eq!(c.n_entries(), 4);
    }

    #[test]
    fn binning_wraps_negative_phi() {
        let c = Clusterer::new(64);
        assert_eq!(c.bin_of(-0.01), 63);
        assert_eq!(c.bin_of(TAU + 0.01), 0);
    }
}
