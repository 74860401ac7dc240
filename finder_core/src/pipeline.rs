//! Pipeline orchestrator: the full track finding cycle for one event.
//!
//! # Processing steps per event
//! 1. Reset the hit pool; axial hits flagged isolated and continuous become
//!    conformal links
//! 2. Histogram the links of every axial super-layer, split and resolve the
//!    raw segments
//! 3. Standard pass: from the outermost list inward, chain each base segment,
//!    build a 2D candidate, absorb close leftover segments, extend to 3D,
//!    salvage, finalize
//! 4. Relaxed pass: purge used links from the histograms, re-find segments
//!    and retry chains, peeling the outermost segment after each failure
//! 5. Relate curling tracks that continue one another (curl builder only)
//!
//! A candidate that fails anywhere is dropped as a whole and its hits stay
//! available. Hits are marked used only when a track is finalized.

use crate::{
    builder::{same_side, BuilderCore, TrackBuilder},
    conformal::HitTransform,
    error::{ReconError, Result},
    fitter::FitterConfig,
    histogram::{ClusterConfig, Clusterer},
    linker::{LinkerConfig, SegmentLinker},
    segment::SegmentStore,
    selector::{Gate, SelectorConfig},
    stereo::{find_close_hits, StereoConfig},
    track::{BuilderKind, Candidate, Track},
    types::{EventView, HitId, HitPool, Link, Point2, TrackId, WireHit},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the finder, supplied once at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub selector: SelectorConfig,
    pub fitter: FitterConfig,
    pub stereo: StereoConfig,
    pub clustering: ClusterConfig,
    pub linker: LinkerConfig,
    pub builder: BuilderKind,
    /// Super-layer ids of the axial super-layers, inside out
    pub axial_super_layers: Vec<u32>,
    /// Extend 2D candidates with stereo hits
    pub do_stereo: bool,
    /// Let accepted candidates pick up leftover hits
    pub do_salvage: bool,
    /// Run the relaxed second pass
    pub relaxed_pass: bool,
    /// Minimum retained / offered link ratio of a 2D candidate
    pub fraction: f64,
    /// Pull limit for salvaged hits
    pub salvage_level: f64,
    /// Leftover segments closer than this to a new circle are absorbed (cm)
    pub close_segment_distance: f64,
    /// Max gap between a curling track's end and its continuation (cm)
    pub kink_distance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            fitter: FitterConfig::default(),
            stereo: StereoConfig::default(),
            clustering: ClusterConfig::default(),
            linker: LinkerConfig::default(),
            builder: BuilderKind::Normal,
            axial_super_layers: vec![0, 2, 4, 6, 8, 10],
            do_stereo: true,
            do_salvage: true,
            relaxed_pass: true,
            fraction: 0.5,
            salvage_level: 5.0,
            close_segment_distance: 1.0,
            kink_distance: 5.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    Standard,
    Relaxed,
}

/// Why one chain did not produce a track.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub pass: Pass,
    /// Axial list index of the chain's outermost segment
    pub list: usize,
    pub n_segments: usize,
    pub reason: ReconError,
}

/// Outputs of one event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    /// Accepted tracks in acceptance order
    pub tracks: Vec<Track>,
    /// Tracks accepted in 3D whose axial part alone is below the hit minimum
    pub tracks_3d_only: Vec<Track>,
    /// Segments found by the standard pass
    pub n_segments: usize,
    pub rejected: Vec<RejectionRecord>,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

impl ReconstructionOutput {
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().chain(self.tracks_3d_only.iter())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The track finder. Holds the builder and the event-local hit pool.
pub struct Pipeline {
    pub config: PipelineConfig,
    builder: Box<dyn TrackBuilder>,
    linker: SegmentLinker,
    transform: HitTransform,
    pool: HitPool,
    next_track_id: u64,
}

/// Event-local data shared by both passes.
struct Event<'a> {
    view: EventView<'a>,
    n_axial: usize,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let core = BuilderCore::new(
            config.selector.clone(),
            config.fitter.clone(),
            config.stereo.clone(),
            config.salvage_level,
            config.do_stereo,
        );
        let builder = config.builder.instantiate(core);
        let linker = SegmentLinker::new(config.linker.clone());
        Self {
            config,
            builder,
            linker,
            transform: HitTransform::origin(),
            pool: HitPool::default(),
            next_track_id: 0,
        }
    }

    /// Used bits of the last reconstructed event. Hit ids index the axial
    /// list followed by the stereo list.
    pub fn hit_pool(&self) -> &HitPool {
        &self.pool
    }

    /// Find tracks among one event's hits.
    pub fn reconstruct(&mut self, axial: &[WireHit], stereo: &[WireHit]) -> ReconstructionOutput {
        let start = Instant::now();
        let mut hits = axial.to_vec();
        hits.extend_from_slice(stereo);
        self.pool.reset(hits.len());

        let good: Vec<HitId> = hits[..axial.len()]
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_axial() && h.flags.is_good())
            .map(|(i, _)| HitId(i as u32))
            .collect();
        let links = self.transform.transform(&hits, &good);
        let event = Event {
            view: EventView {
                hits: &hits,
                links: &links,
            },
            n_axial: axial.len(),
        };

        let mut out = ReconstructionOutput::default();
        let mut histograms = self.fill_histograms(&event);
        let mut store = self.find_segments(&event, &histograms);
        out.n_segments = store.n_live();
        self.standard_pass(&event, &mut store, &mut out);
        if self.config.relaxed_pass {
            let used = self.used_links(&event);
            for h in &mut histograms {
                h.remove(&used);
            }
            let mut store = self.find_segments(&event, &histograms);
            self.relaxed_pass(&event, &mut store, &mut out);
        }

        out.total_time_us = start.elapsed().as_micros() as u64;
        tracing::info!(
            hits = hits.len(),
            segments = out.n_segments,
            tracks = out.tracks.len(),
            tracks_3d_only = out.tracks_3d_only.len(),
            rejected = out.rejected.len(),
            "event reconstructed"
        );
        out
    }

    // -----------------------------------------------------------------------
    // Segment finding
    // -----------------------------------------------------------------------

    /// One phi histogram of the good links per axial super-layer.
    fn fill_histograms(&self, event: &Event<'_>) -> Vec<Clusterer> {
        let view = &event.view;
        let config = &self.config.clustering;
        self.config
            .axial_super_layers
            .iter()
            .enumerate()
            .map(|(k, &sl)| {
                let members: Vec<usize> = (0..view.links.len())
                    .filter(|&i| view.hit_of(i).super_layer() == sl)
                    .collect();
                let n_bins = config
                    .bins_per_super_layer
                    .get(k)
                    .or(config.bins_per_super_layer.last())
                    .copied()
                    .unwrap_or(64);
                let mut clusterer = Clusterer::with_offset(n_bins, config.bin_offset);
                clusterer.fill(view, &members);
                clusterer
            })
            .collect()
    }

    /// Split and resolve the runs of every histogram into segment lists.
    fn find_segments(&self, event: &Event<'_>, histograms: &[Clusterer]) -> SegmentStore {
        let view = &event.view;
        let config = &self.config.clustering;
        let mut store = SegmentStore::new(histograms.len());
        for (k, clusterer) in histograms.iter().enumerate() {
            for raw in clusterer.clusters(view, config) {
                let pieces = raw.split(view, config);
                let pieces = if pieces.is_empty() { vec![raw] } else { pieces };
                for mut seg in pieces {
                    seg.solve_dual_hits(view, config);
                    store.push(k, seg);
                }
            }
        }
        tracing::debug!(segments = store.n_live(), "segments found");
        store
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    fn standard_pass(&mut self, event: &Event<'_>, store: &mut SegmentStore, out: &mut ReconstructionOutput) {
        let mut retry: Vec<usize> = Vec::new();
        for list in (1..store.n_lists()).rev() {
            while let Some(base) = store.first(list) {
                let chain = self.linker.chain(base, store);
                let result = self.make_track(event, store, &chain).and_then(|cand| {
                    let (cand, absorbed) = self.append_clusters(event, store, &retry, cand);
                    self.complete(event, cand, out).map(|()| absorbed)
                });
                match result {
                    Ok(absorbed) => {
                        for &s in &chain {
                            store.remove(s);
                        }
                        retry.retain(|s| !absorbed.contains(s));
                        self.purge_used(event, store);
                    }
                    Err(reason) => {
                        tracing::debug!(pass = "standard", list, chain = chain.len(), %reason, "chain rejected");
                        out.rejected.push(RejectionRecord {
                            pass: Pass::Standard,
                            list,
                            n_segments: chain.len(),
                            reason,
                        });
                        store.remove(base);
                        retry.push(base);
                    }
                }
            }
        }
    }

    fn relaxed_pass(&mut self, event: &Event<'_>, store: &mut SegmentStore, out: &mut ReconstructionOutput) {
        let config = self.config.clustering.clone();
        for list in (1..store.n_lists()).rev() {
            while let Some(base) = store.first(list) {
                let mut chain = self.linker.chain(base, store);
                for &s in &chain {
                    let dropped = store.get_mut(s).drop_ghost_duals(&event.view, &config);
                    if !dropped.is_empty() {
                        tracing::trace!(segment = s, dropped = dropped.len(), "ghost duals dropped");
                    }
                }
                loop {
                    match self
                        .make_track(event, store, &chain)
                        .and_then(|cand| self.complete(event, cand, out))
                    {
                        Ok(()) => {
                            for &s in &chain {
                                store.remove(s);
                            }
                            self.purge_used(event, store);
                            break;
                        }
                        Err(reason) => {
                            tracing::debug!(pass = "relaxed", list, chain = chain.len(), %reason, "chain rejected");
                            out.rejected.push(RejectionRecord {
                                pass: Pass::Relaxed,
                                list,
                                n_segments: chain.len(),
                                reason,
                            });
                            chain.remove(0);
                            if chain.len() < 2 {
                                break;
                            }
                        }
                    }
                }
                store.remove(base);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Candidate stages
    // -----------------------------------------------------------------------

    /// 2D candidate from the unused links of a chain.
    fn make_track(&self, event: &Event<'_>, store: &SegmentStore, chain: &[usize]) -> Result<Candidate> {
        let view = &event.view;
        let all: Vec<usize> = chain
            .iter()
            .flat_map(|&s| store.get(s).links().iter().copied())
            .collect();
        let offered: Vec<Link> = all
            .iter()
            .map(|&i| view.link(i))
            .filter(|l| !self.pool.is_used(l.hit))
            .cloned()
            .collect();
        let cand = self.builder.build_planar(offered, view.hits)?;
        let fraction = cand.links.len() as f64 / all.len().max(1) as f64;
        if fraction < self.config.fraction {
            return Err(ReconError::LowFraction {
                fraction,
                threshold: self.config.fraction,
            });
        }
        tracing::debug!(links = cand.links.len(), fraction, "2D candidate accepted");
        Ok(cand)
    }

    /// Absorb retry-list segments lying on the new circle. Returns the
    /// candidate (refitted when something was added) and the absorbed ids.
    fn append_clusters(
        &self,
        event: &Event<'_>,
        store: &SegmentStore,
        retry: &[usize],
        cand: Candidate,
    ) -> (Candidate, Vec<usize>) {
        let view = &event.view;
        let core = self.builder.core();
        let center = cand.helix.center();
        let radius = cand.helix.radius();
        let mut trial = cand.clone();
        let mut absorbed = Vec::new();
        for &s in retry {
            let seg = store.get(s);
            let p = seg.xy_position(view);
            if ((p - center).norm() - radius).abs() >= self.config.close_segment_distance
                || !same_side(&trial.helix, &p)
            {
                continue;
            }
            let offered: Vec<Link> = seg
                .links()
                .iter()
                .map(|&i| view.link(i))
                .filter(|l| !self.pool.is_used(l.hit))
                .cloned()
                .collect();
            let relaxed = core.selector.config.max_sigma.sqrt();
            if trial.append_by_approach(offered, view.hits, &core.fitter, relaxed) > 0 {
                absorbed.push(s);
            }
        }
        if absorbed.is_empty() {
            return (cand, absorbed);
        }
        match trial.fit(&core.fitter, view.hits) {
            Ok(()) => {
                tracing::debug!(segments = absorbed.len(), "leftover segments absorbed");
                (trial, absorbed)
            }
            Err(e) => {
                tracing::debug!(error = %e, "refit after absorbing segments failed");
                (cand, Vec::new())
            }
        }
    }

    /// Stereo, salvage, final gate and finalize.
    fn complete(&mut self, event: &Event<'_>, mut cand: Candidate, out: &mut ReconstructionOutput) -> Result<()> {
        let hits = event.view.hits;
        let three_d = self.config.do_stereo;
        if three_d {
            let unused: Vec<HitId> = (event.n_axial..hits.len())
                .map(|i| HitId(i as u32))
                .filter(|&h| !self.pool.is_used(h))
                .collect();
            let side = if self.builder.side_restricted() {
                inner_wire(&cand, hits)
            } else {
                None
            };
            let close = find_close_hits(&cand.helix, hits, &unused, &self.config.stereo, side);
            let stereo = self.transform.transform(hits, &close);
            self.builder.build_stereo(&mut cand, stereo, hits)?;
            tracing::debug!(stereo = cand.n_stereo(hits), "3D candidate accepted");
        }

        if self.config.do_salvage {
            let limit = if three_d { hits.len() } else { event.n_axial };
            let leftovers: Vec<HitId> = (0..limit)
                .map(|i| HitId(i as u32))
                .filter(|&h| !self.pool.is_used(h) && !cand.contains(h))
                .collect();
            let leftovers = self.transform.transform(hits, &leftovers);
            let added = self.builder.salvage(&mut cand, leftovers, hits);
            if added > 0 {
                tracing::debug!(added, "hits salvaged");
            }
        }

        let quality = cand.quality(hits);
        self.builder
            .core()
            .selector
            .check(&quality, Gate::Final, three_d)?;

        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        let mut track = Track::finalize(id, self.builder.kind(), cand, quality);
        self.pool.mark_used(track.hit_ids());
        if self.builder.kind() == BuilderKind::Curl {
            self.link_kink(&mut track, out);
        }
        tracing::debug!(track = %track.id, hits = track.n_hits(), pt = track.pt(), "track finalized");
        if track.quality.n_axial < self.config.selector.min_hits {
            out.tracks_3d_only.push(track);
        } else {
            out.tracks.push(track);
        }
        Ok(())
    }

    /// Relate `track` to an accepted track whose outermost point lies within
    /// `kink_distance` of this track's innermost point.
    fn link_kink(&self, track: &mut Track, out: &mut ReconstructionOutput) {
        let Some(inner) = track
            .links
            .iter()
            .min_by(|a, b| a.on_track.xy().norm().total_cmp(&b.on_track.xy().norm()))
            .map(|l| l.on_track)
        else {
            return;
        };
        let mother = out
            .tracks
            .iter_mut()
            .filter_map(|t| {
                let outer = t
                    .links
                    .iter()
                    .max_by(|a, b| a.on_track.xy().norm().total_cmp(&b.on_track.xy().norm()))?
                    .on_track;
                let d = (outer - inner).xy().norm();
                (d < self.config.kink_distance).then_some((t, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((mother, d)) = mother {
            mother.daughters.push(track.id);
            track.mother = Some(mother.id);
            tracing::debug!(mother = %mother.id, daughter = %track.id, distance = d, "kink linked");
        }
    }

    /// Arena indices of links whose hit is used.
    fn used_links(&self, event: &Event<'_>) -> Vec<usize> {
        (0..event.view.links.len())
            .filter(|&i| self.pool.is_used(event.view.link(i).hit))
            .collect()
    }

    /// Strip links of used hits from every live segment.
    fn purge_used(&self, event: &Event<'_>, store: &mut SegmentStore) {
        let used = self.used_links(event);
        store.purge_links(&used, &event.view, &self.config.clustering);
    }
}

/// xy position of the candidate's innermost axial wire.
fn inner_wire(cand: &Candidate, hits: &[WireHit]) -> Option<Point2> {
    cand.links
        .iter()
        .map(|l| &hits[l.hit.index()])
        .filter(|h| h.is_axial())
        .min_by_key(|h| h.layer())
        .map(|h| h.xy_position())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helix::Helix;
    use crate::test_utils::{helix_hits, HitSelection, DRIFT_ERROR};
    use approx::assert_abs_diff_eq;

    fn split(hits: Vec<WireHit>) -> (Vec<WireHit>, Vec<WireHit>) {
        hits.into_iter().partition(|h| h.is_axial())
    }

    #[test]
    fn single_track_is_found_in_3d() {
        let truth = Helix::from_parameters(0.0, 1.2, 1.0 / 150.0, 2.0, 0.4);
        let (axial, stereo) = split(helix_hits(&truth, HitSelection::All, DRIFT_ERROR));
        let mut p = Pipeline::new(PipelineConfig::default());
        let out = p.reconstruct(&axial, &stereo);
        assert_eq!(out.tracks.len(), 1);
        let t = &out.tracks[0];
        assert_eq!(t.charge, 1.0);
        assert_abs_diff_eq!(t.helix.kappa(), truth.kappa(), epsilon = 1e-4);
        assert_abs_diff_eq!(t.helix.tan_lambda(), 0.4, epsilon = 0.02);
        assert!(t.quality.n_stereo >= 3);
        assert!(t.hit_ids().all(|h| p.hit_pool().is_used(h)));
    }

    #[test]
    fn two_stereo_hits_are_rejected_and_left_unused() {
        let truth = Helix::from_parameters(0.0, -0.7, -1.0 / 180.0, 0.0, 0.2);
        let (axial, stereo) = split(helix_hits(&truth, HitSelection::All, DRIFT_ERROR));
        let stereo: Vec<WireHit> = stereo.into_iter().take(2).collect();
        let mut p = Pipeline::new(PipelineConfig::default());
        let out = p.reconstruct(&axial, &stereo);
        assert!(out.tracks.is_empty());
        assert!(out.rejected.iter().any(|r| matches!(
            r.reason,
            ReconError::InsufficientHits {
                stage: crate::error::Stage::Stereo,
                found: 2,
                required: 3
            }
        )));
        let n = axial.len() as u32;
        assert!(!p.hit_pool().is_used(HitId(n)));
        assert!(!p.hit_pool().is_used(HitId(n + 1)));
        assert_eq!(p.hit_pool().n_unused(), p.hit_pool().len());
    }

    #[test]
    fn planar_mode_finds_two_tracks() {
        let a = Helix::from_parameters(0.0, 0.4, 1.0 / 120.0, 0.0, 0.0);
        let b = Helix::from_parameters(0.0, 3.4, -1.0 / 200.0, 0.0, 0.0);
        let mut axial = helix_hits(&a, HitSelection::Axial, DRIFT_ERROR);
        axial.extend(helix_hits(&b, HitSelection::Axial, DRIFT_ERROR));
        let config = PipelineConfig {
            do_stereo: false,
            ..PipelineConfig::default()
        };
        let mut p = Pipeline::new(config);
        let out = p.reconstruct(&axial, &[]);
        assert_eq!(out.tracks.len(), 2);
        let mut charges: Vec<f64> = out.tracks.iter().map(|t| t.charge).collect();
        charges.sort_by(f64::total_cmp);
        assert_eq!(charges, vec![-1.0, 1.0]);
        assert_eq!(out.tracks[0].id, TrackId(0));
        assert_eq!(out.tracks[1].id, TrackId(1));
    }

    #[test]
    fn exact_axial_hits_fit_with_zero_chi2() {
        let truth = Helix::from_parameters(0.0, -2.0, 1.0 / 250.0, 0.0, 0.0);
        let axial = helix_hits(&truth, HitSelection::Axial, DRIFT_ERROR);
        let config = PipelineConfig {
            do_stereo: false,
            ..PipelineConfig::default()
        };
        let mut p = Pipeline::new(config);
        let out = p.reconstruct(&axial, &[]);
        assert_eq!(out.tracks.len(), 1);
        let t = &out.tracks[0];
        assert_eq!(t.n_hits(), axial.len());
        assert_abs_diff_eq!(t.helix.radius(), 250.0, epsilon = 0.5);
        assert!(t.chi2 / (t.ndf.max(1) as f64) < 1e-3);
    }

    #[test]
    fn dropped_outlier_fails_a_strict_fraction() {
        let truth = Helix::from_parameters(0.0, 0.9, 1.0 / 160.0, 0.0, 0.0);
        let mut axial = helix_hits(&truth, HitSelection::Axial, DRIFT_ERROR);
        let outlier = axial.len() / 2;
        axial[outlier].drift = [axial[outlier].drift[0] + 0.8; 2];
        let planar = PipelineConfig {
            do_stereo: false,
            ..PipelineConfig::default()
        };

        let mut strict = Pipeline::new(PipelineConfig {
            fraction: 1.0,
            ..planar.clone()
        });
        let out = strict.reconstruct(&axial, &[]);
        assert!(out.tracks.is_empty());
        assert!(out.rejected.iter().any(|r| matches!(
            r.reason,
            ReconError::LowFraction { fraction, threshold } if fraction < 1.0 && threshold == 1.0
        )));
        assert_eq!(strict.hit_pool().n_unused(), axial.len());

        let mut p = Pipeline::new(planar);
        let out = p.reconstruct(&axial, &[]);
        assert_eq!(out.tracks.len(), 1);
        assert!(!p.hit_pool().is_used(HitId(outlier as u32)));
    }

    #[test]
    fn axial_hits_lost_in_3d_send_the_track_to_the_3d_only_bucket() {
        let truth = Helix::from_parameters(0.0, 1.2, 1.0 / 150.0, 2.0, 0.4);
        let (mut axial, stereo) = split(helix_hits(&truth, HitSelection::All, DRIFT_ERROR));
        let n_axial = axial.len();
        let outlier = n_axial / 2;
        axial[outlier].drift = [axial[outlier].drift[0] + 0.12; 2];
        let mut config = PipelineConfig::default();
        // 2D keeps the displaced hit, the 3D refit prunes it
        config.fitter.refine_schedule = vec![30.0];
        config.selector.min_hits = n_axial;
        let mut p = Pipeline::new(config);
        let out = p.reconstruct(&axial, &stereo);
        assert!(out.tracks.is_empty());
        assert_eq!(out.tracks_3d_only.len(), 1);
        let t = &out.tracks_3d_only[0];
        assert!(t.quality.n_axial < n_axial);
        assert!(t.quality.n_stereo >= 3);
        assert!(!p.hit_pool().is_used(HitId(outlier as u32)));
        assert_eq!(out.all_tracks().count(), 1);
    }

    fn curl_track(id: u64, points: &[(f64, f64)]) -> Track {
        let links = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let mut l = Link::new(HitId(i as u32), Point2::zeros());
                l.on_track = crate::types::Point3::new(x, y, 0.0);
                l
            })
            .collect();
        let cand = Candidate::seed(Helix::from_parameters(0.0, 0.0, 1.0 / 30.0, 0.0, 0.0), links);
        Track::finalize(TrackId(id), BuilderKind::Curl, cand, Default::default())
    }

    #[test]
    fn curl_continuation_is_related_to_its_mother() {
        let p = Pipeline::new(PipelineConfig {
            builder: BuilderKind::Curl,
            ..PipelineConfig::default()
        });
        let mut out = ReconstructionOutput::default();
        out.tracks.push(curl_track(0, &[(20.0, 0.0), (40.0, 5.0), (60.0, 15.0)]));
        out.tracks.push(curl_track(1, &[(-30.0, 10.0), (-50.0, 20.0)]));

        // Starts 2.2 cm from the outer end of track 0
        let mut daughter = curl_track(2, &[(75.0, 40.0), (61.0, 17.0)]);
        p.link_kink(&mut daughter, &mut out);
        assert_eq!(daughter.mother, Some(TrackId(0)));
        assert_eq!(out.tracks[0].daughters, vec![TrackId(2)]);
        assert!(out.tracks[1].daughters.is_empty());

        let mut unrelated = curl_track(3, &[(0.0, -40.0), (10.0, -70.0)]);
        p.link_kink(&mut unrelated, &mut out);
        assert_eq!(unrelated.mother, None);
        assert_eq!(out.tracks[0].daughters.len(), 1);
    }

    #[test]
    fn empty_event_gives_empty_output() {
        let mut p = Pipeline::new(PipelineConfig::default());
        let out = p.reconstruct(&[], &[]);
        assert!(out.tracks.is_empty());
        assert_eq!(out.n_segments, 0);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = PipelineConfig {
            builder: BuilderKind::Cosmic,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"cosmic\""));
        let back: PipelineConfig = serde_json::from_str("{\"do_stereo\": false}").unwrap();
        assert!(!back.do_stereo);
        assert_eq!(back.fraction, 0.5);
    }
}
