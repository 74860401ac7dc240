//! Candidates under construction and finalized tracks.

use crate::error::Result;
use crate::fitter::{refine, FitOutcome, HelixFitter};
use crate::helix::Helix;
use crate::selector::TrackQuality;
use crate::types::{HelixCov, HitId, Link, Point3, TrackId, WireHit};
use serde::{Deserialize, Serialize};

/// Track topology a builder is specialised for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    /// Tracks from the interaction point
    #[default]
    Normal,
    /// Through-going tracks with no vertex constraint
    Cosmic,
    /// Low-pt tracks that loop inside the chamber
    Curl,
}

/// Last state a candidate reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Seed,
    Planar,
    Stereo,
    Salvaged,
}

/// Transient fit state for one candidate. Dropping it releases every link it
/// holds; nothing outside the candidate refers to them.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub helix: Helix,
    pub covariance: HelixCov,
    pub links: Vec<Link>,
    pub chi2: f64,
    pub ndf: usize,
    pub state: CandidateState,
}

impl Candidate {
    pub fn seed(helix: Helix, links: Vec<Link>) -> Self {
        Self {
            helix,
            covariance: HelixCov::zeros(),
            links,
            chi2: 0.0,
            ndf: 0,
            state: CandidateState::Seed,
        }
    }

    pub fn apply(&mut self, fit: FitOutcome) {
        self.helix = fit.helix;
        self.covariance = fit.covariance;
        self.chi2 = fit.chi2;
        self.ndf = fit.ndf;
    }

    /// Refit the current links starting from the current helix.
    pub fn fit(&mut self, fitter: &HelixFitter, hits: &[WireHit]) -> Result<()> {
        let out = fitter.fit(&self.helix, &mut self.links, hits)?;
        self.apply(out);
        Ok(())
    }

    /// Drop links with pull above `max_pull`.
    pub fn refine(&mut self, max_pull: f64) -> Vec<Link> {
        refine(&mut self.links, max_pull)
    }

    /// Fit, then for each threshold drop the outliers and refit.
    pub fn fit_with_schedule(
        &mut self,
        fitter: &HelixFitter,
        hits: &[WireHit],
        schedule: &[f64],
    ) -> Result<Vec<Link>> {
        self.fit(fitter, hits)?;
        let mut removed = Vec::new();
        for &th in schedule {
            let bad = self.refine(th);
            if !bad.is_empty() {
                removed.extend(bad);
                self.fit(fitter, hits)?;
            }
        }
        Ok(removed)
    }

    /// Add every link whose pull against the current helix is below
    /// `max_pull`. Returns how many were added.
    pub fn append_by_approach(
        &mut self,
        candidates: Vec<Link>,
        hits: &[WireHit],
        fitter: &HelixFitter,
        max_pull: f64,
    ) -> usize {
        let mut added = 0;
        for mut link in candidates {
            if self.contains(link.hit) {
                continue;
            }
            let ok = fitter
                .update_links(&self.helix, std::slice::from_mut(&mut link), hits)
                .is_ok();
            if ok && link.pull < max_pull {
                self.links.push(link);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, hit: HitId) -> bool {
        self.links.iter().any(|l| l.hit == hit)
    }

    pub fn hit_ids(&self) -> Vec<HitId> {
        self.links.iter().map(|l| l.hit).collect()
    }

    pub fn n_stereo(&self, hits: &[WireHit]) -> usize {
        self.links
            .iter()
            .filter(|l| !hits[l.hit.index()].is_axial())
            .count()
    }

    pub fn quality(&self, hits: &[WireHit]) -> TrackQuality {
        TrackQuality::measure(&self.helix, &self.links, hits, self.chi2, self.ndf)
    }
}

/// An accepted track. Only built by finalizing a candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub kind: BuilderKind,
    pub helix: Helix,
    pub covariance: HelixCov,
    pub chi2: f64,
    pub ndf: usize,
    /// +1 / −1
    pub charge: f64,
    pub links: Vec<Link>,
    pub quality: TrackQuality,
    /// Track this one continues after a kink
    pub mother: Option<TrackId>,
    pub daughters: Vec<TrackId>,
}

impl Track {
    pub(crate) fn finalize(
        id: TrackId,
        kind: BuilderKind,
        candidate: Candidate,
        quality: TrackQuality,
    ) -> Self {
        let mut links = candidate.links;
        links.sort_by_key(|l| l.hit);
        Self {
            id,
            kind,
            charge: candidate.helix.charge(),
            helix: candidate.helix,
            covariance: candidate.covariance,
            chi2: candidate.chi2,
            ndf: candidate.ndf,
            links,
            quality,
            mother: None,
            daughters: Vec::new(),
        }
    }

    pub fn pt(&self) -> f64 {
        self.helix.pt()
    }

    pub fn momentum(&self) -> f64 {
        self.helix.momentum()
    }

    /// Point on the fitted helix at turning angle `dphi` from the pivot.
    pub fn position_at(&self, dphi: f64) -> Point3 {
        self.helix.position(dphi)
    }

    pub fn hit_ids(&self) -> impl Iterator<Item = HitId> + '_ {
        self.links.iter().map(|l| l.hit)
    }

    pub fn n_hits(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{helix_hits, links_for, HitSelection, DRIFT_ERROR};
    use approx::assert_abs_diff_eq;

    #[test]
    fn append_by_approach_skips_far_and_duplicate_hits() {
        let truth = Helix::from_parameters(0.0, 2.0, -1.0 / 90.0, 0.0, 0.0);
        let mut hits = helix_hits(&truth, HitSelection::Axial, DRIFT_ERROR);
        let n = hits.len();
        hits[n - 1].drift = [hits[n - 1].drift[0] + 0.5; 2];
        let links = links_for(&hits);
        let fitter = HelixFitter::default();
        let mut cand = Candidate::seed(truth.clone(), links[..n / 2].to_vec());
        let added = cand.append_by_approach(links.clone(), &hits, &fitter, 3.0);
        assert_eq!(added, n - n / 2 - 1);
        assert!(!cand.contains(HitId(n as u32 - 1)));
    }

    #[test]
    fn finalize_keeps_fit_and_sorts_links() {
        let truth = Helix::from_parameters(0.0, 2.0, -1.0 / 90.0, 0.0, 0.0);
        let hits = helix_hits(&truth, HitSelection::Axial, DRIFT_ERROR);
        let mut links = links_for(&hits);
        links.reverse();
        let mut cand = Candidate::seed(truth, links);
        cand.fit(&HelixFitter::default(), &hits).unwrap();
        let q = cand.quality(&hits);
        let track = Track::finalize(TrackId(7), BuilderKind::Normal, cand, q);
        assert_eq!(track.charge, -1.0);
        assert_eq!(track.links[0].hit, HitId(0));
        assert_abs_diff_eq!(track.pt(), 90.0 / crate::helix::ALPHA, epsilon = 1e-4);
        assert_eq!(track.quality.n_stereo, 0);
    }
}
