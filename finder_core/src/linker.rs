//! Chains segments from an outer super-layer inward.
//!
//! From the base segment the linker visits each inner list in turn and takes
//! the closest segment that points the same way. A list with no match is a
//! gap; the walk ends after `max_gaps` consecutive gaps.

use crate::segment::{Segment, SegmentStore};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkerConfig {
    /// Minimum dot product of the two segment directions
    pub min_angle: f64,
    /// Maximum conformal distance between the two segments
    pub max_distance: f64,
    /// Segments with fewer links are never linked
    pub min_links: usize,
    /// Consecutive empty super-layers tolerated
    pub max_gaps: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            min_angle: 0.8,
            max_distance: 0.3,
            min_links: 2,
            max_gaps: 2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SegmentLinker {
    pub config: LinkerConfig,
}

impl SegmentLinker {
    pub fn new(config: LinkerConfig) -> Self {
        Self { config }
    }

    /// Best partner of `base` among `candidates`, if any qualifies.
    pub fn find_best_link(
        &self,
        base: &Segment,
        candidates: &[usize],
        store: &SegmentStore,
    ) -> Option<usize> {
        candidates
            .iter()
            .copied()
            .filter_map(|id| {
                let s = store.get(id);
                if s.len() < self.config.min_links {
                    return None;
                }
                if base.direction().dot(&s.direction()) < self.config.min_angle {
                    return None;
                }
                let d = base.distance(s);
                (d < self.config.max_distance).then_some((id, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Outer-to-inner chain starting at `base`. Inner/outer links of the
    /// chained segments are overwritten.
    pub fn chain(&self, base: usize, store: &mut SegmentStore) -> Vec<usize> {
        let mut chain = vec![base];
        let mut current = base;
        let mut gaps = 0;
        for list in (0..store.home(base)).rev() {
            let candidates = store.list(list).to_vec();
            match self.find_best_link(store.get(current), &candidates, store) {
                Some(next) => {
                    store.get_mut(current).inner_links = vec![next];
                    store.get_mut(next).outer_links = vec![current];
                    chain.push(next);
                    current = next;
                    gaps = 0;
                }
                None => {
                    gaps += 1;
                    if gaps > self.config.max_gaps {
                        break;
                    }
                }
            }
        }
        tracing::trace!(base, length = chain.len(), "segment chain");
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::ClusterConfig;
    use crate::test_utils::{helix_hits, links_for, HitSelection, DRIFT_ERROR};
    use crate::helix::Helix;
    use crate::types::EventView;
    use std::collections::BTreeMap;

    /// One segment per axial super-layer from the hits of `helix`.
    fn store_for(helix: &Helix) -> SegmentStore {
        let hits = helix_hits(helix, HitSelection::Axial, DRIFT_ERROR);
        let links = links_for(&hits);
        let view = EventView { hits: &hits, links: &links };
        let mut by_sl: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, h) in hits.iter().enumerate() {
            by_sl.entry(h.super_layer() / 2).or_default().push(i);
        }
        let mut store = SegmentStore::new(6);
        for (k, members) in by_sl {
            store.push(k as usize, Segment::new(members, &view, &ClusterConfig::default()));
        }
        store
    }

    #[test]
    fn chain_follows_one_track_inward() {
        let mut store = store_for(&Helix::from_parameters(0.0, 1.0, 1.0 / 200.0, 0.0, 0.0));
        let base = store.first(5).unwrap();
        let chain = SegmentLinker::default().chain(base, &mut store);
        assert_eq!(chain.len(), 6);
        let homes: Vec<usize> = chain.iter().map(|&s| store.home(s)).collect();
        assert_eq!(homes, vec![5, 4, 3, 2, 1, 0]);
        assert_eq!(store.get(chain[0]).inner_links, vec![chain[1]]);
        assert_eq!(store.get(chain[1]).outer_links, vec![chain[0]]);
    }

    #[test]
    fn walk_stops_after_too_many_gaps() {
        let mut store = store_for(&Helix::from_parameters(0.0, 1.0, 1.0 / 200.0, 0.0, 0.0));
        for list in 1..=3 {
            let id = store.first(list).unwrap();
            store.remove(id);
        }
        let base = store.first(5).unwrap();
        let chain = SegmentLinker::default().chain(base, &mut store);
        // List 4 links, then three gaps end the walk before list 0
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn far_segment_is_not_linked() {
        let store = store_for(&Helix::from_parameters(0.0, 1.0, 1.0 / 200.0, 0.0, 0.0));
        let other = store_for(&Helix::from_parameters(0.0, 2.5, 1.0 / 200.0, 0.0, 0.0));
        let base = store.first(5).unwrap();
        let far = other.get(other.first(4).unwrap()).clone();
        let linker = SegmentLinker::default();
        let mut only_far = SegmentStore::new(6);
        let far_id = only_far.push(4, far);
        assert!(linker
            .find_best_link(store.get(base), &[far_id], &only_far)
            .is_none());
        let near = store.first(4).unwrap();
        assert_eq!(
            linker.find_best_link(store.get(base), &[near], &store),
            Some(near)
        );
    }
}
