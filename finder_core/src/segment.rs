//! Segments: runs of links inside one super-layer, their shape
//! classification, splitting and same-layer dual-hit resolution.
//!
//! # Shape classes
//! The widths of the innermost and outermost layers are compared with a
//! "fat" threshold and the number of layers with a "tall" threshold:
//! - both ends narrow: short line, or long line when tall
//! - only the outer end narrow: A; only the inner end narrow: V
//! - both ends wide: complicated when a layer inside the span is empty,
//!   otherwise X when some layer is gap-free, parallel when none is
//!
//! Splitting recurses: every piece is split again until it no longer
//! splits, and each final piece gets its dual hits solved.

use crate::histogram::ClusterConfig;
use crate::types::{EventView, Point2};
use chamber_model::Wire;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::{PI, TAU};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterType {
    Empty,
    ShortLine,
    LongLine,
    A,
    V,
    X,
    Parallel,
    Complicated,
}

/// Two adjacent hits in one layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DualPair {
    pub layer: u32,
    /// Link arena indices, lower local id first
    pub links: [usize; 2],
    /// |g − d1 − d2| (cm)
    pub mismatch: f64,
    /// Within tolerance: both hits see the same crossing
    pub single_crossing: bool,
}

fn wrap_pi(x: f64) -> f64 {
    (x + PI).rem_euclid(TAU) - PI
}

/// Circular span of same-layer links: `(width, first, last)` where `first`
/// and `last` are the edge links of the span.
pub(crate) fn layer_span(view: &EventView<'_>, links: &[usize]) -> Option<(u32, usize, usize)> {
    let first = *links.first()?;
    let n = view.hit_of(first).wire.n_in_layer.max(1);
    let mut sorted = links.to_vec();
    sorted.sort_by_key(|&l| view.hit_of(l).wire.local_id);
    let m = sorted.len();
    let id = |k: usize| view.hit_of(sorted[k]).wire.local_id;

    let (mut best_gap, mut best_k) = (0, 0);
    for k in 0..m {
        let gap = if k + 1 < m {
            id(k + 1) - id(k)
        } else {
            id(0) + n - id(m - 1)
        };
        if gap > best_gap {
            best_gap = gap;
            best_k = k;
        }
    }
    let width = n + 1 - best_gap.min(n);
    Some((width, sorted[(best_k + 1) % m], sorted[best_k]))
}

fn mean_xy(view: &EventView<'_>, links: &[usize]) -> Point2 {
    if links.is_empty() {
        return Point2::zeros();
    }
    links
        .iter()
        .map(|&l| view.hit_of(l).xy_position())
        .sum::<Point2>()
        / links.len() as f64
}

/// Perpendicular distance of `p` from the line through `origin` along `dir`.
fn line_distance(origin: &Point2, dir: &Point2, p: &Point2) -> f64 {
    let n = dir.norm();
    if n <= f64::EPSILON {
        return (p - origin).norm();
    }
    dir.perp(&(p - origin)).abs() / n
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Segment {
    /// Link arena indices sorted by (layer, local id)
    links: Vec<usize>,
    super_layer: u32,
    inner_most_layer: u32,
    outer_most_layer: u32,
    n_layers: u32,
    inners: Vec<usize>,
    outers: Vec<usize>,
    inner_width: u32,
    outer_width: u32,
    /// Mean conformal (phi, log r)
    position: Point2,
    /// Unit vector along the segment in the conformal plane, pointing inward
    direction: Point2,
    cluster_type: ClusterType,
    duality: f64,
    n_dual: u32,
    angle: f64,
    dual_pairs: Vec<DualPair>,
    /// Segments linked in the next inner super-layer (store ids)
    pub inner_links: Vec<usize>,
    /// Segments linked in the next outer super-layer (store ids)
    pub outer_links: Vec<usize>,
}

impl Segment {
    pub fn new(links: Vec<usize>, view: &EventView<'_>, config: &ClusterConfig) -> Self {
        let mut s = Self {
            links,
            super_layer: 0,
            inner_most_layer: 0,
            outer_most_layer: 0,
            n_layers: 0,
            inners: Vec::new(),
            outers: Vec::new(),
            inner_width: 0,
            outer_width: 0,
            position: Point2::zeros(),
            direction: Point2::zeros(),
            cluster_type: ClusterType::Empty,
            duality: 0.0,
            n_dual: 0,
            angle: 0.0,
            dual_pairs: Vec::new(),
            inner_links: Vec::new(),
            outer_links: Vec::new(),
        };
        s.update(view, config);
        s
    }

    pub fn links(&self) -> &[usize] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn super_layer(&self) -> u32 {
        self.super_layer
    }

    pub fn inner_most_layer(&self) -> u32 {
        self.inner_most_layer
    }

    pub fn outer_most_layer(&self) -> u32 {
        self.outer_most_layer
    }

    pub fn n_layers(&self) -> u32 {
        self.n_layers
    }

    pub fn inner_width(&self) -> u32 {
        self.inner_width
    }

    pub fn outer_width(&self) -> u32 {
        self.outer_width
    }

    pub fn position(&self) -> Point2 {
        self.position
    }

    pub fn direction(&self) -> Point2 {
        self.direction
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn duality(&self) -> f64 {
        self.duality
    }

    pub fn n_dual(&self) -> u32 {
        self.n_dual
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn dual_pairs(&self) -> &[DualPair] {
        &self.dual_pairs
    }

    /// Links grouped by layer, inner layers first.
    pub fn layer_groups(&self, view: &EventView<'_>) -> BTreeMap<u32, Vec<usize>> {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for &l in &self.links {
            groups.entry(view.hit_of(l).layer()).or_default().push(l);
        }
        groups
    }

    /// Mean wire position in the xy plane.
    pub fn xy_position(&self, view: &EventView<'_>) -> Point2 {
        mean_xy(view, &self.links)
    }

    /// Distance between two segments in the conformal plane, measured
    /// perpendicular to this segment's direction (phi difference wrapped).
    pub fn distance(&self, other: &Segment) -> f64 {
        let mut d = other.position - self.position;
        d.x = wrap_pi(d.x);
        let along = self.direction.dot(&d);
        (d.norm_squared() - along * along).max(0.0).sqrt()
    }

    /// Drop the given links and refresh every derived attribute.
    pub fn remove_links(&mut self, removed: &[usize], view: &EventView<'_>, config: &ClusterConfig) {
        let before = self.links.len();
        self.links.retain(|l| !removed.contains(l));
        if self.links.len() != before {
            self.update(view, config);
        }
    }

    // -----------------------------------------------------------------------
    // Derived attributes
    // -----------------------------------------------------------------------

    fn update(&mut self, view: &EventView<'_>, config: &ClusterConfig) {
        self.links.sort_by_key(|&l| {
            let w = &view.hit_of(l).wire;
            (w.layer, w.local_id)
        });
        self.links.dedup();
        self.dual_pairs.clear();
        let Some(&first) = self.links.first() else {
            self.cluster_type = ClusterType::Empty;
            self.inners.clear();
            self.outers.clear();
            self.n_layers = 0;
            return;
        };

        let groups = self.layer_groups(view);
        self.super_layer = view.hit_of(first).super_layer();
        self.inner_most_layer = groups.keys().next().copied().unwrap_or(0);
        self.outer_most_layer = groups.keys().next_back().copied().unwrap_or(0);
        self.n_layers = groups.len() as u32;
        self.inners = groups.get(&self.inner_most_layer).cloned().unwrap_or_default();
        self.outers = groups.get(&self.outer_most_layer).cloned().unwrap_or_default();
        self.inner_width = layer_span(view, &self.inners).map_or(0, |s| s.0);
        self.outer_width = layer_span(view, &self.outers).map_or(0, |s| s.0);

        // Unwrap phi around the first link so that means never straddle the seam
        let anchor = view.link(first).conformal.x;
        let mean = |idx: &[usize]| -> Point2 {
            let sum: Point2 = idx
                .iter()
                .map(|&l| {
                    let c = view.link(l).conformal;
                    Point2::new(anchor + wrap_pi(c.x - anchor), c.y)
                })
                .sum();
            sum / idx.len().max(1) as f64
        };
        let position = mean(&self.links);
        self.position = Point2::new(position.x.rem_euclid(TAU), position.y);

        // Least-squares phi(log r) over all links; (slope, 1) points inward
        let (mut sxy, mut syy) = (0.0, 0.0);
        for &l in &self.links {
            let c = view.link(l).conformal;
            let dphi = anchor + wrap_pi(c.x - anchor) - position.x;
            let dlog = c.y - position.y;
            sxy += dphi * dlog;
            syy += dlog * dlog;
        }
        self.direction = if syy > f64::EPSILON {
            Point2::new(sxy / syy, 1.0).normalize()
        } else {
            Point2::zeros()
        };

        self.cluster_type = self.classify(&groups, view, config);
        self.update_duality(&groups, view);
    }

    fn classify(
        &self,
        groups: &BTreeMap<u32, Vec<usize>>,
        view: &EventView<'_>,
        config: &ClusterConfig,
    ) -> ClusterType {
        let fat = config.fat;
        match (self.inner_width < fat, self.outer_width < fat) {
            (true, true) if self.n_layers > config.tall => ClusterType::LongLine,
            (true, true) => ClusterType::ShortLine,
            (false, true) => ClusterType::A,
            (true, false) => ClusterType::V,
            (false, false) => {
                let span = self.outer_most_layer - self.inner_most_layer + 1;
                if self.n_layers < span {
                    return ClusterType::Complicated;
                }
                let gap_free = groups.values().any(|g| {
                    layer_span(view, g).is_some_and(|(w, _, _)| w as usize == g.len())
                });
                if gap_free {
                    ClusterType::X
                } else {
                    ClusterType::Parallel
                }
            }
        }
    }

    fn update_duality(&mut self, groups: &BTreeMap<u32, Vec<usize>>, view: &EventView<'_>) {
        let mut sum = 0.0;
        let mut n_dual = 0;
        for g in groups.values() {
            if let Some(m) = Self::pair_mismatch(view, g) {
                sum += m;
                n_dual += 1;
            }
        }
        self.n_dual = n_dual;
        self.duality = if n_dual > 0 { sum / n_dual as f64 } else { 0.0 };

        let x0 = mean_xy(view, &self.inners);
        let x1 = mean_xy(view, &self.outers);
        let d = x1 - x0;
        self.angle = if d.norm() > f64::EPSILON && x0.norm() > f64::EPSILON {
            d.normalize().dot(&x0.normalize())
        } else {
            0.0
        };
    }

    /// |g − d1 − d2| for a layer holding exactly two adjacent hits.
    fn pair_mismatch(view: &EventView<'_>, group: &[usize]) -> Option<f64> {
        if group.len() != 2 || layer_span(view, group)?.0 != 2 {
            return None;
        }
        let (h0, h1) = (view.hit_of(group[0]), view.hit_of(group[1]));
        let g = (h0.xy_position() - h1.xy_position()).norm();
        let d0 = h0.drift_for(Default::default());
        let d1 = h1.drift_for(Default::default());
        Some((g - d0 - d1).abs())
    }

    // -----------------------------------------------------------------------
    // Dual hits
    // -----------------------------------------------------------------------

    /// Classify every two-hit layer as one crossing or two independent hits
    /// and refresh the caches. No link is removed.
    pub fn solve_dual_hits(&mut self, view: &EventView<'_>, config: &ClusterConfig) -> &[DualPair] {
        self.update(view, config);
        let pairs: Vec<DualPair> = self
            .layer_groups(view)
            .into_iter()
            .filter_map(|(layer, g)| {
                let mismatch = Self::pair_mismatch(view, &g)?;
                Some(DualPair {
                    layer,
                    links: [g[0], g[1]],
                    mismatch,
                    single_crossing: mismatch <= config.dual_tolerance,
                })
            })
            .collect();
        self.dual_pairs = pairs;
        &self.dual_pairs
    }

    /// For every independent pair keep the hit closer to the line through
    /// the segment's innermost and outermost single-hit layers. Returns the
    /// dropped links; nothing is dropped without two single-hit layers.
    pub fn drop_ghost_duals(&mut self, view: &EventView<'_>, config: &ClusterConfig) -> Vec<usize> {
        let independent: Vec<DualPair> = self
            .solve_dual_hits(view, config)
            .iter()
            .filter(|p| !p.single_crossing)
            .cloned()
            .collect();
        if independent.is_empty() {
            return Vec::new();
        }
        let singles: Vec<usize> = self
            .layer_groups(view)
            .into_values()
            .filter(|g| g.len() == 1)
            .map(|g| g[0])
            .collect();
        let (Some(&a), Some(&b)) = (singles.first(), singles.last()) else {
            return Vec::new();
        };
        if a == b {
            return Vec::new();
        }
        let origin = view.hit_of(a).xy_position();
        let dir = view.hit_of(b).xy_position() - origin;

        let dropped: Vec<usize> = independent
            .iter()
            .map(|p| {
                let d0 = line_distance(&origin, &dir, &view.hit_of(p.links[0]).xy_position());
                let d1 = line_distance(&origin, &dir, &view.hit_of(p.links[1]).xy_position());
                if d0 <= d1 {
                    p.links[1]
                } else {
                    p.links[0]
                }
            })
            .collect();
        tracing::trace!(
            super_layer = self.super_layer,
            dropped = dropped.len(),
            "dropped ghost dual hits"
        );
        self.remove_links(&dropped, view, config);
        self.solve_dual_hits(view, config);
        dropped
    }

    // -----------------------------------------------------------------------
    // Splitting
    // -----------------------------------------------------------------------

    /// Split an ambiguous segment. An empty result means "does not split".
    pub fn split(&self, view: &EventView<'_>, config: &ClusterConfig) -> Vec<Segment> {
        let groups = match self.cluster_type {
            ClusterType::Empty | ClusterType::ShortLine => Vec::new(),
            ClusterType::LongLine => {
                if self.n_dual > config.dual_split_min_pairs
                    && self.duality > config.dual_split_duality
                    && self.angle > config.dual_split_angle
                {
                    self.split_dual(view)
                } else {
                    Vec::new()
                }
            }
            ClusterType::A | ClusterType::V => self.split_av(view),
            ClusterType::Parallel => self.split_parallel(view),
            ClusterType::X | ClusterType::Complicated => self.split_complicated(view),
        };

        let n = self.links.len();
        let groups: Vec<Vec<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
        if groups.is_empty() || (groups.len() == 1 && groups[0].len() >= n) {
            return Vec::new();
        }

        let mut out = Vec::new();
        for g in groups {
            let mut piece = Segment::new(g, view, config);
            let sub = if piece.len() < n {
                piece.split(view, config)
            } else {
                Vec::new()
            };
            if sub.is_empty() {
                piece.solve_dual_hits(view, config);
                out.push(piece);
            } else {
                out.extend(sub);
            }
        }
        tracing::trace!(
            super_layer = self.super_layer,
            kind = ?self.cluster_type,
            n_links = n,
            pieces = out.len(),
            "split segment"
        );
        out
    }

    fn wire<'a>(view: &EventView<'a>, l: usize) -> &'a Wire {
        &view.hit_of(l).wire
    }

    /// Seed two lines from the narrow end's centroid through the two edge
    /// hits of the wide end; every other hit joins the closer line.
    fn split_av(&self, view: &EventView<'_>) -> Vec<Vec<usize>> {
        let (narrow, wide) = if self.cluster_type == ClusterType::A {
            (&self.outers, &self.inners)
        } else {
            (&self.inners, &self.outers)
        };
        let Some((_, e0, e1)) = layer_span(view, wide) else {
            return Vec::new();
        };
        if e0 == e1 {
            return Vec::new();
        }
        let corner = mean_xy(view, narrow);
        let dirs = [
            view.hit_of(e0).xy_position() - corner,
            view.hit_of(e1).xy_position() - corner,
        ];

        let mut seeds = [narrow.clone(), narrow.clone()];
        seeds[0].push(e0);
        seeds[1].push(e1);
        for &l in &self.links {
            if l == e0 || l == e1 || narrow.contains(&l) {
                continue;
            }
            let p = view.hit_of(l).xy_position();
            let d0 = line_distance(&corner, &dirs[0], &p);
            let d1 = line_distance(&corner, &dirs[1], &p);
            seeds[if d0 < d1 { 0 } else { 1 }].push(l);
        }
        seeds.into()
    }

    /// Pair the two edge hits of every layer; other hits join the closer edge.
    fn split_parallel(&self, view: &EventView<'_>) -> Vec<Vec<usize>> {
        let mut seeds: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        let mut last_edges: Option<(usize, usize)> = None;
        let closer = |l: usize, a: usize, b: usize| -> usize {
            let w = Self::wire(view, l);
            let da = w.local_id_difference(Self::wire(view, a)).abs();
            let db = w.local_id_difference(Self::wire(view, b)).abs();
            if da <= db {
                0
            } else {
                1
            }
        };

        for group in self.layer_groups(view).into_values() {
            let Some((_, e0, e1)) = layer_span(view, &group) else {
                continue;
            };
            if e0 == e1 {
                let side = last_edges.map_or(0, |(a, b)| closer(e0, a, b));
                seeds[side].push(e0);
                continue;
            }
            seeds[0].push(e0);
            seeds[1].push(e1);
            for &l in &group {
                if l != e0 && l != e1 {
                    seeds[closer(l, e0, e1)].push(l);
                }
            }
            last_edges = Some((e0, e1));
        }
        if seeds.iter().any(Vec::is_empty) {
            return Vec::new();
        }
        seeds.into()
    }

    /// Greedily group hits within one cell of a core hit, last wire first,
    /// repeating on the remainder. Leftovers form their own piece.
    fn split_complicated(&self, view: &EventView<'_>) -> Vec<Vec<usize>> {
        let mut good: Vec<usize> = self
            .links
            .iter()
            .copied()
            .filter(|&l| view.hit_of(l).flags.is_core())
            .collect();
        good.sort_by_key(|&l| Self::wire(view, l).id);

        let mut remaining = self.links.clone();
        let mut out = Vec::new();
        while let Some(seed) = good.pop() {
            if !remaining.contains(&seed) {
                continue;
            }
            let seed_wire = Self::wire(view, seed);
            let used: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&l| seed_wire.local_id_difference(Self::wire(view, l)).abs() < 2)
                .collect();
            if used.len() == self.links.len() {
                return Vec::new();
            }
            remaining.retain(|l| !used.contains(l));
            good.retain(|l| !used.contains(l));
            out.push(used);
        }
        if !out.is_empty() && !remaining.is_empty() {
            out.push(remaining);
        }
        out
    }

    /// Two tracks crossing side by side: each two-hit layer feeds one hit
    /// to each seed, other hits join the closer seed line.
    fn split_dual(&self, view: &EventView<'_>) -> Vec<Vec<usize>> {
        let mut seeds: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        let mut unknown = Vec::new();
        for group in self.layer_groups(view).into_values() {
            if Self::pair_mismatch(view, &group).is_some() {
                let (a, b) = (group[0], group[1]);
                let (first, second) =
                    if Self::wire(view, a).local_id_difference(Self::wire(view, b)) >= 0 {
                        (a, b)
                    } else {
                        (b, a)
                    };
                seeds[0].push(first);
                seeds[1].push(second);
            } else {
                unknown.extend(group);
            }
        }
        if seeds[0].is_empty() {
            return Vec::new();
        }

        if !unknown.is_empty() {
            let line = |s: &[usize]| {
                let p0 = view.hit_of(s[0]).xy_position();
                let p1 = view.hit_of(s[s.len() - 1]).xy_position();
                (p0, p1 - p0)
            };
            let (p0, v0) = line(&seeds[0]);
            let (p1, v1) = line(&seeds[1]);
            for l in unknown {
                let x = view.hit_of(l).xy_position();
                let d0 = line_distance(&p0, &v0, &x);
                let d1 = line_distance(&p1, &v1, &x);
                seeds[if d0 < d1 { 0 } else { 1 }].push(l);
            }
        }
        seeds.into()
    }
}

// ---------------------------------------------------------------------------
// Segment store
// ---------------------------------------------------------------------------

/// Arena of the segments of one pass, with one live list per axial
/// super-layer. Removing a segment only unlists it; ids stay valid.
#[derive(Clone, Debug, Default)]
pub struct SegmentStore {
    segments: Vec<Segment>,
    home: Vec<usize>,
    lists: Vec<Vec<usize>>,
}

impl SegmentStore {
    pub fn new(n_lists: usize) -> Self {
        Self {
            segments: Vec::new(),
            home: Vec::new(),
            lists: vec![Vec::new(); n_lists],
        }
    }

    pub fn n_lists(&self) -> usize {
        self.lists.len()
    }

    /// Store a segment in list `list`; returns its id.
    pub fn push(&mut self, list: usize, segment: Segment) -> usize {
        let id = self.segments.len();
        self.segments.push(segment);
        self.home.push(list);
        if let Some(l) = self.lists.get_mut(list) {
            l.push(id);
        }
        id
    }

    pub fn get(&self, id: usize) -> &Segment {
        &self.segments[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut Segment {
        &mut self.segments[id]
    }

    /// Live segment ids of one list.
    pub fn list(&self, list: usize) -> &[usize] {
        self.lists.get(list).map_or(&[], Vec::as_slice)
    }

    pub fn first(&self, list: usize) -> Option<usize> {
        self.list(list).first().copied()
    }

    pub fn home(&self, id: usize) -> usize {
        self.home[id]
    }

    pub fn is_live(&self, id: usize) -> bool {
        self.lists
            .get(self.home[id])
            .is_some_and(|l| l.contains(&id))
    }

    pub fn n_live(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub fn remove(&mut self, id: usize) {
        if let Some(l) = self.lists.get_mut(self.home[id]) {
            l.retain(|&s| s != id);
        }
    }

    /// Remove consumed links from every live segment; emptied segments are
    /// unlisted.
    pub fn purge_links(&mut self, used: &[usize], view: &EventView<'_>, config: &ClusterConfig) {
        if used.is_empty() {
            return;
        }
        for list in 0..self.lists.len() {
            let ids = self.lists[list].clone();
            for id in ids {
                let seg = &mut self.segments[id];
                if seg.links.iter().any(|l| used.contains(l)) {
                    seg.remove_links(used, view, config);
                    if seg.is_empty() {
                        self.lists[list].retain(|&s| s != id);
                    }
                }
            }
        }
    }
}
