//! Fundamental types used across the finder: hits, links, the hit pool.

use chamber_model::{Wire, WireGeometry, WireId};
use nalgebra::{Matrix5, Vector2, Vector3, Vector5};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar aliases: f64 throughout, lengths in cm.
// ---------------------------------------------------------------------------

pub type Point2 = Vector2<f64>;
pub type Point3 = Vector3<f64>;

/// Helix parameters [dr, phi0, kappa, dz, tan_lambda]
pub type HelixVec = Vector5<f64>;

/// 5×5 helix parameter covariance
pub type HelixCov = Matrix5<f64>;

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

/// Index of a hit in the event hit list (axial hits first, then stereo).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct HitId(pub u32);

impl HitId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Left/right ambiguity
// ---------------------------------------------------------------------------

/// Side of the wire the track is assumed to pass on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeftRight {
    Left,
    Right,
    /// No decision yet: the mean of both drift hypotheses is used
    #[default]
    Unresolved,
}

impl LeftRight {
    /// Side from the xy positions of the wire and the track point.
    pub fn from_geometry(on_wire: &Point3, on_track: &Point3) -> Self {
        let cross = on_wire.x * on_track.y - on_wire.y * on_track.x;
        if cross < 0.0 {
            LeftRight::Left
        } else {
            LeftRight::Right
        }
    }
}

// ---------------------------------------------------------------------------
// Hits
// ---------------------------------------------------------------------------

/// Quality flags filled in by the upstream hit stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitFlags {
    /// No competing hits in the neighbouring cells
    pub isolated: bool,
    /// Hits in the neighbouring layers continue the pattern
    pub continuous: bool,
    /// A local pattern points to the left of the wire
    pub pattern_left: bool,
    /// A local pattern points to the right of the wire
    pub pattern_right: bool,
    /// Drift information is usable for fitting
    pub fitting_valid: bool,
}

impl Default for HitFlags {
    fn default() -> Self {
        Self {
            isolated: true,
            continuous: true,
            pattern_left: false,
            pattern_right: false,
            fitting_valid: true,
        }
    }
}

impl HitFlags {
    /// Usable as a segment-finding seed.
    pub fn is_good(&self) -> bool {
        self.isolated && self.continuous
    }

    pub fn has_pattern(&self) -> bool {
        self.pattern_left || self.pattern_right
    }

    /// Core hits drive the 2D fit before non-core hits are absorbed.
    pub fn is_core(&self) -> bool {
        self.is_good() && self.has_pattern()
    }
}

/// A hit wire with its drift measurement. Immutable for the whole event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireHit {
    pub wire: Wire,
    /// Drift distance for the [left, right] hypothesis (cm)
    pub drift: [f64; 2],
    /// Drift distance uncertainty for the [left, right] hypothesis (cm)
    pub drift_error: [f64; 2],
    pub flags: HitFlags,
}

impl WireHit {
    /// Build a hit on a known wire. Returns `None` for an unknown wire id.
    pub fn new(
        geometry: &dyn WireGeometry,
        wire_id: WireId,
        drift: f64,
        drift_error: f64,
    ) -> Option<Self> {
        let wire = geometry.wire(wire_id)?.clone();
        Some(Self {
            wire,
            drift: [drift, drift],
            drift_error: [drift_error, drift_error],
            flags: HitFlags::default(),
        })
    }

    pub fn with_flags(mut self, flags: HitFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_axial(&self) -> bool {
        self.wire.is_axial()
    }

    pub fn layer(&self) -> u32 {
        self.wire.layer
    }

    pub fn super_layer(&self) -> u32 {
        self.wire.super_layer
    }

    pub fn xy_position(&self) -> Point2 {
        self.wire.xy_position()
    }

    pub fn drift_for(&self, lr: LeftRight) -> f64 {
        match lr {
            LeftRight::Left => self.drift[0],
            LeftRight::Right => self.drift[1],
            LeftRight::Unresolved => 0.5 * (self.drift[0] + self.drift[1]),
        }
    }

    pub fn drift_error_for(&self, lr: LeftRight) -> f64 {
        match lr {
            LeftRight::Left => self.drift_error[0],
            LeftRight::Right => self.drift_error[1],
            LeftRight::Unresolved => 0.5 * (self.drift_error[0] + self.drift_error[1]),
        }
    }
}

// ---------------------------------------------------------------------------
// Hit pool
// ---------------------------------------------------------------------------

/// Event-local "used" bits. A hit is marked used only when a track is
/// finalized.
#[derive(Clone, Debug, Default)]
pub struct HitPool {
    used: Vec<bool>,
}

impl HitPool {
    pub fn new(n_hits: usize) -> Self {
        Self {
            used: vec![false; n_hits],
        }
    }

    pub fn reset(&mut self, n_hits: usize) {
        self.used.clear();
        self.used.resize(n_hits, false);
    }

    pub fn is_used(&self, hit: HitId) -> bool {
        self.used.get(hit.index()).copied().unwrap_or(false)
    }

    pub fn mark_used(&mut self, hits: impl IntoIterator<Item = HitId>) {
        for h in hits {
            if let Some(u) = self.used.get_mut(h.index()) {
                *u = true;
            }
        }
    }

    pub fn n_unused(&self) -> usize {
        self.used.iter().filter(|u| !**u).count()
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One hit bound to one trial assignment. Owned by whichever collection
/// holds it: the event link arena, a candidate, or a finished track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub hit: HitId,
    /// (phi, log r) in the conformal plane
    pub conformal: Point2,
    pub left_right: LeftRight,
    /// Closest-approach point on the track
    pub on_track: Point3,
    /// Closest-approach point on the wire
    pub on_wire: Point3,
    /// Turning angle of `on_track` from the helix pivot
    pub dphi: f64,
    /// |residual| / sigma from the last approach
    pub pull: f64,
    /// (arc length, z) assigned during the stereo search
    pub arc_z: Point2,
}

impl Link {
    pub fn new(hit: HitId, conformal: Point2) -> Self {
        Self {
            hit,
            conformal,
            left_right: LeftRight::Unresolved,
            on_track: Point3::zeros(),
            on_wire: Point3::zeros(),
            dphi: 0.0,
            pull: 0.0,
            arc_z: Point2::zeros(),
        }
    }
}

/// Read-only view of one event: the hit list and the conformal link arena.
#[derive(Clone, Copy, Debug)]
pub struct EventView<'a> {
    pub hits: &'a [WireHit],
    pub links: &'a [Link],
}

impl<'a> EventView<'a> {
    pub fn link(&self, idx: usize) -> &'a Link {
        &self.links[idx]
    }

    /// Hit behind the link at arena index `idx`.
    pub fn hit_of(&self, idx: usize) -> &'a WireHit {
        &self.hits[self.links[idx].hit.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chamber_model::ChamberLayout;

    #[test]
    fn hit_copies_wire_from_geometry() {
        let chamber = ChamberLayout::default().build();
        let hit = WireHit::new(&chamber, WireId(70), 0.3, 0.01).unwrap();
        assert_eq!(hit.wire.id, WireId(70));
        assert_eq!(hit.layer(), 1);
        assert!(hit.is_axial());
        assert_eq!(hit.drift_for(LeftRight::Unresolved), 0.3);
        assert!(WireHit::new(&chamber, WireId(1_000_000), 0.3, 0.01).is_none());
    }

    #[test]
    fn pool_marks_and_counts() {
        let mut pool = HitPool::new(4);
        pool.mark_used([HitId(1), HitId(3), HitId(99)]);
        assert!(pool.is_used(HitId(1)));
        assert!(!pool.is_used(HitId(2)));
        assert_eq!(pool.n_unused(), 2);
        pool.reset(4);
        assert_eq!(pool.n_unused(), 4);
    }

    #[test]
    fn core_requires_pattern() {
        let mut flags = HitFlags::default();
        assert!(flags.is_good());
        assert!(!flags.is_core());
        flags.pattern_left = true;
        assert!(flags.is_core());
        flags.isolated = false;
        assert!(!flags.is_core());
    }
}
