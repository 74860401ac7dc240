//! Sense wires: identity, endpoints and the geometric queries the finder needs.
//!
//! A wire is a straight line between its backward (−z) and forward (+z)
//! endpoints. Axial wires are parallel to the chamber axis; stereo wires are
//! twisted so that their azimuth changes along z.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Global wire index (dense, 0-based over the whole chamber).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WireId(pub u32);

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Wire orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireKind {
    /// Parallel to the chamber axis: measures r-phi only
    Axial,
    /// Skewed by a small stereo angle: adds z sensitivity
    Stereo,
}

// ---------------------------------------------------------------------------
// Wire
// ---------------------------------------------------------------------------

/// One sense wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    pub id: WireId,
    /// Global layer index, counted from the innermost layer
    pub layer: u32,
    /// Index of the wire within its layer
    pub local_id: u32,
    /// Number of wires in this wire's layer
    pub n_in_layer: u32,
    pub super_layer: u32,
    pub kind: WireKind,
    /// Backward endpoint (x, y, z) in cm
    pub backward: [f64; 3],
    /// Forward endpoint (x, y, z) in cm
    pub forward: [f64; 3],
}

impl Wire {
    pub fn is_axial(&self) -> bool {
        self.kind == WireKind::Axial
    }

    pub fn backward_position(&self) -> Vector3<f64> {
        Vector3::from(self.backward)
    }

    pub fn forward_position(&self) -> Vector3<f64> {
        Vector3::from(self.forward)
    }

    /// Unit vector from the backward to the forward endpoint.
    pub fn direction(&self) -> Vector3<f64> {
        (self.forward_position() - self.backward_position()).normalize()
    }

    pub fn length(&self) -> f64 {
        (self.forward_position() - self.backward_position()).norm()
    }

    /// Mid-point of the wire projected on the xy plane.
    pub fn xy_position(&self) -> Vector2<f64> {
        Vector2::new(
            0.5 * (self.backward[0] + self.forward[0]),
            0.5 * (self.backward[1] + self.forward[1]),
        )
    }

    /// Point along the wire, `t = 0` at the backward end and `t = 1` at the
    /// forward end.
    pub fn position_at(&self, t: f64) -> Vector3<f64> {
        let b = self.backward_position();
        b + (self.forward_position() - b) * t
    }

    /// Wire position at a given z (extrapolated when outside the wire).
    pub fn position_at_z(&self, z: f64) -> Vector3<f64> {
        let dz = self.forward[2] - self.backward[2];
        if dz.abs() < f64::EPSILON {
            return self.position_at(0.5);
        }
        self.position_at((z - self.backward[2]) / dz)
    }

    /// (min z, max z) of the wire.
    pub fn z_range(&self) -> (f64, f64) {
        let (a, b) = (self.backward[2], self.forward[2]);
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn contains_z(&self, z: f64) -> bool {
        let (lo, hi) = self.z_range();
        z >= lo && z <= hi
    }

    /// Signed circular distance in cell units from `self` to `other`,
    /// wrapped into `(-n/2, n/2]`. Meaningful only for wires sharing a cell
    /// count (same layer or same super-layer).
    pub fn local_id_difference(&self, other: &Wire) -> i32 {
        let n = self.n_in_layer.max(1) as i32;
        let mut d = (other.local_id as i32 - self.local_id as i32).rem_euclid(n);
        if d > n / 2 {
            d -= n;
        }
        d
    }

    /// Cell width at the wire radius (cm).
    pub fn cell_size(&self) -> f64 {
        std::f64::consts::TAU * self.xy_position().norm() / self.n_in_layer.max(1) as f64
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.layer, self.local_id)
    }
}
