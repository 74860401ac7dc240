//! Hit builders shared by the unit tests.

use crate::conformal::HitTransform;
use crate::helix::Helix;
use crate::types::{HitFlags, HitId, Link, WireHit};
use chamber_model::{Chamber, ChamberLayout, WireGeometry};

pub const DRIFT_ERROR: f64 = 0.02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitSelection {
    Axial,
    Stereo,
    /// Axial hits first, then stereo
    All,
}

pub fn chamber() -> Chamber {
    ChamberLayout::default().build()
}

pub fn core_flags() -> HitFlags {
    HitFlags {
        pattern_left: true,
        ..HitFlags::default()
    }
}

/// Core hits on the given (layer, local id) cells, all with the same drift.
pub fn flat_hits(cells: &[(u32, u32)], drift: f64) -> Vec<WireHit> {
    let chamber = chamber();
    cells
        .iter()
        .map(|&(layer, local)| {
            let wire = chamber.wire_at(layer, local as i64).unwrap();
            WireHit::new(&chamber, wire.id, drift, DRIFT_ERROR)
                .unwrap()
                .with_flags(core_flags())
        })
        .collect()
}

/// Conformal links about the origin, one per hit, `HitId` = position.
pub fn links_for(hits: &[WireHit]) -> Vec<Link> {
    let ids: Vec<HitId> = (0..hits.len() as u32).map(HitId).collect();
    HitTransform::origin().transform(hits, &ids)
}

/// Noise-free hits of `helix`: in every layer it crosses, the wire nearest
/// to the crossing, with the exact closest-approach distance as drift.
pub fn helix_hits(helix: &Helix, selection: HitSelection, drift_error: f64) -> Vec<WireHit> {
    let chamber = chamber();
    let mut axial = Vec::new();
    let mut stereo = Vec::new();
    for layer in 0..chamber.n_layers() as u32 {
        let Some(r) = chamber.layer_radius(layer) else {
            continue;
        };
        let Some(dphi) = helix.crossing_at_radius(r) else {
            continue;
        };
        let p = helix.position(dphi);
        let Some(wire) = chamber.layer_wires(layer).iter().min_by(|a, b| {
            let da = (a.position_at_z(p.z).xy() - p.xy()).norm();
            let db = (b.position_at_z(p.z).xy() - p.xy()).norm();
            da.total_cmp(&db)
        }) else {
            continue;
        };
        if !wire.contains_z(p.z) {
            continue;
        }
        let ap = helix.approach(wire).unwrap();
        let hit = WireHit::new(&chamber, wire.id, ap.distance, drift_error)
            .unwrap()
            .with_flags(core_flags());
        if wire.is_axial() {
            axial.push(hit);
        } else {
            stereo.push(hit);
        }
    }
    match selection {
        HitSelection::Axial => axial,
        HitSelection::Stereo => stereo,
        HitSelection::All => {
            axial.extend(stereo);
            axial
        }
    }
}
