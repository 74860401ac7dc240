//! Chamber layout: concentric super-layers of axial and stereo wires.

use crate::wire::{Wire, WireId, WireKind};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Read-only, by-id access to the wire geometry.
pub trait WireGeometry {
    /// Wire with the given id, `None` when the id is out of range.
    fn wire(&self, id: WireId) -> Option<&Wire>;
    /// All wires, ordered by id.
    fn wires(&self) -> &[Wire];
    /// Wires of one layer, ordered by local id (empty for an unknown layer).
    fn layer_wires(&self, layer: u32) -> &[Wire];
    fn n_layers(&self) -> usize;
    fn n_super_layers(&self) -> usize;

    /// Wire by (layer, local id), wrapping the local id around the layer.
    fn wire_at(&self, layer: u32, local_id: i64) -> Option<&Wire> {
        let wires = self.layer_wires(layer);
        if wires.is_empty() {
            return None;
        }
        let idx = local_id.rem_euclid(wires.len() as i64) as usize;
        wires.get(idx)
    }
}

/// Geometry of one super-layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuperLayerSpec {
    pub kind: WireKind,
    pub n_layers: u32,
    /// Radius of the innermost layer (cm)
    pub inner_radius: f64,
    /// Radial distance between layers (cm)
    pub layer_spacing: f64,
    pub wires_per_layer: u32,
    /// Stereo angle (rad), signed; ignored for axial super-layers
    pub stereo_angle: f64,
    /// z of the backward endplate (cm)
    pub z_backward: f64,
    /// z of the forward endplate (cm)
    pub z_forward: f64,
}

/// Full chamber description, one entry per super-layer from the inside out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChamberLayout {
    pub super_layers: Vec<SuperLayerSpec>,
}

impl Default for ChamberLayout {
    /// 11 super-layers of 4 layers each, axial on even indices.
    fn default() -> Self {
        const AXIAL_WIRES: [u32; 6] = [64, 96, 144, 192, 240, 288];
        const STEREO_WIRES: [u32; 5] = [80, 128, 160, 208, 256];
        let super_layers = (0..11)
            .map(|sl| {
                let axial = sl % 2 == 0;
                let (kind, wires_per_layer, stereo_angle) = if axial {
                    (WireKind::Axial, AXIAL_WIRES[sl / 2], 0.0)
                } else {
                    // U and V orientations alternate
                    let sign = if (sl / 2) % 2 == 0 { 1.0 } else { -1.0 };
                    (WireKind::Stereo, STEREO_WIRES[sl / 2], sign * 0.06)
                };
                SuperLayerSpec {
                    kind,
                    n_layers: 4,
                    inner_radius: 12.0 + 7.0 * sl as f64,
                    layer_spacing: 1.6,
                    wires_per_layer,
                    stereo_angle,
                    z_backward: -75.0,
                    z_forward: 135.0,
                }
            })
            .collect();
        Self { super_layers }
    }
}

impl ChamberLayout {
    /// Materialize every wire of the layout.
    pub fn build(&self) -> Chamber {
        Chamber::new(self.clone())
    }

    pub fn n_layers(&self) -> usize {
        self.super_layers.iter().map(|s| s.n_layers as usize).sum()
    }

    /// Indices of the axial super-layers, inside out.
    pub fn axial_super_layers(&self) -> Vec<u32> {
        self.super_layers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == WireKind::Axial)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Chamber
// ---------------------------------------------------------------------------

/// A layout with all its wires laid out in memory.
#[derive(Clone, Debug)]
pub struct Chamber {
    layout: ChamberLayout,
    wires: Vec<Wire>,
    /// `layer_offsets[l]..layer_offsets[l + 1]` are the wires of layer `l`
    layer_offsets: Vec<usize>,
}

impl Chamber {
    pub fn new(layout: ChamberLayout) -> Self {
        let mut wires = Vec::new();
        let mut layer_offsets = vec![0];
        let mut layer = 0u32;
        for (sl, spec) in layout.super_layers.iter().enumerate() {
            for i in 0..spec.n_layers {
                let radius = spec.inner_radius + spec.layer_spacing * i as f64;
                let n = spec.wires_per_layer.max(1);
                // Odd layers are staggered by half a cell
                let stagger = if i % 2 == 1 { 0.5 } else { 0.0 };
                let twist = match spec.kind {
                    WireKind::Axial => 0.0,
                    WireKind::Stereo => {
                        let length = spec.z_forward - spec.z_backward;
                        let chord = length * spec.stereo_angle.tan() / (2.0 * radius);
                        2.0 * chord.clamp(-1.0, 1.0).asin()
                    }
                };
                for local_id in 0..n {
                    let phi = TAU * (local_id as f64 + stagger) / n as f64;
                    let (pb, pf) = (phi - 0.5 * twist, phi + 0.5 * twist);
                    wires.push(Wire {
                        id: WireId(wires.len() as u32),
                        layer,
                        local_id,
                        n_in_layer: n,
                        super_layer: sl as u32,
                        kind: spec.kind,
                        backward: [radius * pb.cos(), radius * pb.sin(), spec.z_backward],
                        forward: [radius * pf.cos(), radius * pf.sin(), spec.z_forward],
                    });
                }
                layer_offsets.push(wires.len());
                layer += 1;
            }
        }
        Self {
            layout,
            wires,
            layer_offsets,
        }
    }

    pub fn layout(&self) -> &ChamberLayout {
        &self.layout
    }

    /// Outer radius of the last layer (cm).
    pub fn outer_radius(&self) -> f64 {
        self.layout
            .super_layers
            .last()
            .map(|s| s.inner_radius + s.layer_spacing * (s.n_layers.saturating_sub(1)) as f64)
            .unwrap_or(0.0)
    }

    /// Nominal radius of a layer (cm).
    pub fn layer_radius(&self, layer: u32) -> Option<f64> {
        self.layer_wires(layer).first().map(|w| {
            let b = w.backward_position();
            (b.x * b.x + b.y * b.y).sqrt()
        })
    }
}

impl WireGeometry for Chamber {
    fn wire(&self, id: WireId) -> Option<&Wire> {
        self.wires.get(id.0 as usize)
    }

    fn wires(&self) -> &[Wire] {
        &self.wires
    }

    fn layer_wires(&self, layer: u32) -> &[Wire] {
        let l = layer as usize;
        match (self.layer_offsets.get(l), self.layer_offsets.get(l + 1)) {
            (Some(&a), Some(&b)) => &self.wires[a..b],
            _ => &[],
        }
    }

    fn n_layers(&self) -> usize {
        self.layer_offsets.len() - 1
    }

    fn n_super_layers(&self) -> usize {
        self.layout.super_layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn default_layout_wire_counts() {
        let chamber = ChamberLayout::default().build();
        assert_eq!(chamber.n_super_layers(), 11);
        assert_eq!(chamber.n_layers(), 44);
        assert_eq!(chamber.layer_wires(0).len(), 64);
        assert_eq!(chamber.layer_wires(4).len(), 80);
        assert_eq!(chamber.layer_wires(43).len(), 288);
        assert_eq!(
            chamber.layout().axial_super_layers(),
            vec![0, 2, 4, 6, 8, 10]
        );
        let last = chamber.wires().last().unwrap();
        assert_eq!(chamber.wire(last.id), Some(last));
        assert!(chamber.wire(WireId(u32::MAX)).is_none());
    }

    #[test]
    fn stereo_wires_twist_and_axial_wires_do_not() {
        let chamber = ChamberLayout::default().build();
        let axial = &chamber.layer_wires(0)[3];
        assert!(axial.is_axial());
        assert_abs_diff_eq!(axial.backward[0], axial.forward[0], epsilon = 1e-12);

        let stereo = &chamber.layer_wires(4)[3];
        assert!(!stereo.is_axial());
        let b = stereo.backward_position().xy();
        let f = stereo.forward_position().xy();
        // Both ends sit on the layer radius
        assert_abs_diff_eq!(b.norm(), f.norm(), epsilon = 1e-9);
        let xy_shift = (f - b).norm();
        let expected = (135.0 + 75.0) * 0.06_f64.tan();
        assert_abs_diff_eq!(xy_shift, expected, epsilon = 1e-6);
    }

    #[test]
    fn wire_at_wraps_local_id() {
        let chamber = ChamberLayout::default().build();
        let w = chamber.wire_at(0, -1).unwrap();
        assert_eq!(w.local_id, 63);
        assert_eq!(chamber.wire_at(0, 64).unwrap().local_id, 0);
        assert!(chamber.wire_at(99, 0).is_none());
    }
}
