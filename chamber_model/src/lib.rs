//! `chamber_model` — Drift-chamber wire geometry: wires, layers, super-layers.
//!
//! # Module layout
//! - [`wire`]   — `WireId`, `Wire` and per-wire geometric queries
//! - [`layout`] — `ChamberLayout`, the materialized `Chamber` and the
//!   `WireGeometry` lookup trait

pub mod layout;
pub mod wire;

pub use layout::{Chamber, ChamberLayout, SuperLayerSpec, WireGeometry};
pub use wire::{Wire, WireId, WireKind};
