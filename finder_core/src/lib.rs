//! `finder_core` — Conformal track finding for a cylindrical drift chamber.
//!
//! # Module layout
//! - [`types`]     — Hit ids, wire hits, links, the event hit pool
//! - [`conformal`] — Conformal and (phi, log r) hit transforms
//! - [`histogram`] — Per super-layer phi histogram and segment clustering
//! - [`segment`]   — Segments: properties, splitting, dual hits, the store
//! - [`linker`]    — Chaining segments across super-layers
//! - [`circle`]    — Algebraic circle fit
//! - [`helix`]     — Helix parametrization and wire approach
//! - [`line`]      — Straight-line fit in the sz plane
//! - [`fitter`]    — Iterative helix fit over drift distances
//! - [`selector`]  — Quality gates
//! - [`stereo`]    — Stereo hit search and sz reconstruction
//! - [`track`]     — Candidates and finalized tracks
//! - [`builder`]   — Normal, cosmic and curl track builders
//! - [`pipeline`]  — Full event pipeline orchestrator
//! - [`metrics`]   — Efficiency, fake rate, pt resolution
//! - [`error`]     — Error taxonomy

pub mod builder;
pub mod circle;
pub mod conformal;
pub mod error;
pub mod fitter;
pub mod helix;
pub mod histogram;
pub mod line;
pub mod linker;
pub mod metrics;
pub mod pipeline;
pub mod segment;
pub mod selector;
pub mod stereo;
pub mod track;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ReconError, Result};
pub use helix::Helix;
pub use metrics::{ParticleTruth, ReconstructionMetrics};
pub use pipeline::{Pipeline, PipelineConfig, ReconstructionOutput};
pub use selector::{SelectionFailure, SelectorConfig, TrackQuality};
pub use track::{BuilderKind, Track};
pub use types::{HitFlags, HitId, HitPool, Link, TrackId, WireHit};
