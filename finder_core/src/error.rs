//! Error taxonomy of the finder.
//!
//! Every variant is local to one candidate: the pipeline drops the candidate
//! and moves on to the next seed. Nothing here is fatal to an event.

use crate::selector::SelectionFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where a hit-count requirement was not met.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    CircleFit,
    Planar,
    HelixFit,
    Stereo,
    LineFit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CircleFit => "circle fit",
            Stage::Planar => "planar build",
            Stage::HelixFit => "helix fit",
            Stage::Stereo => "stereo search",
            Stage::LineFit => "sz line fit",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconError {
    #[error("geometric degeneracy: {0}")]
    GeometricDegeneracy(String),

    #[error("insufficient hits in {stage}: found {found}, required {required}")]
    InsufficientHits {
        stage: Stage,
        found: usize,
        required: usize,
    },

    #[error("fit did not converge after {iterations} iterations")]
    ConvergenceFailure { iterations: usize },

    #[error("singular covariance: normal equations are not invertible")]
    SingularCovariance,

    #[error("low fraction of retained hits: {fraction:.3} < {threshold:.3}")]
    LowFraction { fraction: f64, threshold: f64 },

    #[error("rejected by selector: {0}")]
    Rejected(SelectionFailure),
}

impl From<SelectionFailure> for ReconError {
    fn from(f: SelectionFailure) -> Self {
        ReconError::Rejected(f)
    }
}

impl ReconError {
    /// Short machine-friendly label, used for rejection statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconError::GeometricDegeneracy(_) => "geometric_degeneracy",
            ReconError::InsufficientHits { .. } => "insufficient_hits",
            ReconError::ConvergenceFailure { .. } => "convergence_failure",
            ReconError::SingularCovariance => "singular_covariance",
            ReconError::LowFraction { .. } => "low_fraction",
            ReconError::Rejected(_) => "rejected",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
