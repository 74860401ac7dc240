//! Stereo hit search: turns stereo wires crossed by a fitted circle into
//! (arc length, z) points and fits the sz line that seeds dz and tan λ.
//!
//! # Hypotheses
//! The xy projection of a stereo wire is a straight segment. Intersecting
//! it with the circles of radius R + d and R − d (d = drift for one side)
//! gives up to two points per side with the wire parameter t in [0, 1],
//! i.e. inside the physical wire. Each point fixes z on the wire and the
//! track point beneath it fixes the arc length.
//!
//! # Selection
//! 1. Drift-free crossings plus a loose anchor at the pivot give a first line.
//! 2. Hits are taken from the inside out; each picks the hypothesis closest to
//!    the running line, which is refitted after every pick.
//! 3. The line is refitted through the pull schedule in `line_prune`.

use crate::error::{ReconError, Result, Stage};
use crate::helix::Helix;
use crate::line::{Line, SzPoint};
use crate::types::{HitId, LeftRight, Link, Point2, Point3, WireHit};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// How the arc length of a stereo crossing is measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcMode {
    /// From the pivot in the direction of flight, in [0, 2π|ρ|)
    #[default]
    FromOrigin,
    /// Either side of the pivot, in (−π|ρ|, π|ρ|]
    Signed,
    /// From the pivot plus whole turns, the turn picked by the running line
    Unwrapped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StereoConfig {
    /// Max distance (cm) of a stereo wire from the circle, per super-layer
    pub windows: Vec<f64>,
    /// Pull thresholds of the sz line refits
    pub line_prune: Vec<f64>,
    /// Pull thresholds of the 3D helix refit, as |r|/σ per hit. A χ²
    /// contribution cut at c corresponds to a pull cut at √c.
    pub refit_prune: Vec<f64>,
    /// z uncertainty of the pivot anchor (cm)
    pub anchor_sigma: f64,
    /// Turns considered in `ArcMode::Unwrapped`
    pub max_turns: usize,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            windows: vec![0.0, 4.3, 0.0, 6.5, 0.0, 7.5, 0.0, 8.0, 0.0, 9.5, 0.0],
            line_prune: vec![40.0, 20.0, 10.0],
            refit_prune: vec![30.0, 10.0, 3.0],
            anchor_sigma: 10.0,
            max_turns: 3,
        }
    }
}

impl StereoConfig {
    pub fn window(&self, super_layer: u32) -> f64 {
        self.windows
            .get(super_layer as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

/// One way a stereo hit can sit on the track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SzHypothesis {
    pub s: f64,
    pub z: f64,
    pub sigma: f64,
    pub left_right: LeftRight,
    pub on_wire: Point3,
    pub on_track: Point3,
}

impl SzHypothesis {
    pub fn point(&self) -> SzPoint {
        SzPoint::new(self.s, self.z, self.sigma)
    }
}

/// Min over the wire of | |p − c| − R | in xy.
pub fn wire_circle_distance(helix: &Helix, hit: &WireHit) -> f64 {
    let c = helix.center();
    let r = helix.radius();
    let b = hit.wire.backward_position().xy();
    let f = hit.wire.forward_position().xy();
    let d = f - b;
    let len2 = d.norm_squared();
    let t = if len2 > 0.0 {
        ((c - b).dot(&d) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let near = (b + d * t - c).norm() - r;
    let far = (b - c).norm().max((f - c).norm()) - r;
    if near <= 0.0 && far >= 0.0 {
        0.0
    } else {
        near.abs().min(far.abs())
    }
}

/// Stereo hits close enough to the circle of `helix`. With a `side`
/// reference (the xy position of the track's innermost wire) only wires in
/// the same half plane, `side · w > 0`, are kept.
pub fn find_close_hits(
    helix: &Helix,
    hits: &[WireHit],
    candidates: &[HitId],
    config: &StereoConfig,
    side: Option<Point2>,
) -> Vec<HitId> {
    candidates
        .iter()
        .copied()
        .filter(|id| {
            let hit = &hits[id.index()];
            if hit.is_axial() {
                return false;
            }
            if side.is_some_and(|s| s.dot(&hit.xy_position()) <= 0.0) {
                return false;
            }
            wire_circle_distance(helix, hit) < config.window(hit.super_layer())
        })
        .collect()
}

/// Arc length of the track point `p` (xy) under `mode`. `reference` picks
/// the turn for `ArcMode::Unwrapped`.
pub fn arc_length(
    helix: &Helix,
    p: &Point2,
    mode: ArcMode,
    max_turns: usize,
    reference: Option<(&Line, f64)>,
) -> f64 {
    let s = helix.arc_length(helix.turning_angle(p));
    let circumference = TAU * helix.radius();
    match mode {
        ArcMode::Signed => {
            let half = PI * helix.radius();
            if s > half {
                s - circumference
            } else if s <= -half {
                s + circumference
            } else {
                s
            }
        }
        ArcMode::FromOrigin => s.rem_euclid(circumference),
        ArcMode::Unwrapped => {
            let base = s.rem_euclid(circumference);
            match reference {
                Some((line, z)) => (0..=max_turns)
                    .map(|k| base + k as f64 * circumference)
                    .min_by(|a, b| {
                        (line.z_at(*a) - z)
                            .abs()
                            .total_cmp(&(line.z_at(*b) - z).abs())
                    })
                    .unwrap_or(base),
                None => base,
            }
        }
    }
}

/// Hypotheses of one stereo hit; `drift_free` ignores the drift distance.
pub fn hypotheses(
    helix: &Helix,
    hit: &WireHit,
    mode: ArcMode,
    max_turns: usize,
    reference: Option<&Line>,
    drift_free: bool,
) -> Vec<SzHypothesis> {
    let c = helix.center();
    let r = helix.radius();
    let b = hit.wire.backward_position();
    let d = hit.wire.forward_position() - b;
    let dxy = d.xy();
    let a2 = dxy.norm_squared();
    if a2 <= f64::EPSILON {
        return Vec::new();
    }
    let bc = b.xy() - c;

    let sides: &[LeftRight] = if drift_free {
        &[LeftRight::Unresolved]
    } else {
        &[LeftRight::Left, LeftRight::Right]
    };
    let mut out = Vec::new();
    for &side in sides {
        let drift = if drift_free { 0.0 } else { hit.drift_for(side) };
        let sigma_z = hit.drift_error_for(side).max(1e-3) * d.z.abs() / a2.sqrt();
        let radii = if drift == 0.0 {
            vec![r]
        } else {
            vec![r + drift, r - drift]
        };
        for radius in radii {
            if radius <= 0.0 {
                continue;
            }
            let bq = 2.0 * dxy.dot(&bc);
            let cq = bc.norm_squared() - radius * radius;
            let disc = bq * bq - 4.0 * a2 * cq;
            if disc < 0.0 {
                continue;
            }
            let sq = disc.sqrt();
            for t in [(-bq - sq) / (2.0 * a2), (-bq + sq) / (2.0 * a2)] {
                if !(0.0..=1.0).contains(&t) {
                    continue;
                }
                let on_wire = b + d * t;
                let rel = on_wire.xy() - c;
                let n = rel.norm();
                if n <= f64::EPSILON {
                    continue;
                }
                let track_xy = c + rel * (r / n);
                let on_track = Point3::new(track_xy.x, track_xy.y, on_wire.z);
                let left_right = if drift_free {
                    LeftRight::Unresolved
                } else {
                    LeftRight::from_geometry(&on_wire, &on_track)
                };
                // Only the geometry that matches the hypothesised side counts
                if !drift_free && left_right != side {
                    continue;
                }
                let s = arc_length(
                    helix,
                    &track_xy,
                    mode,
                    max_turns,
                    reference.map(|l| (l, on_wire.z)),
                );
                out.push(SzHypothesis {
                    s,
                    z: on_wire.z,
                    sigma: sigma_z,
                    left_right,
                    on_wire,
                    on_track,
                });
            }
        }
    }
    out
}

/// Stereo links chosen for a track with the sz line through them.
#[derive(Clone, Debug)]
pub struct SzSolution {
    pub line: Line,
    pub links: Vec<Link>,
}

/// Pick one hypothesis per stereo hit and fit the sz line.
pub fn solve_sz(
    helix: &Helix,
    hits: &[WireHit],
    stereo: &[Link],
    config: &StereoConfig,
    mode: ArcMode,
    min_stereo: usize,
) -> Result<SzSolution> {
    let insufficient = |found: usize| ReconError::InsufficientHits {
        stage: Stage::Stereo,
        found,
        required: min_stereo,
    };
    if stereo.len() < min_stereo {
        return Err(insufficient(stereo.len()));
    }
    let anchor = SzPoint::new(0.0, helix.dz(), config.anchor_sigma);

    // First line from drift-free crossings, earliest crossing per hit
    let mut seed_points = vec![anchor];
    for link in stereo {
        let hit = &hits[link.hit.index()];
        let first = hypotheses(helix, hit, mode, config.max_turns, None, true)
            .into_iter()
            .min_by(|a, b| a.s.abs().total_cmp(&b.s.abs()));
        if let Some(h) = first {
            seed_points.push(h.point());
        }
    }
    if seed_points.len() - 1 < min_stereo {
        return Err(insufficient(seed_points.len() - 1));
    }
    let seed_line = Line::fit(&seed_points)?;

    // Inside-out side selection against a running fit
    let mut order: Vec<&Link> = stereo.iter().collect();
    order.sort_by_key(|l| hits[l.hit.index()].layer());
    let mut points = vec![anchor];
    let mut chosen: Vec<(Link, SzHypothesis)> = Vec::new();
    let mut running = seed_line;
    for link in order {
        let hit = &hits[link.hit.index()];
        let best = hypotheses(helix, hit, mode, config.max_turns, Some(&running), false)
            .into_iter()
            .min_by(|a, b| {
                running
                    .residual(&a.point())
                    .abs()
                    .total_cmp(&running.residual(&b.point()).abs())
            });
        let Some(best) = best else {
            continue;
        };
        points.push(best.point());
        chosen.push((link.clone(), best));
        if chosen.len() >= 2 {
            if let Ok(line) = Line::fit(&points) {
                running = line;
            }
        }
    }
    if chosen.len() < min_stereo {
        return Err(insufficient(chosen.len()));
    }

    // Outlier pruning on the real points; the anchor stays
    for &th in &config.line_prune {
        let mut pts = vec![anchor];
        pts.extend(chosen.iter().map(|(_, h)| h.point()));
        let line = Line::fit(&pts)?;
        chosen.retain(|(_, h)| line.pull(&h.point()) <= th);
        if chosen.len() < min_stereo {
            tracing::debug!(threshold = th, left = chosen.len(), "sz prune below minimum");
            return Err(insufficient(chosen.len()));
        }
    }
    let mut pts = vec![anchor];
    pts.extend(chosen.iter().map(|(_, h)| h.point()));
    let line = Line::fit(&pts)?;

    let links = chosen
        .into_iter()
        .map(|(mut link, h)| {
            link.left_right = h.left_right;
            link.on_wire = h.on_wire;
            link.on_track = h.on_track;
            link.arc_z = Point2::new(h.s, h.z);
            link
        })
        .collect();
    Ok(SzSolution { line, links })
}
