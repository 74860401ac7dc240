//! Scenario definitions.
//!
//! Each scenario is a named generator configuration plus the builder suited
//! to its track topology. All scenarios are deterministic given the seed.

use crate::generator::{EventGenerator, GeneratorConfig};
use chamber_model::ChamberLayout;
use finder_core::pipeline::PipelineConfig;
use finder_core::track::BuilderKind;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// One stiff track from the interaction point
    Single,
    /// Five tracks of mixed charge and pt
    Multi,
    /// Low-pt tracks that turn inside the chamber
    LowPt,
    /// One through-going track off the interaction point
    Cosmic,
    /// Three tracks with drift smearing, inefficiency and noise hits
    Noisy,
}

/// A fully configured scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub layout: ChamberLayout,
    pub generator: GeneratorConfig,
    /// Builder the finder should run with
    pub builder: BuilderKind,
    /// Tighter sqrt(χ²/ndf) limit for scenarios with noise hits
    pub max_sigma: Option<f64>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        let (name, generator, builder, max_sigma) = match kind {
            ScenarioKind::Single => (
                "single",
                GeneratorConfig {
                    n_particles: 1,
                    pt_range: [1.0, 3.0],
                    ..GeneratorConfig::default()
                },
                BuilderKind::Normal,
                None,
            ),
            ScenarioKind::Multi => (
                "multi",
                GeneratorConfig {
                    n_particles: 5,
                    pt_range: [0.4, 2.5],
                    ..GeneratorConfig::default()
                },
                BuilderKind::Normal,
                None,
            ),
            ScenarioKind::LowPt => (
                "low_pt",
                GeneratorConfig {
                    n_particles: 1,
                    pt_range: [0.12, 0.18],
                    tan_lambda_range: [-0.2, 0.2],
                    ..GeneratorConfig::default()
                },
                BuilderKind::Curl,
                None,
            ),
            ScenarioKind::Cosmic => (
                "cosmic",
                GeneratorConfig {
                    n_particles: 1,
                    pt_range: [3.0, 10.0],
                    tan_lambda_range: [-0.3, 0.3],
                    dz_sigma: 5.0,
                    dr_range: [2.0, 8.0],
                    through_going: true,
                    ..GeneratorConfig::default()
                },
                BuilderKind::Cosmic,
                None,
            ),
            ScenarioKind::Noisy => (
                "noisy",
                GeneratorConfig {
                    n_particles: 3,
                    pt_range: [0.5, 2.5],
                    drift_smear: 0.01,
                    efficiency: 0.97,
                    noise_fraction: 0.01,
                    ..GeneratorConfig::default()
                },
                BuilderKind::Normal,
                Some(2.0),
            ),
        };
        Scenario {
            name: name.into(),
            seed,
            layout: ChamberLayout::default(),
            generator,
            builder,
            max_sigma,
        }
    }

    /// Apply the scenario's builder and selector limits to `config`.
    pub fn configure(&self, mut config: PipelineConfig) -> PipelineConfig {
        config.builder = self.builder;
        if let Some(sigma) = self.max_sigma {
            config.selector.max_sigma = sigma;
        }
        config
    }

    /// Generator over this scenario's chamber.
    pub fn event_generator(&self) -> EventGenerator {
        EventGenerator::new(self.generator.clone(), self.layout.build(), self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finder_core::metrics::ReconstructionMetrics;
    use finder_core::pipeline::Pipeline;
    use finder_core::track::Track;

    /// Run `n` events of a scenario; returns the metrics and every track.
    fn run(kind: ScenarioKind, n: u64, config: PipelineConfig) -> (ReconstructionMetrics, Vec<Track>) {
        let scenario = Scenario::build(kind, 7);
        let generator = scenario.event_generator();
        let mut pipeline = Pipeline::new(scenario.configure(config));
        let mut metrics = ReconstructionMetrics::default();
        let mut tracks = Vec::new();
        for i in 0..n {
            let event = generator.generate(i);
            let input = event.input(generator.chamber()).unwrap();
            let out = pipeline.reconstruct(&input.axial, &input.stereo);
            metrics.accumulate(
                out.all_tracks(),
                &input.hit_truth,
                &event.particle_truth(),
                out.total_time_us,
            );
            tracks.extend(out.all_tracks().cloned());
        }
        (metrics, tracks)
    }

    #[test]
    fn single_tracks_are_found() {
        let (m, _) = run(ScenarioKind::Single, 10, PipelineConfig::default());
        assert!(m.efficiency() >= 0.9, "efficiency {}", m.efficiency());
        assert_eq!(m.n_fakes, 0);
        assert_eq!(m.n_charge_flips, 0);
        assert!(m.pt_resolution() < 0.05, "pt resolution {}", m.pt_resolution());
    }

    #[test]
    fn multi_track_events_have_few_clones() {
        let (m, _) = run(ScenarioKind::Multi, 5, PipelineConfig::default());
        assert!(m.efficiency() >= 0.8, "efficiency {}", m.efficiency());
        assert!(m.n_clones <= 1);
        assert!(m.fake_rate() <= 0.1);
    }

    #[test]
    fn noisy_events_keep_most_tracks() {
        let (m, tracks) = run(ScenarioKind::Noisy, 30, PipelineConfig::default());
        assert!(m.efficiency() >= 0.7, "efficiency {}", m.efficiency());
        assert!(m.fake_rate() <= 0.2);
        assert!(m.pt_resolution() < 0.25, "pt resolution {}", m.pt_resolution());
        for t in &tracks {
            assert!(t.quality.sigma <= 2.0, "{} sigma {}", t.id, t.quality.sigma);
        }
    }

    #[test]
    fn low_pt_tracks_are_found_by_the_curl_builder() {
        let (m, tracks) = run(ScenarioKind::LowPt, 10, PipelineConfig::default());
        assert!(m.efficiency() >= 0.6, "efficiency {}", m.efficiency());
        assert!(!tracks.is_empty());
        assert!(tracks.iter().all(|t| t.kind == BuilderKind::Curl));
    }

    #[test]
    fn cosmic_tracks_are_found_off_the_interaction_point() {
        let (m, tracks) = run(ScenarioKind::Cosmic, 10, PipelineConfig::default());
        assert!(m.efficiency() >= 0.5, "efficiency {}", m.efficiency());
        assert!(tracks.iter().all(|t| t.kind == BuilderKind::Cosmic));
        assert!(tracks.iter().any(|t| t.helix.impact() > 1.0));
    }

    #[test]
    fn planar_only_run_finds_tracks_without_stereo() {
        let config = PipelineConfig {
            do_stereo: false,
            ..PipelineConfig::default()
        };
        let (m, _) = run(ScenarioKind::Single, 5, config);
        assert!(m.efficiency() >= 0.8, "efficiency {}", m.efficiency());
    }

    #[test]
    fn scenario_kinds_pick_their_builder() {
        assert_eq!(Scenario::build(ScenarioKind::Cosmic, 0).builder, BuilderKind::Cosmic);
        assert_eq!(Scenario::build(ScenarioKind::LowPt, 0).builder, BuilderKind::Curl);
        let s = Scenario::build(ScenarioKind::Noisy, 3);
        assert_eq!(s.seed, 3);
        assert!(s.generator.noise_fraction > 0.0);
        let config = s.configure(PipelineConfig::default());
        assert_eq!(config.selector.max_sigma, 2.0);
        let single = Scenario::build(ScenarioKind::Single, 3).configure(PipelineConfig::default());
        assert_eq!(single.selector.max_sigma, PipelineConfig::default().selector.max_sigma);
    }
}
