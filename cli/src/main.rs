//! `trackfind` CLI: run the finder on generated events or replay an event log.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use finder_core::metrics::ReconstructionMetrics;
use finder_core::pipeline::{Pipeline, PipelineConfig};
use finder_core::track::BuilderKind;
use sim::event_log::{load_events, save_events, EventLog};
use sim::generator::{EventGenerator, GeneratedEvent};
use sim::scenarios::{Scenario, ScenarioKind};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "trackfind", about = "Drift-chamber track finder CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate events, reconstruct them and report metrics.
    Run {
        /// Base scenario for the generator
        #[arg(long, value_enum, default_value_t = ScenarioKind::Single)]
        scenario: ScenarioKind,
        /// Number of events
        #[arg(long, default_value_t = 10)]
        events: u64,
        /// Particles per event (overrides the scenario)
        #[arg(long)]
        particles: Option<usize>,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Noise hit probability per wire
        #[arg(long)]
        noise: Option<f64>,
        /// Gaussian drift smearing (cm)
        #[arg(long)]
        smear: Option<f64>,
        /// Track builder (overrides the scenario)
        #[arg(long, value_enum)]
        builder: Option<BuilderArg>,
        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the generated events
        #[arg(long)]
        save_events: Option<PathBuf>,
    },
    /// Reconstruct the events of a previously saved log.
    Replay {
        /// Path to the event log JSON file
        input: PathBuf,
        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BuilderArg {
    Normal,
    Cosmic,
    Curl,
}

impl From<BuilderArg> for BuilderKind {
    fn from(b: BuilderArg) -> Self {
        match b {
            BuilderArg::Normal => BuilderKind::Normal,
            BuilderArg::Cosmic => BuilderKind::Cosmic,
            BuilderArg::Curl => BuilderKind::Curl,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            events,
            particles,
            seed,
            noise,
            smear,
            builder,
            config,
            output,
            save_events: save_path,
        } => {
            let mut scenario = Scenario::build(scenario, seed);
            if let Some(n) = particles {
                scenario.generator.n_particles = n;
            }
            if let Some(f) = noise {
                scenario.generator.noise_fraction = f;
            }
            if let Some(s) = smear {
                scenario.generator.drift_smear = s;
            }
            let mut config = scenario.configure(load_config(config.as_deref())?);
            if let Some(b) = builder {
                config.builder = b.into();
            }
            run_generated(&scenario, events, config, output.as_deref(), save_path.as_deref())?;
        }
        Commands::Replay {
            input,
            config,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            run_replay(&input, config, output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

fn run_generated(
    scenario: &Scenario,
    n_events: u64,
    config: PipelineConfig,
    output_path: Option<&Path>,
    log_path: Option<&Path>,
) -> Result<()> {
    let mut generator: EventGenerator = scenario.event_generator();
    println!(
        "Running scenario '{}' (seed={}, events={}, builder={:?})...",
        scenario.name, scenario.seed, n_events, config.builder
    );
    let events: Vec<GeneratedEvent> = (0..n_events).map(|_| generator.next_event()).collect();
    let metrics = reconstruct_all(&events, generator.chamber(), config)?;
    report(&metrics);

    if let Some(lpath) = log_path {
        let log = EventLog {
            scenario_name: scenario.name.clone(),
            seed: scenario.seed,
            layout: scenario.layout.clone(),
            events,
        };
        save_events(&log, lpath)?;
        println!("Events saved to {}", lpath.display());
    }

    if let Some(opath) = output_path {
        write_summary(opath, &scenario.name, scenario.seed, &metrics)?;
    }
    Ok(())
}

fn run_replay(input: &Path, config: PipelineConfig, output_path: Option<&Path>) -> Result<()> {
    let log = load_events(input)?;
    println!(
        "Replaying '{}' ({} events)...",
        log.scenario_name,
        log.events.len()
    );
    let chamber = log.layout.build();
    let metrics = reconstruct_all(&log.events, &chamber, config)?;
    report(&metrics);
    if let Some(opath) = output_path {
        write_summary(opath, &log.scenario_name, log.seed, &metrics)?;
    }
    Ok(())
}

fn reconstruct_all(
    events: &[GeneratedEvent],
    chamber: &chamber_model::Chamber,
    config: PipelineConfig,
) -> Result<ReconstructionMetrics> {
    let mut pipeline = Pipeline::new(config);
    let mut metrics = ReconstructionMetrics::default();
    for event in events {
        let input = event.input(chamber)?;
        let out = pipeline.reconstruct(&input.axial, &input.stereo);
        println!(
            "event {:>4}: {:>4} hits, {:>3} segments, {:>2} tracks ({} 3D-only), {} rejected chains",
            event.index,
            input.axial.len() + input.stereo.len(),
            out.n_segments,
            out.tracks.len(),
            out.tracks_3d_only.len(),
            out.rejected.len(),
        );
        for t in out.all_tracks() {
            println!(
                "    {} q={:+.0} pt={:.3} tanλ={:.3} dz={:.2} hits={} ({} stereo) χ²/ndf={:.2}",
                t.id,
                t.charge,
                t.pt(),
                t.helix.tan_lambda(),
                t.helix.dz(),
                t.n_hits(),
                t.quality.n_stereo,
                t.chi2 / t.ndf.max(1) as f64,
            );
        }
        metrics.accumulate(
            out.all_tracks(),
            &input.hit_truth,
            &event.particle_truth(),
            out.total_time_us,
        );
    }
    Ok(metrics)
}

fn report(m: &ReconstructionMetrics) {
    println!(
        "Done: {} events, efficiency={:.3}, fake rate={:.3}, clones={}, pt resolution={:.4}, mean time={:.0}µs",
        m.n_events,
        m.efficiency(),
        m.fake_rate(),
        m.n_clones,
        m.pt_resolution(),
        m.mean_time_us(),
    );
}

fn write_summary(path: &Path, name: &str, seed: u64, metrics: &ReconstructionMetrics) -> Result<()> {
    let json = serde_json::json!({
        "scenario": name,
        "seed": seed,
        "efficiency": metrics.efficiency(),
        "fake_rate": metrics.fake_rate(),
        "pt_resolution": metrics.pt_resolution(),
        "metrics": metrics,
    });
    std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
    println!("Metrics saved to {}", path.display());
    Ok(())
}
