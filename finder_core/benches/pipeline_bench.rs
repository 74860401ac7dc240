use chamber_model::{Chamber, ChamberLayout, WireGeometry};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use finder_core::helix::Helix;
use finder_core::pipeline::{Pipeline, PipelineConfig};
use finder_core::types::{HitFlags, WireHit};

/// Hits of `n` tracks fanned out in phi, nearest wire per layer.
fn make_event(chamber: &Chamber, n: usize) -> (Vec<WireHit>, Vec<WireHit>) {
    let mut axial = Vec::new();
    let mut stereo = Vec::new();
    let flags = HitFlags {
        pattern_left: true,
        ..HitFlags::default()
    };
    for i in 0..n {
        let phi0 = i as f64 * std::f64::consts::TAU / n as f64;
        let charge = if i % 2 == 0 { 1.0 } else { -1.0 };
        let kappa = charge / (150.0 + 20.0 * i as f64);
        let helix = Helix::from_parameters(0.0, phi0, kappa, 0.0, 0.3);
        for layer in 0..chamber.n_layers() as u32 {
            let Some(dphi) = chamber
                .layer_radius(layer)
                .and_then(|r| helix.crossing_at_radius(r))
            else {
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
            let Ok(ap) = helix.approach(wire) else {
                continue;
            };
            let Some(hit) = WireHit::new(chamber, wire.id, ap.distance, 0.02) else {
                continue;
            };
            let hit = hit.with_flags(flags);
            if hit.is_axial() {
                axial.push(hit);
            } else {
                stereo.push(hit);
            }
        }
    }
    (axial, stereo)
}

fn bench_pipeline(c: &mut Criterion) {
    let chamber = ChamberLayout::default().build();
    let mut group = c.benchmark_group("pipeline");

    for n in [1, 5, 10, 20] {
        let (axial, stereo) = make_event(&chamber, n);
        group.bench_function(format!("{n}_tracks"), |b| {
            let mut pipeline = Pipeline::new(PipelineConfig::default());
            b.iter(|| black_box(pipeline.reconstruct(&axial, &stereo)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
