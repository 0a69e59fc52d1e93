//! Report encoding benchmarks
//!
//! The update loop encodes at most once per tick, so this mainly guards
//! against accidental allocation creeping into `encode`.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jsaux_rgbd::{encode, DesiredState, Effect, Rgb, ZONE_COUNT};

fn bench_encode(c: &mut Criterion) {
    let lit = DesiredState {
        power: true,
        effect: Effect::Breathing,
        speed: 3,
        brightness: 0.6,
        zones: [Rgb::new(255, 128, 0); ZONE_COUNT],
    };
    let dark = DesiredState { power: false, ..lit.clone() };

    c.bench_function("encode_lit", |b| b.iter(|| encode(black_box(&lit))));
    c.bench_function("encode_dark", |b| b.iter(|| encode(black_box(&dark))));
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
