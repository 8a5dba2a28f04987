use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use orbitfit::{OftiSampler, OftiSettings, PtSampler, PtSettings, StepSampler, System, SystemConfig};
use rand::SeedableRng;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{observations, KeplerModel};

fn make_system(num_rows: usize) -> System<KeplerModel> {
    let config = SystemConfig::new(1, 1.8, 51.44).with_mass_err(0.1);
    System::new(config, observations(num_rows), KeplerModel::default()).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    for num_rows in [7, 100] {
        let system = make_system(num_rows);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        let full = system.parameters().draw(&mut rng);
        c.bench_function(&format!("log posterior {num_rows} rows"), |b| {
            b.iter(|| system.log_posterior(black_box(&full)))
        });
    }

    let system = make_system(7);
    c.bench_function("ofti 1000 orbits", |b| {
        b.iter_batched(
            || {
                let settings = OftiSettings {
                    num_orbits: 1000,
                    batch_size: 5000,
                    seed: 42,
                    ..OftiSettings::default()
                };
                OftiSampler::new(&system, settings).unwrap()
            },
            |sampler| sampler.run().unwrap(),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("mcmc 10 steps 2x100 walkers", |b| {
        b.iter_batched(
            || {
                let settings = PtSettings {
                    num_temps: 2,
                    num_walkers: 100,
                    num_orbits: 1000,
                    seed: 42,
                    ..PtSettings::default()
                };
                PtSampler::new(&system, settings).unwrap()
            },
            |sampler| sampler.run().unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
