use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, SeedableRng};
use spikegrad_runtime::{
    poisson_spike_train, Bptt, ExpSynParams, GradientEngine, LeakyParams, LifParams, Network, Runner,
    WeightInit,
};

fn build_network(hidden: usize) -> Network {
    let syn = ExpSynParams {
        g_max: WeightInit::KaimingNormal { scale: 20.0 },
        ..Default::default()
    };
    Network::builder()
        .add_input("i", 100)
        .add_lif("r", hidden, LifParams::default())
        .add_leaky("o", 2, LeakyParams::new(5.0, 0.0).expect("bench readout params"))
        .connect("i2r", "i", "r", syn.clone())
        .connect("r2o", "r", "o", syn)
        .output("o")
        .build()
        .expect("bench network build")
}

fn bench_rollout(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollout");
    // Short rollouts to keep benches fast in CI
    let steps = 200;
    let batch = 32;
    let inputs = poisson_spike_train(&mut StdRng::seed_from_u64(1), batch, steps, 100, 5.0, 0.1)
        .expect("bench inputs");

    for &hidden in &[4usize, 32, 128] {
        let network = build_network(hidden);
        group.throughput(Throughput::Elements((batch * steps) as u64));
        group.bench_with_input(BenchmarkId::new("forward", hidden), &hidden, |b, _| {
            b.iter(|| Runner::new(&network).run(inputs.view(), true).unwrap());
        });
    }

    group.finish();
}

fn bench_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("bptt");
    let steps = 200;
    let batch = 32;
    let inputs = poisson_spike_train(&mut StdRng::seed_from_u64(2), batch, steps, 100, 5.0, 0.1)
        .expect("bench inputs");
    let labels: Vec<usize> = (0..batch).map(|b| b % 2).collect();

    for &hidden in &[4usize, 32] {
        let network = build_network(hidden);
        group.bench_with_input(BenchmarkId::new("value_and_grad", hidden), &hidden, |b, _| {
            b.iter(|| Bptt::new().value_and_grad(&network, inputs.view(), &labels).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rollout, bench_gradient);
criterion_main!(benches);
