use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use iq_slurper::{
    block::{interleave, Sample, SampleBlock},
    f_engine::{blackman_harris, SpectrumEngine},
    fanout::Fanout,
    monitoring::{DisplayConfig, SpectrumSink},
    DEFAULT_BLOCK_LEN, DEFAULT_FFT_SIZE,
};
use rand::prelude::*;

fn random_samples(rng: &mut impl Rng, n: usize) -> Vec<Sample> {
    (0..n)
        .map(|_| Sample::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let window = random_samples(&mut rng, DEFAULT_FFT_SIZE);
    let block = SampleBlock::new(0, 0, 1e6, 868e6, random_samples(&mut rng, DEFAULT_BLOCK_LEN));

    // Containers
    let mut engine = SpectrumEngine::new(DEFAULT_FFT_SIZE);
    let mut power = Vec::with_capacity(DEFAULT_FFT_SIZE);
    let mut flat = Vec::with_capacity(DEFAULT_BLOCK_LEN * 2);

    c.bench_function("blackman harris window", |b| {
        b.iter(|| blackman_harris::<f32>(black_box(DEFAULT_FFT_SIZE)))
    });

    c.bench_function("power spectrum", |b| {
        b.iter(|| engine.power_db(black_box(&window), black_box(&mut power)))
    });

    c.bench_function("interleave block", |b| {
        b.iter(|| interleave(black_box(&block.samples), black_box(&mut flat)))
    });

    c.bench_function("spectrum sink consume", |b| {
        let mut sink = SpectrumSink::new(DisplayConfig::default());
        // Pinned clock, so after the first snapshot this is the hold-off path
        let now = Instant::now();
        b.iter(|| sink.consume_at(black_box(&block), now))
    });

    c.bench_function("fanout publish", |b| {
        let mut fanout = Fanout::new();
        let _file = fanout.subscribe("exfil", 16);
        let _spectrum = fanout.subscribe("spectrum", 16);
        b.iter(|| fanout.publish(black_box(block.clone())))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
