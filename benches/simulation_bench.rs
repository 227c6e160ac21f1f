//! Criterion benchmarks for the fabric model
//!
//! Run with: cargo bench --bench simulation_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use adatface_fabric::bundle::BundleMultiplexer;
use adatface_fabric::fifo::async_fifo;
use adatface_fabric::{ChannelSample, InterfaceConfig, Simulation};

const BUNDLE_COUNTS: &[usize] = &[1, 2, 4];

// ============================================================================
// Whole fabric
// ============================================================================

fn bench_microframe(c: &mut Criterion) {
    let mut group = c.benchmark_group("Simulation");
    group.sample_size(20);

    for &bundles in BUNDLE_COUNTS {
        let mut config = InterfaceConfig::default();
        config.channels.no_bundles = bundles;
        let mut sim = Simulation::new(&config).expect("valid config");
        // past the host start delay
        sim.run_for_us(1000);

        group.bench_with_input(BenchmarkId::new("microframe", bundles), &bundles, |b, _| {
            b.iter(|| {
                sim.run_for_us(125);
                black_box(sim.now_fs())
            })
        });
    }

    let mut config = InterfaceConfig::default();
    config.channels.dual_device = true;
    let mut sim = Simulation::new(&config).expect("valid config");
    sim.run_for_us(1000);
    group.bench_function("microframe_dual_device", |b| {
        b.iter(|| {
            sim.run_for_us(125);
            black_box(sim.now_fs())
        })
    });

    group.finish();
}

// ============================================================================
// Stages
// ============================================================================

fn bench_async_fifo(c: &mut Criterion) {
    c.bench_function("async_fifo_1k_words", |b| {
        let (mut writer, mut reader) = async_fifo::<u64>(1024);
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..1024u64 {
                writer.push(i);
                writer.clock();
                reader.clock();
                sum += reader.pop().unwrap_or(0);
            }
            black_box(sum)
        })
    });
}

fn bench_multiplexer(c: &mut Criterion) {
    c.bench_function("multiplexer_32_channels", |b| {
        let mut mux = BundleMultiplexer::new(4);
        for bundle in 0..4 {
            mux.set_active(bundle, true);
        }
        b.iter(|| {
            let mut taken = 0;
            for bundle in 0..4 {
                for ch in 0..8u8 {
                    mux.push(bundle, ChannelSample::new(ch as u32, ch, 8));
                }
            }
            for _ in 0..64 {
                if mux.clock(true).is_some() {
                    taken += 1;
                }
            }
            black_box(taken)
        })
    });
}

criterion_group!(benches, bench_microframe, bench_async_fifo, bench_multiplexer);
criterion_main!(benches);
