//! Append/catch-up latency benchmarks.

use criterion::{Criterion, criterion_group, criterion_main};
use shared_dict::{CreateMode, JsonSerializer, MapConfig, SharedMap};
use std::hint::black_box;

fn bench_config(name: &str, buffer_size: usize) -> MapConfig {
    MapConfig {
        name: Some(name.to_string()),
        create: CreateMode::MustCreate,
        buffer_size,
        auto_unlink: true,
        ..MapConfig::default()
    }
}

/// Benchmark `set` (append + catch-up) for different value sizes, large
/// enough buffer that no full dump is triggered mid-run.
fn bench_set_operations(c: &mut Criterion) {
    let mut map = SharedMap::new(bench_config("bench_shdict_set", 16 * 1024 * 1024)).unwrap();
    let codec = JsonSerializer;

    let small = "x".repeat(64);
    let medium = "x".repeat(1024);
    let large = "x".repeat(4096);

    c.bench_function("set_64_bytes", |b| {
        b.iter(|| {
            black_box(map.set(&codec, &"k".to_string(), &small).unwrap());
        });
    });

    c.bench_function("set_1k_bytes", |b| {
        b.iter(|| {
            black_box(map.set(&codec, &"k".to_string(), &medium).unwrap());
        });
    });

    c.bench_function("set_4k_bytes", |b| {
        b.iter(|| {
            black_box(map.set(&codec, &"k".to_string(), &large).unwrap());
        });
    });
}

/// Benchmark the unlocked fast-path `catch_up` check when nothing has
/// changed since the last call — the common case for a busy reader.
fn bench_idle_catch_up(c: &mut Criterion) {
    let mut writer = SharedMap::new(bench_config("bench_shdict_idle_writer", 65536)).unwrap();
    let codec = JsonSerializer;
    writer.set(&codec, &"seed".to_string(), &1i32).unwrap();

    let mut reader = SharedMap::new(MapConfig {
        name: Some("bench_shdict_idle_writer".to_string()),
        create: CreateMode::MustAttach,
        auto_unlink: false,
        ..MapConfig::default()
    })
    .unwrap();
    reader.apply_update().unwrap();

    c.bench_function("idle_catch_up", |b| {
        b.iter(|| {
            black_box(reader.apply_update().unwrap());
        });
    });
}

/// Benchmark a `get` that requires replaying a handful of pending
/// records rather than hitting the fast path.
fn bench_get_with_pending_records(c: &mut Criterion) {
    let mut writer = SharedMap::new(bench_config("bench_shdict_get", 16 * 1024 * 1024)).unwrap();
    let codec = JsonSerializer;
    for i in 0..1000 {
        writer.set(&codec, &format!("k{i}"), &i).unwrap();
    }

    c.bench_function("get_after_1000_sets", |b| {
        b.iter(|| {
            let value: Option<i32> = black_box(writer.get(&codec, &"k500".to_string()).unwrap());
            black_box(value);
        });
    });
}

criterion_group!(
    benches,
    bench_set_operations,
    bench_idle_catch_up,
    bench_get_with_pending_records
);
criterion_main!(benches);
