//! Benchmarks the synchronous, non-I/O-bound parts of the engine:
//! pipeline validation and the allow-list lookup, both on the hot path
//! of every `execute_pipeline` call before any subprocess or tool
//! invocation begins.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mcsh::allowlist;
use mcsh::pipeline::{Pipeline, Stage};

fn sample_pipeline(stage_count: usize) -> Pipeline {
    let mut stages = Vec::with_capacity(stage_count);
    for i in 0..stage_count {
        stages.push(Stage::Command {
            command: "jq".to_string(),
            args: vec![".".to_string()],
            for_each: false,
            save_to: Some(format!("stage_{i}")),
        });
    }
    stages.push(Stage::ReadBuffers {
        buffers: (0..stage_count).map(|i| format!("stage_{i}")).collect(),
    });
    Pipeline {
        stages,
        initial_input: Some("{\"a\":1}".to_string()),
    }
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_validate");
    for stage_count in [1usize, 8, 32, 128] {
        let pipeline = sample_pipeline(stage_count);
        group.bench_function(format!("{stage_count}_stages"), |b| {
            b.iter(|| black_box(&pipeline).validate())
        });
    }
    group.finish();
}

fn bench_allowlist_lookup(c: &mut Criterion) {
    c.bench_function("allowlist_contains_hit", |b| {
        b.iter(|| allowlist::contains(black_box("jq")))
    });
    c.bench_function("allowlist_contains_miss", |b| {
        b.iter(|| allowlist::contains(black_box("rm")))
    });
}

criterion_group!(benches, bench_validate, bench_allowlist_lookup);
criterion_main!(benches);
