// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for redaction and canonical hashing of receipt payloads.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use moat_redact::{canonical_json, hash_redacted, redact_body};
use serde_json::{Value, json};
use std::collections::BTreeSet;

fn nested_payload(depth: usize, width: usize) -> Value {
    let mut value = json!({"api_key": "sk-secret", "data": "leaf"});
    for level in 0..depth {
        let mut object = serde_json::Map::new();
        for i in 0..width {
            object.insert(format!("field_{level}_{i}"), value.clone());
        }
        object.insert("token".to_string(), json!("hidden"));
        value = Value::Object(object);
    }
    value
}

fn bench_redaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("redact_body");
    let extra = BTreeSet::new();

    for depth in [1usize, 3, 5] {
        let payload = nested_payload(depth, 4);
        group.bench_with_input(BenchmarkId::new("depth", depth), &payload, |b, p| {
            b.iter(|| redact_body(black_box(p), &extra));
        });
    }

    group.finish();
}

fn bench_canonical_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_redacted");
    let extra = BTreeSet::new();

    for depth in [1usize, 3, 5] {
        let payload = nested_payload(depth, 4);
        group.bench_with_input(BenchmarkId::new("depth", depth), &payload, |b, p| {
            b.iter(|| hash_redacted(black_box(p), &extra));
        });
    }

    group.bench_function("canonical_json_flat_1k_keys", |b| {
        let mut object = serde_json::Map::new();
        for i in 0..1_000 {
            object.insert(format!("key_{i:04}"), json!(i));
        }
        let payload = Value::Object(object);
        b.iter(|| canonical_json(black_box(&payload)));
    });

    group.finish();
}

criterion_group!(benches, bench_redaction, bench_canonical_hash);
criterion_main!(benches);
