// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the per-submission work done on the request path
// in the weighbridge-print crate: fingerprinting and name handling.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use weighbridge_print::archive::{numbered_name, sanitize_document_name};
use weighbridge_print::digest::hash_bytes;

fn bench_content_hash(c: &mut Criterion) {
    let slip = vec![0x25u8; 64 * 1024];
    let large = vec![0xABu8; 1024 * 1024];

    c.bench_function("hash_bytes (64 KiB weigh slip)", |b| {
        b.iter(|| hash_bytes(black_box(&slip)))
    });

    c.bench_function("hash_bytes (1 MiB)", |b| {
        b.iter(|| hash_bytes(black_box(&large)))
    });
}

fn bench_names(c: &mut Criterion) {
    c.bench_function("sanitize_document_name (windows path)", |b| {
        b.iter(|| sanitize_document_name(black_box(r"C:\Users\yard\Desktop\ticket 0042")))
    });

    c.bench_function("numbered_name (collision 12)", |b| {
        b.iter(|| numbered_name(black_box("report.pdf"), black_box(12)))
    });
}

criterion_group!(benches, bench_content_hash, bench_names);
criterion_main!(benches);
