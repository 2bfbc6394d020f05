//! Per-block cost of the packed state vector
//!
//! Every block snapshots the vector and most filters read or write a few
//! states, so these sit on the processing hot path.

use bci_core::{State, StateList, StateVector};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn state_list(count: usize, width: u32) -> StateList {
    let mut list = StateList::new();
    for i in 0..count {
        list.add(State::new(&format!("State{}", i), width, 0).expect("state"))
            .expect("add");
    }
    list
}

/// Benchmark snapshotting vectors of increasing size
fn bench_begin_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_begin_block");

    for &count in &[4, 32, 256] {
        let mut vector = StateVector::new(&state_list(count, 16));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                vector.begin_block();
                black_box(vector.as_bytes().len())
            });
        });
    }

    group.finish();
}

/// Benchmark unaligned read/write across widths
fn bench_set_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_set_value");

    for &width in &[1u32, 7, 16, 33] {
        let mut vector = StateVector::new(&state_list(8, width));
        let max = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
        group.bench_with_input(BenchmarkId::new("width", width), &width, |b, _| {
            b.iter(|| {
                vector.set_value("State5", black_box(max)).expect("set");
                black_box(vector.value("State5").expect("get"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_begin_block, bench_set_value);
criterion_main!(benches);
