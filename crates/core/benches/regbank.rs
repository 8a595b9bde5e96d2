// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use robowired_core::board::{Dev, Soc};
use robowired_core::peripherals::timer;

fn bench_mmio_dispatch(c: &mut Criterion) {
    let mut soc = Soc::new();
    soc.write(Dev::Tim2, timer::ARR, 999, 4);

    c.bench_function("timer_ccr1_write", |b| {
        b.iter(|| {
            soc.write(Dev::Tim3, timer::CCR1, black_box(9_000), 4);
        })
    });

    c.bench_function("timer_cnt_read", |b| {
        b.iter(|| black_box(soc.read(Dev::Tim2, timer::CNT, 4)))
    });
}

criterion_group!(benches, bench_mmio_dispatch);
criterion_main!(benches);
