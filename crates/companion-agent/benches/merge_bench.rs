// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the hot paths of a change batch: merging a remote
// device snapshot and decoding a print job event.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use companion_agent::dispatch::decode_print_job;
use companion_agent::merge::merge_remote;
use companion_core::types::{DetectedPrinter, DeviceState, DocumentClass, Tray};
use companion_store::{ChangeEvent, Document};

fn configured_state() -> DeviceState {
    let mut state = DeviceState::new("bench-agent");
    state.bay.name = "Bay 4".into();
    for (n, class) in DocumentClass::ALL.into_iter().enumerate() {
        let target = state.printers.get_mut(class);
        target.name = format!("Printer {n}");
        target.reference = format!("printer-{n}");
        target.tray = "Tray 1".into();
    }
    state.available_printers = (0..16)
        .map(|n| DetectedPrinter {
            name: format!("printer-{n}"),
            trays: vec![Tray { name: "Tray 1".into() }, Tray { name: "Tray 2".into() }],
        })
        .collect();
    state
}

fn bench_merge_remote(c: &mut Criterion) {
    let remote = configured_state();

    c.bench_function("merge_remote (no change)", |b| {
        let mut local = remote.clone();
        b.iter(|| merge_remote(black_box(&mut local), black_box(&remote)))
    });

    c.bench_function("merge_remote (fresh state)", |b| {
        b.iter(|| {
            let mut local = DeviceState::new("bench-agent");
            merge_remote(black_box(&mut local), black_box(&remote))
        })
    });
}

fn bench_decode_print_job(c: &mut Criterion) {
    let printers = configured_state().printers;
    let event = ChangeEvent::added(Document::new(
        "CompanionApps/bench-agent/PrintJobs/job-1",
        json!({
            "printer_type": "label_small",
            "quantity": "2",
            "created": 1_700_000_000,
            "url": "https://files.example.com/label.pdf",
        }),
    ));

    c.bench_function("decode_print_job", |b| {
        b.iter(|| decode_print_job(black_box(&event), black_box(&printers)))
    });
}

criterion_group!(benches, bench_merge_remote, bench_decode_print_job);
criterion_main!(benches);
