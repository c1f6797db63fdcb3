use criterion::{criterion_group, criterion_main, Criterion};
use criterion_cycles_per_byte::CyclesPerByte;
use hierlib::config::HierarchyConfig;
use hierlib::memtracer::AccessType;
use hierlib::simulator::{write_record, Simulator};

/// Deterministic mixed fetch/load/store stream over a 4 MiB footprint
fn synthetic_trace(records: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(records * 40);
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    for i in 0..records {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let pc = 0x40_0000 + (i as u64 % 512) * 4;
        let addr = state & 0x3f_ffff;
        let (ty, bytes) = match state >> 62 {
            0 | 1 => (AccessType::Load, 8),
            2 => (AccessType::Store, 8),
            _ => (AccessType::Fetch, 4),
        };
        write_record(&mut out, ty, pc, addr, bytes);
    }
    out
}

pub fn criterion_benchmark(c: &mut Criterion<CyclesPerByte>) {
    let trace = synthetic_trace(50_000);
    let configs = [
        ("random", "64:4:64"),
        ("linear", "64:4:64:linear"),
        ("hawkeye", "64:4:64:hawkeye"),
        ("fully_associative", "1:64:64"),
    ];
    for (label, geometry) in configs {
        let config = HierarchyConfig {
            icache: Some(geometry.to_string()),
            dcache: Some(geometry.to_string()),
            l2: Some("256:8:64".to_string()),
            log: false,
        };
        let trace = trace.clone();
        c.bench_function(label, move |b| {
            let mut simulator = Simulator::new(&config).unwrap();
            b.iter(|| simulator.simulate(&trace).unwrap());
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default().significance_level(0.1).sample_size(10).with_measurement(CyclesPerByte);
    targets = criterion_benchmark
);
criterion_main!(benches);
