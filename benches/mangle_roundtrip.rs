//! Mangling round-trip benchmarks
//!
//! The demangler runs once per launch-site symbol of the host binary, so its
//! throughput bounds extraction time on large hosts.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use zhc::abi::{demangle_config, mangle_config, AbiValue, Kernel, KernelConfig, Overload, PointerSize};

fn deep_config() -> KernelConfig {
    let u64t = AbiValue::uint(64).unwrap();
    let slice = AbiValue::pointer(PointerSize::Slice, false, 8, AbiValue::array(16, u64t.clone()));
    KernelConfig::new(
        Kernel::new("stencil_update"),
        Overload::new(vec![
            AbiValue::sint(64).unwrap(),
            AbiValue::runtime(slice).unwrap(),
            AbiValue::runtime(AbiValue::pointer(PointerSize::Many, true, 4, AbiValue::float(32).unwrap())).unwrap(),
            AbiValue::const_int(-123456789i64),
            AbiValue::runtime(u64t).unwrap(),
        ])
        .unwrap(),
    )
}

fn bench_mangle(c: &mut Criterion) {
    let config = deep_config();
    c.bench_function("mangle_config", |b| {
        b.iter(|| mangle_config(black_box(&config)));
    });
}

fn bench_demangle(c: &mut Criterion) {
    let mangled = mangle_config(&deep_config());
    c.bench_function("demangle_config", |b| {
        b.iter(|| demangle_config(black_box(&mangled)).unwrap());
    });
}

fn bench_roundtrip(c: &mut Criterion) {
    let config = deep_config();
    c.bench_function("mangle_demangle_roundtrip", |b| {
        b.iter(|| {
            let mangled = mangle_config(black_box(&config));
            demangle_config(&mangled).unwrap()
        });
    });
}

criterion_group!(benches, bench_mangle, bench_demangle, bench_roundtrip);
criterion_main!(benches);
