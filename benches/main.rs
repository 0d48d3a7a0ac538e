use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

#[cfg(feature = "mock_test")]
pub mod mock_bench;

pub fn bench_main(_c: &mut Criterion) {
    cfg_if::cfg_if! {
        if #[cfg(feature = "mock_test")] {
            mock_bench::bench(_c);
        } else {
            eprintln!("ERROR: Benchmarks in cmtk require the mock_test feature to run.");
            eprintln!("  Rerun with `cargo bench --features mock_test`.");
            std::process::exit(1);
        }
    }
}

criterion_group!(benches, bench_main);
criterion_main!(benches);
