use cacheservice::{CacheEngine, CacheEngineConfig};
use criterion::{criterion_group, criterion_main, Criterion};

fn criterion_benchmarks(c: &mut Criterion) {
    let engine = CacheEngine::start(
        "bench-node".to_string(),
        "127.0.0.1:0",
        vec![],
        CacheEngineConfig::default(),
    )
    .expect("cache engine starts");

    c.bench_function("cache put and get, single node", |b| {
        b.iter(|| {
            engine.put("mykey", b"value".to_vec());
            let value = engine.get("mykey");
            assert_eq!(value, Some(b"value".to_vec()));
        });
    });
}

criterion_group!(benches, criterion_benchmarks);
criterion_main!(benches);
