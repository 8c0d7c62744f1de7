//! Chain construction and settlement throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use promitto::{new_promise, Value};

fn settled_chain(c: &mut Criterion) {
    c.bench_function("chain_100_continuations_presettled", |b| {
        b.iter(|| {
            let chain = new_promise(|defer| defer.resolve(0_i64));
            for _ in 0..100 {
                chain.then(|x: i64| x + 1);
            }
            black_box(chain)
        });
    });
}

fn deferred_chain(c: &mut Criterion) {
    c.bench_function("chain_100_continuations_deferred", |b| {
        b.iter(|| {
            let chain = new_promise(|_defer| ());
            for _ in 0..100 {
                chain.then(|value: Value| value);
            }
            chain.resolve(0_i64);
            black_box(chain)
        });
    });
}

criterion_group!(benches, settled_chain, deferred_chain);
criterion_main!(benches);
