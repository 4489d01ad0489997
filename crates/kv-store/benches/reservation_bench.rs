use criterion::{Criterion, criterion_group, criterion_main};
use kv_store::{InMemoryKeyValueStore, KeyValueStore};

fn counter_keys(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("product:{i}:inventory:{i}"))
        .collect()
}

fn bench_reserve_single_key(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryKeyValueStore::new();
    let keys = counter_keys(1);

    rt.block_on(async {
        store.set(&keys[0], &i64::MAX.to_string(), None).await.unwrap();
    });

    c.bench_function("kv_store/reserve_single_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.reserve_all(&keys, &[1]).await.unwrap();
            });
        });
    });
}

fn bench_reserve_ten_keys(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryKeyValueStore::new();
    let keys = counter_keys(10);
    let quantities = vec![1; 10];

    rt.block_on(async {
        for key in &keys {
            store.set(key, &i64::MAX.to_string(), None).await.unwrap();
        }
    });

    c.bench_function("kv_store/reserve_ten_keys", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.reserve_all(&keys, &quantities).await.unwrap();
            });
        });
    });
}

fn bench_reserve_insufficient(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryKeyValueStore::new();
    let keys = counter_keys(10);
    let quantities = vec![1; 10];

    // Last counter is empty so every attempt fails the check
    rt.block_on(async {
        for key in &keys[..9] {
            store.set(key, "1000", None).await.unwrap();
        }
        store.set(&keys[9], "0", None).await.unwrap();
    });

    c.bench_function("kv_store/reserve_insufficient", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.reserve_all(&keys, &quantities).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_single_key,
    bench_reserve_ten_keys,
    bench_reserve_insufficient
);
criterion_main!(benches);
