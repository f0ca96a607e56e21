//! Throughput Benchmark for kvkit
//!
//! Measures the embedded store's primitives, reply decoding, and the
//! components running on top of the embedded store.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use kvkit::protocol::{Command, ReplyDecoder};
use kvkit::{Cache, Lock, MemoryStore, Queue, RateLimiter, SetOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark the store primitives the components are built on
fn bench_primitives(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    for i in 0..100_000 {
        store.set_value(
            &format!("key:{}", i),
            Bytes::from(format!("value:{}", i)),
            SetOptions::new(),
        );
    }

    let mut group = c.benchmark_group("primitives");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get_value(&format!("key:{}", i % 100_000)).unwrap());
            i += 1;
        });
    });

    group.bench_function("set_nx_px", |b| {
        let mut i = 0u64;
        let options = SetOptions::new()
            .if_absent()
            .expire_in(Duration::from_secs(3600));
        b.iter(|| {
            black_box(store.set_value(&format!("nx:{}", i), Bytes::from("token"), options));
            i += 1;
        });
    });

    group.bench_function("incr_single_counter", |b| {
        b.iter(|| {
            black_box(store.incr_value_by("counter", 1).unwrap());
        });
    });

    group.bench_function("delete_if_equals_miss", |b| {
        b.iter(|| {
            black_box(store.delete_value_if_equals("key:1", b"other"));
        });
    });

    group.finish();
}

/// Benchmark list push / pop
fn bench_lists(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());

    let mut group = c.benchmark_group("lists");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush_lpop", |b| {
        let value = Bytes::from("x".repeat(256));
        b.iter(|| {
            store.rpush_values("queue:bench", vec![value.clone()]).unwrap();
            black_box(store.lpop_value("queue:bench").unwrap());
        });
    });

    group.finish();
}

/// Benchmark decoding replies as they arrive from a server
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let bulk = Command::new("SET")
        .arg("k")
        .arg(Bytes::from("x".repeat(1024)))
        .to_resp()
        .serialize();
    group.throughput(Throughput::Bytes(bulk.len() as u64));
    group.bench_function("array_1kb", |b| {
        let mut decoder = ReplyDecoder::new();
        b.iter(|| {
            let mut buffer = BytesMut::from(&bulk[..]);
            black_box(decoder.decode(&mut buffer).unwrap());
        });
    });

    group.finish();
}

/// Benchmark the components end to end over the embedded store
fn bench_components(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(MemoryStore::new());

    let mut group = c.benchmark_group("components");
    group.throughput(Throughput::Elements(1));

    let cache = Cache::new(store.clone());
    let square = cache.wrap("square", Duration::from_secs(3600), |n: u64| async move { n * n });
    rt.block_on(square.call(7)).unwrap();
    group.bench_function("cache_hit", |b| {
        b.iter(|| black_box(rt.block_on(square.call(7)).unwrap()));
    });

    let lock = Lock::new(store.clone(), "bench", Duration::from_secs(10));
    group.bench_function("lock_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                if let Some(guard) = lock.try_acquire().await.unwrap() {
                    black_box(guard.release().await.unwrap());
                }
            })
        });
    });

    let queue = Queue::new(store.clone(), "bench");
    group.bench_function("queue_roundtrip", |b| {
        b.iter(|| {
            rt.block_on(async {
                queue.enqueue(&("job", 42)).await.unwrap();
                let job: Option<(String, u32)> = queue.dequeue(Duration::from_secs(1)).await.unwrap();
                black_box(job);
            })
        });
    });

    let limiter = RateLimiter::new(store.clone(), "bench", u64::MAX, Duration::from_secs(3600));
    group.bench_function("rate_limiter_allowed", |b| {
        b.iter(|| black_box(rt.block_on(limiter.is_allowed("client")).unwrap()));
    });

    group.finish();
}

/// Benchmark lock contention across threads
fn bench_contention(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("contention");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_incr", |b| {
        b.iter(|| {
            let store = Arc::new(MemoryStore::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            store.incr_value_by(&format!("rate:{}:{}", t, i % 100), 1).unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_primitives,
    bench_lists,
    bench_decode,
    bench_components,
    bench_contention,
);

criterion_main!(benches);
