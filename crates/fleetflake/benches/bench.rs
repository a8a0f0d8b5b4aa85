use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use fleetflake::{
    Generator, IdGenStatus, LockSnowflakeGenerator, MonotonicClock, NodeIdAllocator,
    ServiceCategory, StoreAllocator, StoreAllocatorConfig, TimeSource, node_id,
    store::MemoryStore,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: u64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

/// Hot path where every poll is `Ready`: one full millisecond of sequence.
fn bench_lock_generator(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock/fixed");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = LockSnowflakeGenerator::new(0, FixedMockTime { millis: 1 });
                for _ in 0..TOTAL_IDS {
                    match generator.poll_id() {
                        IdGenStatus::Ready { id } => {
                            black_box(id);
                        }
                        IdGenStatus::Pending { .. } => unreachable!(),
                    }
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Wall-clock generation, yielding whenever a millisecond runs dry.
fn bench_generator_yield(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator/wallclock");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let generator = Generator::new(node_id(ServiceCategory::User, 0).unwrap());
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(generator.generate_i64());
            }
        });
    });

    group.finish();
}

/// One generator shared by several threads.
fn bench_generator_contended(c: &mut Criterion) {
    for threads in [2, 4, 8] {
        let mut group = c.benchmark_group(format!("generator/threads/{threads}"));
        group.throughput(Throughput::Elements((TOTAL_IDS * threads) as u64));

        group.bench_function(format!("elems/{}", TOTAL_IDS * threads), |b| {
            b.iter_custom(|iters| {
                let clock = MonotonicClock::default();
                let start = Instant::now();
                for _ in 0..iters {
                    let node = node_id(ServiceCategory::Order, 1).unwrap();
                    let generator = Generator::with_time(node, clock.clone());
                    let barrier = Barrier::new(threads);
                    scope(|s| {
                        for _ in 0..threads {
                            s.spawn(|| {
                                barrier.wait();
                                for _ in 0..TOTAL_IDS {
                                    black_box(generator.next_id());
                                }
                            });
                        }
                    });
                }
                start.elapsed()
            });
        });

        group.finish();
    }
}

/// Claim-and-release round trip against the in-memory store.
fn bench_store_allocation(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let store = Arc::new(MemoryStore::new());
    let config = StoreAllocatorConfig {
        auto_renew: false,
        ..Default::default()
    };

    let mut group = c.benchmark_group("allocator/memory");
    group.bench_function("allocate_release", |b| {
        b.to_async(&rt).iter(|| {
            let allocator = StoreAllocator::new(store.clone(), config.clone()).unwrap();
            async move {
                let id = allocator
                    .allocate_node_id(ServiceCategory::Payment)
                    .await
                    .unwrap();
                allocator
                    .release_node_id(ServiceCategory::Payment, black_box(id))
                    .await
                    .unwrap();
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_lock_generator,
    bench_generator_yield,
    bench_generator_contended,
    bench_store_allocation
);
criterion_main!(benches);
