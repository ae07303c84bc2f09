// Rate limiter and queue throughput benchmarks
//
// Key metrics measured:
// - Admission decision latency for one hot identity and for many identities
// - Contended decisions across threads sharing one store
// - In-memory enqueue/claim/ack cycle
//
// Usage:
//   cargo bench --bench rate_limiter

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::{Duration, Instant};
use taskgate::identity::Identity;
use taskgate::queue::{LocalQueue, Task, TaskQueue};
use taskgate::rate_limit::{RateLimitConfig, RateLimiter};
use tokio::runtime::Runtime;

fn bench_single_identity(c: &mut Criterion) {
    let limiter = RateLimiter::in_memory(&RateLimitConfig::default());
    let identity = Identity::parse("hot-user").unwrap();
    let start = Instant::now();
    let mut offset = 0u64;

    c.bench_function("decide_single_identity", |b| {
        b.iter(|| {
            offset += 1;
            black_box(limiter.decide(&identity, start + Duration::from_micros(offset)))
        })
    });
}

fn bench_many_identities(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_many_identities");
    for count in [100usize, 10_000] {
        let limiter = RateLimiter::in_memory(&RateLimitConfig::default());
        let identities: Vec<Identity> = (0..count)
            .map(|i| Identity::parse(format!("user-{i}")).unwrap())
            .collect();
        let now = Instant::now();
        let mut next = 0usize;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                next = (next + 1) % identities.len();
                black_box(limiter.decide(&identities[next], now))
            })
        });
    }
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let limiter = RateLimiter::in_memory(&RateLimitConfig::default());
    let identity = Identity::parse("shared").unwrap();

    c.bench_function("decide_contended_4_threads", |b| {
        b.iter(|| {
            let now = Instant::now();
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        for _ in 0..64 {
                            black_box(limiter.decide(&identity, now));
                        }
                    });
                }
            });
        })
    });
}

fn bench_queue_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let queue = LocalQueue::in_memory();
    let identity = Identity::parse("bench").unwrap();

    c.bench_function("queue_enqueue_claim_ack", |b| {
        b.iter(|| {
            rt.block_on(async {
                queue
                    .enqueue(Task::new(identity.clone(), Utc::now()))
                    .await
                    .unwrap();
                let delivery = queue.dequeue().await.unwrap();
                queue.ack(&delivery).await.unwrap();
            })
        })
    });
}

criterion_group!(
    benches,
    bench_single_identity,
    bench_many_identities,
    bench_contended,
    bench_queue_cycle
);
criterion_main!(benches);
