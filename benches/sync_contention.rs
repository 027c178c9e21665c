//! Mutex and semaphore benchmarks.
//!
//! - Uncontended acquire/release (fast path, no queueing)
//! - Handoff through a queue of N waiters (slow path)
//!
//! Run: `cargo bench --bench sync_contention`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use handoff::sync::{Mutex, Semaphore};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

fn poll_once<F: Future + Unpin>(future: &mut F) -> Option<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    match Pin::new(future).poll(&mut cx) {
        Poll::Ready(v) => Some(v),
        Poll::Pending => None,
    }
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync/uncontended");
    group.throughput(Throughput::Elements(1));

    let mutex = Mutex::new(0u64);
    group.bench_function("mutex_lock_release", |b| {
        b.iter(|| {
            let mut fut = mutex.lock();
            let mut guard = poll_once(&mut fut).expect("free mutex");
            *guard += 1;
            std::hint::black_box(&*guard);
        });
    });

    let sem = Semaphore::new(4).expect("capacity");
    group.bench_function("semaphore_acquire_release", |b| {
        b.iter(|| {
            let mut fut = sem.acquire();
            let permit = poll_once(&mut fut).expect("free permit");
            std::hint::black_box(permit);
        });
    });

    group.finish();
}

fn bench_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync/handoff");

    for waiters in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(waiters as u64));
        group.bench_with_input(BenchmarkId::new("mutex", waiters), &waiters, |b, &n| {
            let mutex = Mutex::new(());
            b.iter(|| {
                let holder = mutex.try_lock().expect("free mutex");
                let mut queue: Vec<_> = (0..n).map(|_| mutex.lock()).collect();
                for fut in &mut queue {
                    assert!(poll_once(fut).is_none());
                }
                drop(holder);
                for fut in &mut queue {
                    let guard = poll_once(fut).expect("handed off");
                    std::hint::black_box(guard);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_handoff);
criterion_main!(benches);
