//! Concurrent load against a shared pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backend_balancer::health::ErrorKind;
use backend_balancer::load_balancer::BackendPool;
use backend_balancer::resilience::FallbackOutcome;

mod common;

const WORKERS: usize = 8;
const REQUESTS: usize = 100;

/// Run `REQUESTS` requests across `WORKERS` tasks. Every fifth request
/// fails once and goes through fallback. Returns the peak in-flight count.
async fn run_load(pool: Arc<BackendPool>) -> usize {
    let next = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..WORKERS {
        let pool = pool.clone();
        let next = next.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let mut served = 0;
            loop {
                let n = next.fetch_add(1, Ordering::SeqCst);
                if n >= REQUESTS {
                    break;
                }

                let mut session = pool.select().unwrap();
                assert!(pool.backends()[session.backend_index()].load() >= 1);
                peak.fetch_max(pool.in_flight(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_micros(200)).await;

                if n % 5 == 0 {
                    match pool.fallback(session, ErrorKind::Reset).unwrap() {
                        FallbackOutcome::Retry(retry) => session = retry,
                        other => panic!("four alive backends must allow a retry, got {other:?}"),
                    }
                    tokio::task::yield_now().await;
                }
                pool.finished(session).unwrap();
                served += 1;
            }
            served
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }
    assert_eq!(total, REQUESTS);
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_round_robin_conserves_load() {
    let pool = common::round_robin_pool(4);
    let start = Instant::now();

    let peak = run_load(pool.clone()).await;

    println!(
        "\n{} requests over {} workers in {:?}, peak in flight {}",
        REQUESTS,
        WORKERS,
        start.elapsed(),
        peak
    );
    assert!(peak <= WORKERS);
    assert_eq!(pool.total_load(), 0);
    assert_eq!(pool.in_flight(), 0);
    assert!(pool.backends().iter().all(|b| b.load() == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_least_loaded_conserves_load() {
    let pool = common::least_loaded_pool(4);
    let peak = run_load(pool.clone()).await;

    assert!(peak <= WORKERS);
    assert_eq!(pool.total_load(), 0);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_teardown_during_load_releases_after_drain() {
    let handles = common::targets(4);
    let pool = common::build(
        &handles,
        Box::new(backend_balancer::load_balancer::RoundRobin::new()),
        Default::default(),
    );
    let sessions: Vec<_> = (0..WORKERS).map(|_| pool.select().unwrap()).collect();

    pool.teardown();
    assert!(handles.iter().all(|h| h.holders() == 1));

    let mut tasks = Vec::new();
    for session in sessions {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.finished(session).unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(pool.is_released());
    assert!(handles.iter().all(|h| h.holders() == 0));
}
