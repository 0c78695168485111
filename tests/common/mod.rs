//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use backend_balancer::config::Value;
use backend_balancer::health::ErrorKind;
use backend_balancer::load_balancer::{
    BackendPool, LeastLoaded, PoolSettings, RoundRobin, SelectionPolicy, TargetDescriptor,
    TargetHandle,
};
use backend_balancer::resilience::FallbackOutcome;

/// A fresh target handle named `name` pointing at `addr`.
pub fn target(name: &str, addr: &str) -> TargetHandle {
    TargetHandle::new(TargetDescriptor::parse(name, addr).unwrap())
}

/// `n` targets on distinct documentation addresses.
pub fn targets(n: usize) -> Vec<TargetHandle> {
    (0..n)
        .map(|i| target(&format!("b{}", i), &format!("http://192.0.2.{}:8080", i + 1)))
        .collect()
}

pub fn list(handles: &[TargetHandle]) -> Value {
    Value::List(handles.iter().cloned().map(Value::Target).collect())
}

pub fn build(
    handles: &[TargetHandle],
    policy: Box<dyn SelectionPolicy>,
    settings: PoolSettings,
) -> Arc<BackendPool> {
    BackendPool::build("test", 1, Some(&list(handles)), policy, settings).unwrap()
}

/// Round-robin pool over `n` fresh targets.
pub fn round_robin_pool(n: usize) -> Arc<BackendPool> {
    build(&targets(n), Box::new(RoundRobin::new()), PoolSettings::default())
}

pub fn least_loaded_pool(n: usize) -> Arc<BackendPool> {
    build(&targets(n), Box::new(LeastLoaded::new()), PoolSettings::default())
}

/// Settings where one connection failure takes a backend down.
pub fn fragile() -> PoolSettings {
    let mut settings = PoolSettings::default();
    settings.thresholds.failure_threshold = 1;
    settings
}

/// Settings with a backlog and a backend overloaded at two in-flight
/// requests, back to alive once idle.
pub fn with_backlog(capacity: usize) -> PoolSettings {
    let mut settings = PoolSettings::default();
    settings.thresholds.high_water = 2;
    settings.thresholds.low_water = 1;
    settings.backlog_capacity = capacity;
    settings
}

/// Take backend `index` down through a failed request. Needs a pool built
/// with a failure threshold of one.
pub fn knock_down(pool: &Arc<BackendPool>, index: usize) {
    let mut held = Vec::new();
    loop {
        let session = pool.select().unwrap();
        if session.backend_index() == index {
            match pool.fallback(session, ErrorKind::ConnectFailed).unwrap() {
                FallbackOutcome::Retry(next) => held.push(next),
                FallbackOutcome::Queued(_) | FallbackOutcome::Fail => {}
            }
            break;
        }
        held.push(session);
    }
    for session in held {
        pool.finished(session).unwrap();
    }
}

/// Start a backend that accepts connections and writes a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
