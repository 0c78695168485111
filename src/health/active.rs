//! Active health checking.
//!
//! # Responsibilities
//! - Periodically revisit Down backends
//! - Move them to DownRetry and run a probe
//! - Feed the verdict back to the pool, backing off on repeated failure

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Host;

use crate::config::HealthConfig;
use crate::health::state::BackendState;
use crate::load_balancer::{BackendPool, TargetHandle};
use crate::resilience::backoff::calculate_backoff;

/// Decides whether a target is reachable again.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &TargetHandle) -> bool;
}

/// Probe by opening a TCP connection to the target's host and port.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &TargetHandle) -> bool {
        let address = target.address();
        let host = match address.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return false,
        };
        let Some(port) = address.port_or_known_default() else {
            tracing::warn!(
                target = %target.name(),
                address = %address,
                "Probe skipped: no port for address"
            );
            return false;
        };

        match time::timeout(self.timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(
                    target = %target.name(),
                    error = %e,
                    "Probe failed: connection error"
                );
                false
            }
            Err(_) => {
                tracing::warn!(target = %target.name(), "Probe failed: timeout");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ProbeSchedule {
    due: Instant,
    failures: u32,
}

/// Background task driving Down → DownRetry → Alive/Down for one pool.
///
/// Follows the pool slot across reloads and exits once the pool in the
/// slot is closed (removed from configuration).
pub struct HealthMonitor {
    pool: Arc<ArcSwap<BackendPool>>,
    prober: Arc<dyn Prober>,
    config: HealthConfig,
    schedule: HashMap<usize, ProbeSchedule>,
    generation: u64,
    updates: Option<watch::Receiver<HealthConfig>>,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<ArcSwap<BackendPool>>,
        prober: Arc<dyn Prober>,
        config: HealthConfig,
    ) -> Self {
        let generation = pool.load().generation();
        Self {
            pool,
            prober,
            config,
            schedule: HashMap::new(),
            generation,
            updates: None,
        }
    }

    /// Pick up `[health]` changes from config reloads.
    pub fn follow(mut self, updates: watch::Receiver<HealthConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.probe_interval_secs.max(1))
    }

    fn tick_period(&self) -> Duration {
        self.interval().min(Duration::from_secs(1))
    }

    fn reconfigure(&mut self, config: HealthConfig) {
        self.config = config;
        // Pending checks were spaced with the old interval
        self.schedule.clear();
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let pool_name = self.pool.load().name().to_string();
        tracing::info!(
            pool = %pool_name,
            interval = self.config.probe_interval_secs,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.check_all().await {
                        tracing::info!(pool = %pool_name, "Pool closed, health monitor exiting");
                        break;
                    }
                }
                Some(config) = next_config(&mut self.updates) => {
                    if !config.enabled {
                        tracing::info!(pool = %pool_name, "Health checks disabled by reload");
                        break;
                    }
                    tracing::info!(
                        pool = %pool_name,
                        interval = config.probe_interval_secs,
                        "Health settings updated"
                    );
                    self.reconfigure(config);
                    ticker = time::interval(self.tick_period());
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
                _ = shutdown.recv() => {
                    tracing::info!(
                        pool = %pool_name,
                        "Health monitor received shutdown signal, exiting loop"
                    );
                    break;
                }
            }
        }
    }

    /// One pass over the current pool. Returns false once it is closed.
    pub async fn check_all(&mut self) -> bool {
        let pool = self.pool.load_full();
        if pool.is_closed() {
            return false;
        }
        if pool.generation() != self.generation {
            self.schedule.clear();
            self.generation = pool.generation();
        }

        let now = Instant::now();
        let interval = self.interval();

        for index in 0..pool.len() {
            match pool.backends()[index].state() {
                BackendState::Alive | BackendState::Overloaded => {
                    self.schedule.remove(&index);
                }
                BackendState::Down => {
                    let entry = self.schedule.entry(index).or_insert(ProbeSchedule {
                        due: now + interval,
                        failures: 0,
                    });
                    if entry.due > now {
                        continue;
                    }
                    if pool.begin_probe(index).is_some() {
                        self.probe(&pool, index).await;
                    }
                }
                BackendState::DownRetry => {
                    self.probe(&pool, index).await;
                }
            }
        }
        true
    }

    async fn probe(&mut self, pool: &Arc<BackendPool>, index: usize) {
        let target = pool.backends()[index].handle().clone();
        let timeout = Duration::from_secs(self.config.probe_timeout_secs.max(1));
        let healthy = time::timeout(timeout, self.prober.probe(&target))
            .await
            .unwrap_or(false);
        pool.report_probe(index, healthy);

        if healthy {
            self.schedule.remove(&index);
            return;
        }

        let base_ms = self.interval().as_millis() as u64;
        let max_ms = self.config.max_probe_backoff_secs.saturating_mul(1000).max(base_ms);
        let now = Instant::now();
        let entry = self.schedule.entry(index).or_insert(ProbeSchedule {
            due: now,
            failures: 0,
        });
        entry.failures += 1;
        let delay = calculate_backoff(entry.failures, base_ms, max_ms);
        entry.due = now + delay;

        tracing::debug!(
            pool = %pool.name(),
            backend = index,
            failures = entry.failures,
            next_probe = ?delay,
            "Backend still down"
        );
    }
}

/// Next `[health]` section from the reload channel. Never resolves once the
/// sender is gone or when no channel is attached.
async fn next_config(updates: &mut Option<watch::Receiver<HealthConfig>>) -> Option<HealthConfig> {
    let rx = updates.as_mut()?;
    if rx.changed().await.is_err() {
        *updates = None;
        return None;
    }
    Some(rx.borrow_and_update().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Value;
    use crate::health::ErrorKind;
    use crate::lifecycle::Shutdown;
    use crate::load_balancer::{PoolSettings, RoundRobin, TargetDescriptor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProber {
        healthy: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, _target: &TargetHandle) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn down_pool() -> Arc<ArcSwap<BackendPool>> {
        let targets = (0..2)
            .map(|i| {
                let addr = format!("http://127.0.0.1:{}", 7100 + i);
                let descriptor = TargetDescriptor::parse(&format!("b{}", i), &addr).unwrap();
                Value::Target(TargetHandle::new(descriptor))
            })
            .collect();
        let mut settings = PoolSettings::default();
        settings.thresholds.failure_threshold = 1;
        let pool = BackendPool::build(
            "web",
            1,
            Some(&Value::List(targets)),
            Box::new(RoundRobin::new()),
            settings,
        )
        .unwrap();
        pool.report_error(0, ErrorKind::ConnectFailed);
        assert_eq!(pool.backends()[0].state(), BackendState::Down);
        Arc::new(ArcSwap::new(pool))
    }

    fn config() -> HealthConfig {
        HealthConfig {
            probe_interval_secs: 10,
            max_probe_backoff_secs: 60,
            ..HealthConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_cycle() {
        let slot = down_pool();
        let prober = Arc::new(FakeProber::default());
        let mut monitor = HealthMonitor::new(slot.clone(), prober.clone(), config());

        // First sighting only schedules the probe
        assert!(monitor.check_all().await);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(10)).await;
        monitor.check_all().await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.load().backends()[0].state(), BackendState::Down);

        // Backoff: not due again within the base interval
        time::advance(Duration::from_secs(5)).await;
        monitor.check_all().await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        prober.healthy.store(true, Ordering::SeqCst);
        time::advance(Duration::from_secs(10)).await;
        monitor.check_all().await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(slot.load().backends()[0].state(), BackendState::Alive);
        assert_eq!(slot.load().backends()[0].consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alive_backends_are_not_probed() {
        let slot = down_pool();
        let prober = Arc::new(FakeProber::default());
        let mut monitor = HealthMonitor::new(slot, prober.clone(), config());

        for _ in 0..5 {
            monitor.check_all().await;
            time::advance(Duration::from_secs(10)).await;
        }
        // Only backend 0 is down; each probe fails and backs off
        assert!(prober.calls.load(Ordering::SeqCst) >= 1);
        assert!(prober.calls.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_pool_closed() {
        let slot = down_pool();
        let prober = Arc::new(FakeProber::default());
        let mut monitor = HealthMonitor::new(slot.clone(), prober, config());
        slot.load().teardown();
        assert!(!monitor.check_all().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let slot = down_pool();
        let monitor = HealthMonitor::new(slot, Arc::new(FakeProber::default()), config());
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

        time::advance(Duration::from_secs(3)).await;
        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_applies_reloaded_interval() {
        let slot = down_pool();
        let prober = Arc::new(FakeProber::default());
        let slow = HealthConfig {
            probe_interval_secs: 600,
            max_probe_backoff_secs: 600,
            ..HealthConfig::default()
        };
        let (tx, rx) = watch::channel(slow.clone());
        let monitor = HealthMonitor::new(slot, prober.clone(), slow).follow(rx);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);

        tx.send_replace(HealthConfig {
            probe_interval_secs: 1,
            max_probe_backoff_secs: 1,
            ..HealthConfig::default()
        });
        time::sleep(Duration::from_secs(5)).await;
        assert!(prober.calls.load(Ordering::SeqCst) >= 1);

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_reload_disables_checks() {
        let slot = down_pool();
        let (tx, rx) = watch::channel(config());
        let prober = Arc::new(FakeProber::default());
        let monitor = HealthMonitor::new(slot, prober, config()).follow(rx);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(monitor.run(shutdown.subscribe()));

        tx.send_replace(HealthConfig {
            enabled: false,
            ..config()
        });
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_prober() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let prober = TcpProber::new(Duration::from_secs(1));

        let up = TargetDescriptor::parse("up", &format!("http://{}", addr)).unwrap();
        let up = TargetHandle::new(up);
        assert!(prober.probe(&up).await);

        drop(listener);
        let down = TargetDescriptor::parse("down", &format!("http://{}", addr)).unwrap();
        let down = TargetHandle::new(down);
        assert!(!prober.probe(&down).await);
    }
}
