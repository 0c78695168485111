//! Action registry and the live set of named pools.
//!
//! # Responsibilities
//! - Resolve an action name ("balancer.rr", "balancer.lc") to a policy
//! - Build every configured pool, each with a fresh generation
//! - Swap rebuilt pools in on reload and tear down the ones replaced
//!
//! # Design Decisions
//! - The registry is an explicit value built at startup, not a global
//! - A reload builds every pool before touching the live set, so a bad
//!   config changes nothing
//! - Each pool lives in its own `ArcSwap` slot so readers (request path,
//!   health monitors) follow reloads without locking

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{BalancerConfig, ConfigError, Value};
use crate::load_balancer::{
    BackendPool, LeastLoaded, PoolSettings, PoolSnapshot, RoundRobin, SelectionPolicy,
};

/// Constructor for a selection policy.
pub type PolicyFactory = fn() -> Box<dyn SelectionPolicy>;

fn round_robin() -> Box<dyn SelectionPolicy> {
    Box::new(RoundRobin::new())
}

fn least_loaded() -> Box<dyn SelectionPolicy> {
    Box::new(LeastLoaded::new())
}

/// Maps action names to the policies their pools route with.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, PolicyFactory>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `balancer.rr` and `balancer.lc`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("balancer.rr", round_robin);
        registry.register("balancer.lc", least_loaded);
        registry
    }

    pub fn register(&mut self, action: impl Into<String>, factory: PolicyFactory) {
        self.actions.insert(action.into(), factory);
    }

    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a pool for `action` from its target value.
    pub fn build(
        &self,
        action: &str,
        pool_name: &str,
        generation: u64,
        value: Option<&Value>,
        settings: PoolSettings,
    ) -> Result<Arc<BackendPool>, ConfigError> {
        let factory = self
            .actions
            .get(action)
            .ok_or_else(|| ConfigError::UnknownAction(action.to_string()))?;
        BackendPool::build(pool_name, generation, value, factory(), settings)
    }
}

/// Which pools a reload added, replaced and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
}

/// The live, named pools of the running configuration.
#[derive(Debug)]
pub struct PoolSet {
    registry: ActionRegistry,
    pools: DashMap<String, Arc<ArcSwap<BackendPool>>>,
    generation: AtomicU64,
}

impl PoolSet {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            pools: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Build every pool in `config` and make them live.
    pub fn apply(&self, config: &BalancerConfig) -> Result<ReloadSummary, ConfigError> {
        let settings = PoolSettings::from(config);

        // Build everything first; on error the pools built so far are
        // dropped and release their targets
        let mut built = Vec::with_capacity(config.pools.len());
        for pool_config in &config.pools {
            let value = pool_config.targets.as_ref().map(Value::from_toml).transpose()?;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let pool = self
                .registry
                .build(
                    &pool_config.action,
                    &pool_config.name,
                    generation,
                    value.as_ref(),
                    settings.clone(),
                )
                .map_err(|e| {
                    tracing::error!(pool = %pool_config.name, error = %e, "Failed to build pool");
                    e
                })?;
            built.push(pool);
        }

        let mut summary = ReloadSummary::default();
        let live: HashSet<String> = built.iter().map(|p| p.name().to_string()).collect();

        for pool in built {
            let name = pool.name().to_string();
            let existing = self.pools.get(&name).map(|slot| slot.value().clone());
            match existing {
                Some(slot) => {
                    let old = slot.swap(pool);
                    old.teardown();
                    summary.replaced.push(name);
                }
                None => {
                    self.pools.insert(name.clone(), Arc::new(ArcSwap::new(pool)));
                    summary.added.push(name);
                }
            }
        }

        let stale: Vec<String> = self
            .pools
            .iter()
            .filter(|entry| !live.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for name in stale {
            if let Some((_, slot)) = self.pools.remove(&name) {
                slot.load().teardown();
                summary.removed.push(name);
            }
        }

        summary.added.sort();
        summary.replaced.sort();
        summary.removed.sort();
        tracing::info!(
            added = ?summary.added,
            replaced = ?summary.replaced,
            removed = ?summary.removed,
            "Pool configuration applied"
        );
        Ok(summary)
    }

    /// Current pool under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<BackendPool>> {
        self.pools.get(name).map(|slot| slot.load_full())
    }

    /// The reload-following slot for `name`.
    pub fn slot(&self, name: &str) -> Option<Arc<ArcSwap<BackendPool>>> {
        self.pools.get(name).map(|slot| slot.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|pool| pool.snapshot())
            .collect()
    }

    /// Close every pool and hand them back so callers can drain them.
    pub fn teardown_all(&self) -> Vec<Arc<BackendPool>> {
        let mut closed = Vec::new();
        for name in self.names() {
            if let Some((_, slot)) = self.pools.remove(&name) {
                let pool = slot.load_full();
                pool.teardown();
                closed.push(pool);
            }
        }
        closed
    }
}
