use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::engine::{BloomReserve, RemoteEngine, RemoteError};

/// MemoryEngine is an exact, in-process stand-in for a remote engine.
///
/// Membership and cardinality are answered from plain sets, so it never
/// reports false positives. It can be taken offline or slowed down to
/// exercise the fail-closed paths of the remote sketches. The tuning each
/// filter was created with is kept for inspection.
#[derive(Debug)]
pub struct MemoryEngine {
    online: AtomicBool,
    latency_ms: AtomicU64,
    filters: DashMap<String, HashSet<Vec<u8>>>,
    reserves: DashMap<String, BloomReserve>,
    counters: DashMap<String, HashSet<Vec<u8>>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            filters: DashMap::new(),
            reserves: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    /// set_online switches the engine between reachable and unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// set_latency delays every later command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// keys lists the physical keys holding any state.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .filters
            .iter()
            .map(|e| e.key().clone())
            .chain(self.counters.iter().map(|e| e.key().clone()))
            .collect();
        keys.sort();
        keys
    }

    /// reserve returns the tuning the filter at `key` was created with.
    pub fn reserve(&self, key: &str) -> Option<BloomReserve> {
        self.reserves.get(key).map(|r| *r)
    }

    async fn round_trip(&self) -> Result<(), RemoteError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteEngine for MemoryEngine {
    async fn bf_add(&self, key: &str, reserve: &BloomReserve, value: &[u8]) -> Result<bool, RemoteError> {
        self.round_trip().await?;
        self.reserves.entry(key.to_string()).or_insert(*reserve);
        Ok(self
            .filters
            .entry(key.to_string())
            .or_default()
            .insert(value.to_vec()))
    }

    async fn bf_exists(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError> {
        self.round_trip().await?;
        Ok(self
            .filters
            .get(key)
            .map(|set| set.contains(value))
            .unwrap_or(false))
    }

    async fn pf_add(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError> {
        self.round_trip().await?;
        Ok(self
            .counters
            .entry(key.to_string())
            .or_default()
            .insert(value.to_vec()))
    }

    async fn pf_count(&self, key: &str) -> Result<u64, RemoteError> {
        self.round_trip().await?;
        Ok(self
            .counters
            .get(key)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }
}
