use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryEngine;
pub use self::redis::RedisEngine;

/// Every remote command is abandoned after this long.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The engine could not be reached.
    #[error("remote engine unavailable: {0}")]
    Unavailable(String),

    /// The engine answered with an error.
    #[error("remote command failed: {0}")]
    Command(String),
}

/// BloomReserve is the tuning a remote Bloom filter is created with. The
/// engine applies it when the first item arrives at a missing key and
/// ignores it afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomReserve {
    pub capacity: u64,
    pub error_rate: f64,
    /// 0 keeps the engine's default growth factor.
    pub expansion: u32,
    pub non_scaling: bool,
}

/// RemoteEngine is the subset of a key-value engine's probabilistic command
/// set the remote sketches are built on. Implementations are expected to
/// serialize operations on one key themselves.
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Adds `value` to the Bloom filter at `key`, creating the filter with
    /// `reserve` if the key is missing. True if `value` was not present.
    async fn bf_add(&self, key: &str, reserve: &BloomReserve, value: &[u8]) -> Result<bool, RemoteError>;

    /// Tests `value` against the Bloom filter at `key`.
    async fn bf_exists(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError>;

    /// Adds `value` to the HyperLogLog at `key`; true if a register changed.
    async fn pf_add(&self, key: &str, value: &[u8]) -> Result<bool, RemoteError>;

    /// Returns the HyperLogLog estimate at `key`.
    async fn pf_count(&self, key: &str) -> Result<u64, RemoteError>;
}

pub type EngineRef = Arc<dyn RemoteEngine>;

/// bounded runs one remote command under `limit`.
///
/// Failures and timeouts are logged and reported as `None`; the caller picks
/// its fail-closed value. Nothing is retried.
pub(crate) async fn bounded<T, F>(command: &'static str, key: &str, limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(err)) => {
            warn!(command, key, error = %err, "remote command failed");
            None
        }
        Err(_) => {
            warn!(
                command,
                key,
                timeout_ms = limit.as_millis() as u64,
                "remote command timed out"
            );
            None
        }
    }
}
