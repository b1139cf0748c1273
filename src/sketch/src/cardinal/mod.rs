use std::fmt;
use std::sync::Arc;

use crate::engine::EngineRef;
use crate::error::Result;
use crate::types::{CardinalDescriptor, CardinalType};

pub mod embedded;
pub mod remote;

pub use self::embedded::EmbeddedCardinal;
pub use self::remote::RemoteCardinal;

/// Cardinal is an approximate distinct-element counter.
#[async_trait]
pub trait Cardinal: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &CardinalDescriptor;

    /// Address of the counter inside the remote engine, `None` when the state
    /// lives in this process.
    fn physical_key(&self) -> Option<&str>;

    /// add counts `value`. Returns true if the call is believed to have
    /// changed the counter; false on a remote failure.
    async fn add(&self, value: &[u8]) -> bool;

    /// estimate returns the approximate number of distinct values added.
    /// A remote failure reads as 0, which callers cannot tell apart from an
    /// empty counter.
    async fn estimate(&self) -> u64;

    /// serialize snapshots the local state; empty for remote counters.
    async fn serialize(&self) -> Result<Vec<u8>>;

    /// restore replaces the local state with a snapshot taken by `serialize`.
    async fn restore(&self, data: &[u8]) -> Result<()>;
}

/// new_cardinal allocates the variant named by `descriptor.cardinal_type`.
pub fn new_cardinal(descriptor: CardinalDescriptor, engine: &EngineRef) -> Result<Arc<dyn Cardinal>> {
    let cardinal: Arc<dyn Cardinal> = match descriptor.cardinal_type {
        CardinalType::Embedded => Arc::new(EmbeddedCardinal::new(descriptor)?),
        CardinalType::Remote => Arc::new(RemoteCardinal::new(descriptor, engine.clone())),
    };
    Ok(cardinal)
}
