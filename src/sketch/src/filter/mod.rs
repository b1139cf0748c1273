use std::fmt;
use std::sync::Arc;

use crate::engine::EngineRef;
use crate::error::Result;
use crate::identity::RemoteFilterOptions;
use crate::types::{FilterDescriptor, FilterType};

pub mod embedded;
pub mod remote;

pub use self::embedded::EmbeddedFilter;
pub use self::remote::RemoteFilter;

/// Filter is an approximate-membership structure.
///
/// Handles are shared between workers: implementations serialize access to
/// their own state, and remote implementations leave that to the engine.
#[async_trait]
pub trait Filter: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &FilterDescriptor;

    /// Address of the filter inside the remote engine, `None` when the state
    /// lives in this process.
    fn physical_key(&self) -> Option<&str>;

    /// add inserts `value`. Returns true if the call is believed to have
    /// changed the filter; false on a remote failure.
    async fn add(&self, value: &[u8]) -> bool;

    /// exists tests `value`. False positives are bounded by the declared rate;
    /// false negatives only happen when a remote call fails.
    async fn exists(&self, value: &[u8]) -> bool;

    /// serialize snapshots the local state; empty for remote filters.
    async fn serialize(&self) -> Result<Vec<u8>>;

    /// restore replaces the local state with a snapshot taken by `serialize`.
    async fn restore(&self, data: &[u8]) -> Result<()>;
}

/// new_filter allocates the variant named by `descriptor.filter_type`. Remote
/// variants bind to `engine` and allocate nothing locally.
pub fn new_filter(descriptor: FilterDescriptor, engine: &EngineRef) -> Result<Arc<dyn Filter>> {
    let filter: Arc<dyn Filter> = match descriptor.filter_type {
        FilterType::Embedded => Arc::new(EmbeddedFilter::new(descriptor)?),
        FilterType::Remote => Arc::new(RemoteFilter::new(
            descriptor,
            engine.clone(),
            RemoteFilterOptions::default(),
        )),
    };
    Ok(filter)
}
