use std::fmt;
use std::time::Duration;

use crate::engine::{bounded, BloomReserve, EngineRef, REMOTE_TIMEOUT};
use crate::error::{Result, SketchError};
use crate::filter::Filter;
use crate::identity::{remote_filter_key, RemoteFilterOptions};
use crate::types::FilterDescriptor;

/// RemoteFilter is a Bloom filter living in the remote engine under its
/// physical key. The handle owns no filter state; every add carries the
/// declared tuning so the engine creates the filter with it.
///
/// Failed or timed out commands read as "not added" / "not present".
pub struct RemoteFilter {
    descriptor: FilterDescriptor,
    physical_key: String,
    reserve: BloomReserve,
    engine: EngineRef,
    timeout: Duration,
}

impl RemoteFilter {
    pub fn new(descriptor: FilterDescriptor, engine: EngineRef, options: RemoteFilterOptions) -> Self {
        let physical_key = remote_filter_key(&descriptor, options);
        let reserve = BloomReserve {
            capacity: descriptor.max_cardinality,
            error_rate: descriptor.max_fp,
            expansion: options.expansion,
            non_scaling: options.non_scaling,
        };
        Self {
            descriptor,
            physical_key,
            reserve,
            engine,
            timeout: REMOTE_TIMEOUT,
        }
    }
}

impl fmt::Debug for RemoteFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFilter")
            .field("descriptor", &self.descriptor)
            .field("physical_key", &self.physical_key)
            .finish()
    }
}

#[async_trait]
impl Filter for RemoteFilter {
    fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    fn physical_key(&self) -> Option<&str> {
        Some(&self.physical_key)
    }

    async fn add(&self, value: &[u8]) -> bool {
        let fut = self.engine.bf_add(&self.physical_key, &self.reserve, value);
        bounded("BF.ADD", &self.physical_key, self.timeout, fut)
            .await
            .unwrap_or(false)
    }

    async fn exists(&self, value: &[u8]) -> bool {
        let fut = self.engine.bf_exists(&self.physical_key, value);
        bounded("BF.EXISTS", &self.physical_key, self.timeout, fut)
            .await
            .unwrap_or(false)
    }

    async fn serialize(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn restore(&self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            return Err(SketchError::Deserialization(format!(
                "remote filter {} keeps no local state, got a {} byte snapshot",
                self.physical_key,
                data.len()
            )));
        }
        Ok(())
    }
}
