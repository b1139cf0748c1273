use std::fmt;

use crate::cardinal::Cardinal;
use crate::engine::{bounded, EngineRef, REMOTE_TIMEOUT};
use crate::error::{Result, SketchError};
use crate::identity::remote_counter_key;
use crate::types::CardinalDescriptor;

/// RemoteCardinal is a HyperLogLog living in the remote engine.
pub struct RemoteCardinal {
    descriptor: CardinalDescriptor,
    physical_key: String,
    engine: EngineRef,
}

impl RemoteCardinal {
    pub fn new(descriptor: CardinalDescriptor, engine: EngineRef) -> Self {
        let physical_key = remote_counter_key(&descriptor);
        Self {
            descriptor,
            physical_key,
            engine,
        }
    }
}

impl fmt::Debug for RemoteCardinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCardinal")
            .field("descriptor", &self.descriptor)
            .field("physical_key", &self.physical_key)
            .finish()
    }
}

#[async_trait]
impl Cardinal for RemoteCardinal {
    fn descriptor(&self) -> &CardinalDescriptor {
        &self.descriptor
    }

    fn physical_key(&self) -> Option<&str> {
        Some(&self.physical_key)
    }

    async fn add(&self, value: &[u8]) -> bool {
        let fut = self.engine.pf_add(&self.physical_key, value);
        bounded("PFADD", &self.physical_key, REMOTE_TIMEOUT, fut)
            .await
            .unwrap_or(false)
    }

    async fn estimate(&self) -> u64 {
        let fut = self.engine.pf_count(&self.physical_key);
        bounded("PFCOUNT", &self.physical_key, REMOTE_TIMEOUT, fut)
            .await
            .unwrap_or(0)
    }

    async fn serialize(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn restore(&self, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            return Err(SketchError::Deserialization(format!(
                "remote counter {} keeps no local state, got a {} byte snapshot",
                self.physical_key,
                data.len()
            )));
        }
        Ok(())
    }
}
