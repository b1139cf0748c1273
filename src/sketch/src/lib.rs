//! Approximate-membership filters and approximate-cardinality counters.
//!
//! Every structure comes in two flavours behind one contract: an embedded
//! sketch whose state lives in process memory, and a remote sketch whose
//! state lives in a key-value engine that speaks the Bloom and HyperLogLog
//! command families. Callers hold `Arc<dyn Filter>` / `Arc<dyn Cardinal>` and
//! never need to know which one they got.

#[macro_use]
extern crate async_trait;

pub mod cardinal;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod params;
pub mod snapshot;
pub mod types;

pub use cardinal::{new_cardinal, Cardinal};
pub use engine::{BloomReserve, EngineRef, RemoteEngine, RemoteError, REMOTE_TIMEOUT};
pub use error::{Result, SketchError};
pub use filter::{new_filter, Filter};
pub use identity::{FilterIdentity, RemoteFilterOptions};
pub use types::{CardinalDescriptor, CardinalType, FilterDescriptor, FilterType};
