//! Catalog identities and remote physical keys.
//!
//! Physical keys double as the remote engine's addressing scheme: the same
//! inputs must always produce byte-identical keys, or existing remote state is
//! orphaned.

use crate::types::{CardinalDescriptor, FilterDescriptor, FilterType};

/// Expansion factor 0 lets the remote engine apply its own default.
pub const DEFAULT_EXPANSION: u32 = 0;

/// RemoteFilterOptions holds the remote engine's scaling knobs, which are part
/// of a remote filter's physical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFilterOptions {
    pub expansion: u32,
    pub non_scaling: bool,
}

impl Default for RemoteFilterOptions {
    fn default() -> Self {
        Self {
            expansion: DEFAULT_EXPANSION,
            non_scaling: false,
        }
    }
}

/// remote_filter_key encodes the physical key of a remote filter:
/// `filter:key=<k>:capacity=<n>:error_rate=<p>:expansion=<e>:scaling=<b>`,
/// with the error rate printed in fixed point with six decimals.
pub fn remote_filter_key(descriptor: &FilterDescriptor, options: RemoteFilterOptions) -> String {
    format!(
        "filter:key={}:capacity={}:error_rate={:.6}:expansion={}:scaling={}",
        descriptor.key,
        descriptor.max_cardinality,
        descriptor.max_fp,
        options.expansion,
        options.non_scaling,
    )
}

/// remote_counter_key encodes the physical key of a remote counter.
pub fn remote_counter_key(descriptor: &CardinalDescriptor) -> String {
    format!("counter:key={}", descriptor.key)
}

/// FilterIdentity is the catalog's unique key for a filter row:
/// (type, key, max cardinality, max false positive rate, hash family).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterIdentity {
    pub filter_type: FilterType,
    pub key: String,
    pub max_cardinality: u64,
    /// `f64::to_bits` of the false positive rate, so the identity is hashable.
    max_fp_bits: u64,
    pub hash_func_type: String,
}

impl FilterIdentity {
    pub fn new(
        filter_type: FilterType,
        key: &str,
        max_cardinality: u64,
        max_fp: f64,
        hash_func_type: &str,
    ) -> Self {
        Self {
            filter_type,
            key: key.to_string(),
            max_cardinality,
            max_fp_bits: max_fp.to_bits(),
            hash_func_type: hash_func_type.to_string(),
        }
    }

    pub fn max_fp(&self) -> f64 {
        f64::from_bits(self.max_fp_bits)
    }
}
