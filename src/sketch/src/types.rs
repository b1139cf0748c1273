use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SketchError};
use crate::identity::FilterIdentity;
use crate::params;

/// FilterType names the approximate-membership variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    /// In-process Bloom filter.
    Embedded,
    /// Bloom filter held by the remote engine.
    Remote,
}

impl FilterType {
    pub const ALL: [FilterType; 2] = [FilterType::Embedded, FilterType::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Embedded => "EMBEDDED_FILTER",
            FilterType::Remote => "REMOTE_FILTER",
        }
    }
}

impl FromStr for FilterType {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self> {
        FilterType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SketchError::UnsupportedVariant(s.to_string()))
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CardinalType names the approximate-cardinality variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardinalType {
    /// In-process HyperLogLog++ counter.
    Embedded,
    /// HyperLogLog held by the remote engine.
    Remote,
}

impl CardinalType {
    pub const ALL: [CardinalType; 2] = [CardinalType::Embedded, CardinalType::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardinalType::Embedded => "EMBEDDED_COUNTER",
            CardinalType::Remote => "REMOTE_COUNTER",
        }
    }
}

impl FromStr for CardinalType {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self> {
        CardinalType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SketchError::UnsupportedVariant(s.to_string()))
    }
}

impl fmt::Display for CardinalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FilterDescriptor is the durable identity and tuning of one filter.
///
/// `hash_func_num` and `hash_func_type` are derived from the declared capacity
/// and error rate, never supplied by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub filter_type: FilterType,
    pub key: String,
    pub max_cardinality: u64,
    pub max_fp: f64,
    pub hash_func_num: u32,
    pub hash_func_type: String,
}

impl FilterDescriptor {
    /// Validates the declared tuning and derives the hash parameters for
    /// `filter_type`.
    pub fn new(
        filter_type: FilterType,
        key: impl Into<String>,
        max_cardinality: u64,
        max_fp: f64,
    ) -> Result<Self> {
        let derived = params::derive(filter_type, max_cardinality, max_fp)?;
        Ok(Self {
            filter_type,
            key: key.into(),
            max_cardinality,
            max_fp,
            hash_func_num: derived.hash_func_num,
            hash_func_type: derived.hash_func_type.to_string(),
        })
    }

    pub fn identity(&self) -> FilterIdentity {
        FilterIdentity::new(
            self.filter_type,
            &self.key,
            self.max_cardinality,
            self.max_fp,
            &self.hash_func_type,
        )
    }

    /// Whether this descriptor was declared with the given capacity and error rate.
    pub fn same_tuning(&self, max_cardinality: u64, max_fp: f64) -> bool {
        self.max_cardinality == max_cardinality && self.max_fp.to_bits() == max_fp.to_bits()
    }
}

/// CardinalDescriptor is the durable identity of one counter. The pair is
/// also its catalog identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardinalDescriptor {
    pub cardinal_type: CardinalType,
    pub key: String,
}

impl CardinalDescriptor {
    pub fn new(cardinal_type: CardinalType, key: impl Into<String>) -> Self {
        Self {
            cardinal_type,
            key: key.into(),
        }
    }
}
