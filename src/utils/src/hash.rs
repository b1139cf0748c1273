use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// XxHashBuilder builds seeded xxHash64 hashers.
///
/// Unlike `twox_hash::RandomXxHashBuilder64` the seed is part of the value, so a
/// sketch hashed with it can be encoded and decoded without changing where
/// future values land.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XxHashBuilder {
    seed: u64,
}

impl XxHashBuilder {
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl BuildHasher for XxHashBuilder {
    type Hasher = XxHash64;

    fn build_hasher(&self) -> Self::Hasher {
        XxHash64::with_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{BuildHasher, Hash, Hasher};

    use crate::hash::XxHashBuilder;

    #[test]
    fn test_builder_seed() {
        let hash = |builder: &XxHashBuilder| {
            let mut h = builder.build_hasher();
            "alice".hash(&mut h);
            h.finish()
        };

        assert_eq!(hash(&XxHashBuilder::default()), hash(&XxHashBuilder::with_seed(0)));
        assert_ne!(hash(&XxHashBuilder::with_seed(1)), hash(&XxHashBuilder::with_seed(2)));
    }
}
