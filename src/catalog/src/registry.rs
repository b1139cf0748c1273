use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// HandleRegistry keeps at most one live handle per catalog identity.
///
/// A slot is claimed before its handle exists; concurrent requests for the
/// same identity wait on the slot's initializer instead of allocating (and
/// later racing on) a second in-memory sketch.
pub(crate) struct HandleRegistry<K, H: ?Sized> {
    slots: DashMap<K, Arc<OnceCell<Arc<H>>>>,
}

impl<K, H> HandleRegistry<K, H>
where
    K: Eq + Hash + Clone,
    H: ?Sized,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// slot returns the slot of `key`, creating an empty one if needed.
    pub fn slot(&self, key: &K) -> Arc<OnceCell<Arc<H>>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// evict drops the slot of `key`; the next request rebuilds the handle
    /// from the catalog.
    pub fn evict(&self, key: &K) {
        self.slots.remove(key);
    }

    /// evict_empty drops the slot of `key` unless it holds a handle.
    pub fn evict_empty(&self, key: &K) {
        self.slots.remove_if(key, |_, slot| !slot.initialized());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|e| e.value().initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::registry::HandleRegistry;

    #[tokio::test]
    async fn test_slot_is_shared() {
        let registry: HandleRegistry<String, str> = HandleRegistry::new();
        let key = "users".to_string();

        let a = registry.slot(&key);
        let b = registry.slot(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 0);

        let v = a.get_or_init(|| async { Arc::from("handle") }).await;
        assert_eq!(&**v, "handle");
        assert!(b.initialized());
        assert_eq!(registry.len(), 1);

        registry.evict_empty(&key);
        assert_eq!(registry.len(), 1);

        registry.evict(&key);
        assert_eq!(registry.len(), 0);
        assert!(!registry.slot(&key).initialized());
    }

    #[tokio::test]
    async fn test_evict_empty() {
        let registry: HandleRegistry<u32, str> = HandleRegistry::new();
        let slot = registry.slot(&1);
        registry.evict_empty(&1);
        assert!(!Arc::ptr_eq(&slot, &registry.slot(&1)));
    }
}
