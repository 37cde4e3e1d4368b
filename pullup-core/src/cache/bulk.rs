use std::sync::Arc;

use dashmap::DashMap;

/// Identifies one in-process byte slot. One slot exists per bulk endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkSlot {
    /// The full lightweight marker list, as serialized JSON.
    AllMarkers,
}

/// In-process cache for already-serialized bulk responses.
///
/// Unlike the keyed cache this never leaves the process: the payload is the
/// exact byte string written to the wire, so a hit costs one `Arc` clone.
#[derive(Debug, Default)]
pub struct BulkCache {
    slots: DashMap<BulkSlot, Arc<Vec<u8>>>,
}

impl BulkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached bytes for a slot, or `None` on miss.
    pub fn get(&self, slot: BulkSlot) -> Option<Arc<Vec<u8>>> {
        self.slots.get(&slot).map(|entry| entry.clone())
    }

    /// Stores serialized bytes in a slot. Empty and `null` payloads are
    /// rejected so a failed upstream serialization can never poison readers.
    pub fn set(&self, slot: BulkSlot, bytes: Vec<u8>) -> bool {
        if bytes.is_empty() || bytes == b"null" {
            return false;
        }

        self.slots.insert(slot, Arc::new(bytes));
        true
    }

    /// Drops the slot's contents. The next reader repopulates it.
    pub fn clear(&self, slot: BulkSlot) {
        self.slots.remove(&slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = BulkCache::new();

        assert!(cache.set(BulkSlot::AllMarkers, b"[{\"id\":1}]".to_vec()));
        let hit = cache.get(BulkSlot::AllMarkers).expect("slot is populated");

        assert_eq!(hit.as_slice(), b"[{\"id\":1}]");
    }

    #[test]
    fn test_rejects_poisonous_payloads() {
        let cache = BulkCache::new();

        assert!(!cache.set(BulkSlot::AllMarkers, Vec::new()), "empty");
        assert!(!cache.set(BulkSlot::AllMarkers, b"null".to_vec()), "null");
        assert!(cache.get(BulkSlot::AllMarkers).is_none());
    }

    #[test]
    fn test_clear_forces_miss() {
        let cache = BulkCache::new();

        cache.set(BulkSlot::AllMarkers, b"[{\"id\":1}]".to_vec());
        cache.clear(BulkSlot::AllMarkers);

        assert!(cache.get(BulkSlot::AllMarkers).is_none());
    }
}
