//! Bounded LRU registry standing in for the soft/weak references the
//! original design relies on to let a GC reclaim an immutable block's
//! in-memory revision set under memory pressure (spec §9, "Soft
//! references"). Rust has no reclaimable reference, so eviction here is
//! driven by an explicit capacity bound instead of allocator pressure:
//! the least recently touched block gets its hot set dropped first,
//! falling back to the index+mmap ("cold") path on its next seek.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A block willing to drop its in-memory hot set on eviction.
pub trait Evictable: Send + Sync {
    fn evict(&self);
    fn block_id(&self) -> u64;
}

/// Tracks up to `capacity` recently-synced blocks; touching a block moves
/// it to the back of the queue, and exceeding capacity evicts the front.
pub struct HotCache {
    capacity: usize,
    order: Mutex<VecDeque<Arc<dyn Evictable>>>,
}

impl HotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers (or re-registers) `block` as recently hot, evicting the
    /// oldest entry if this pushes the registry over capacity.
    pub fn touch(&self, block: Arc<dyn Evictable>) {
        let mut order = self.order.lock().expect("hot cache poisoned");
        order.retain(|b| b.block_id() != block.block_id());
        order.push_back(block);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                evicted.evict();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.lock().expect("hot cache poisoned").len()
    }
}
