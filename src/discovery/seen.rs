//! Seen-message cache
//!
//! Remembers every `(node id, sequence)` pair the discovery engine has
//! processed or sent. Unbounded unless a capacity is configured, in which case
//! the oldest keys are evicted first.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

/// Duplicate-suppression key
pub type DedupKey = (String, u32);

#[derive(Debug, Default)]
pub struct SeenCache {
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
    capacity: Option<usize>,
}

impl SeenCache {
    /// Cache that never evicts
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` keys (FIFO eviction)
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Record a key. Returns `true` if it had not been seen before.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return true;
            }
            while self.keys.len() >= capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        trace!("Evicting seen key {}:{}", oldest.0, oldest.1);
                        self.keys.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key.clone());
        }
        self.keys.insert(key);
        true
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
