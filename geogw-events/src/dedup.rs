use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Default capacity of the dedup window.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded first-seen set.
///
/// The consumer side of the account-creation exchange logs each account at
/// most once per process lifetime. The set is capped; once full, the oldest
/// entry is evicted so memory stays bounded no matter how long the process
/// runs.
pub struct Deduplicator {
    inner: Mutex<Window>,
    capacity: usize,
}

struct Window {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        Deduplicator {
            inner: Mutex::new(Window {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` the first time a key is seen within the window.
    pub fn insert(&self, key: &str) -> bool {
        let mut window = self.inner.lock().expect("dedup lock poisoned");
        if window.seen.contains(key) {
            return false;
        }
        if window.order.len() == self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }
        window.seen.insert(key.to_string());
        window.order.push_back(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("dedup lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
