// src/write/cache.rs
//! Short-TTL revision cache.
//!
//! Advisory only: it saves a storage round-trip for rapid repeat writes to
//! the same id, never more. A cold or expired entry means the coordinator
//! falls back to a storage read; correctness never depends on a hit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RevCache {
    ttl: Duration,
    map: Mutex<HashMap<String, (i64, Instant)>>,
}

impl RevCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Current cached revision, if present and fresh. Expired entries are
    /// evicted on read.
    pub fn get(&self, resource_id: &str) -> Option<i64> {
        let mut map = self.map.lock().expect("rev cache mutex poisoned");
        match map.get(resource_id) {
            Some((rev, at)) if at.elapsed() < self.ttl => Some(*rev),
            Some(_) => {
                map.remove(resource_id);
                None
            }
            None => None,
        }
    }

    /// Record a committed revision. Written only after a successful write.
    pub fn put(&self, resource_id: &str, rev: i64) {
        let mut map = self.map.lock().expect("rev cache mutex poisoned");
        map.insert(resource_id.to_string(), (rev, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_expire() {
        let cache = RevCache::new(Duration::from_millis(30));
        cache.put("resources/a", 7);
        assert_eq!(cache.get("resources/a"), Some(7));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("resources/a"), None);
    }

    #[test]
    fn miss_on_unknown_id() {
        let cache = RevCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("resources/nope"), None);
    }
}
