//! Last-known attribute value cache
//!
//! In-memory mirror of attribute values keyed by handle, shared by the
//! client database and the server characteristic objects. Entries are
//! updated only from confirmed sources: a successful read or write
//! completion, an inbound handle value push, or a local set-value on the
//! server side. Nothing is written speculatively.

use std::collections::HashMap;
use std::sync::Mutex;

pub struct ValueCache {
    values: Mutex<HashMap<u16, Vec<u8>>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }

    /// The last value observed for `handle`, if any
    pub fn get(&self, handle: u16) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(&handle).cloned()
    }

    /// Records a confirmed value for `handle`
    pub fn update(&self, handle: u16, data: &[u8]) {
        self.values.lock().unwrap().insert(handle, data.to_vec());
    }

    /// Drops all cached values (peer database is stale after a disconnect)
    pub fn clear(&self) {
        self.values.lock().unwrap().clear();
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_clear() {
        let cache = ValueCache::new();
        assert_eq!(cache.get(3), None);
        cache.update(3, &[1, 2, 3]);
        assert_eq!(cache.get(3), Some(vec![1, 2, 3]));
        cache.update(3, &[4]);
        assert_eq!(cache.get(3), Some(vec![4]));
        cache.clear();
        assert_eq!(cache.get(3), None);
    }
}
