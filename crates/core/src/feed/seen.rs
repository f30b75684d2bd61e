use hashlink::LruCache;

/// Bounded memory of recently seen enclosure URLs.
///
/// Once full, the least recently seen URL is forgotten, so a very old item
/// that reappears is treated as new again.
pub struct SeenCache {
    entries: LruCache<String, ()>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity.max(1)),
        }
    }

    /// Record `url`. Returns true when it was not already in the cache.
    pub fn check_and_insert(&mut self, url: &str) -> bool {
        if self.entries.get(url).is_some() {
            return false;
        }
        self.entries.insert(url.to_string(), ());
        true
    }

    /// Drop `url` so its next sighting counts as new.
    pub fn forget(&mut self, url: &str) {
        self.entries.remove(url);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}
