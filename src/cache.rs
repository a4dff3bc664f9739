use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Bounded record of recently seen message content per group, used by the
/// spam rule layer to catch copy-paste floods. LRU capacity doubles as the
/// "short window": once content falls out, it no longer counts as a repeat.
pub struct RecentContentCache {
    cache: Arc<Mutex<LruCache<(String, u64), u32>>>,
}

impl RecentContentCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(100).unwrap());
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    /// Records one sighting of `text` in `group_id` and returns how many
    /// times it has now been seen within the window, this one included.
    pub fn note(&self, group_id: &str, text: &str) -> u32 {
        let key = (group_id.to_string(), content_fingerprint(text));
        let mut cache = self.cache.lock().unwrap();
        let count = cache.get(&key).copied().unwrap_or(0) + 1;
        cache.put(key, count);
        count
    }

    /// How many sightings are on record without counting a new one.
    pub fn seen_count(&self, group_id: &str, text: &str) -> u32 {
        let key = (group_id.to_string(), content_fingerprint(text));
        let mut cache = self.cache.lock().unwrap();
        cache.get(&key).copied().unwrap_or(0)
    }
}

/// Case- and whitespace-insensitive so trivial edits don't defeat repeat
/// detection.
fn content_fingerprint(text: &str) -> u64 {
    let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = DefaultHasher::new();
    normalized.to_lowercase().hash(&mut hasher);
    hasher.finish()
}
