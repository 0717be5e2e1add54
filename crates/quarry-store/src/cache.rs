use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use quarry_types::{ObjectId, StoredObject};

/// Default byte budget for an [`ObjectCache`]: 96 MiB.
pub const DEFAULT_CACHE_CAPACITY: u64 = 96 * 1024 * 1024;

/// Hit and miss counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Entry {
    value: Arc<StoredObject>,
    size: u64,
}

struct CacheState {
    /// Unbounded by count; the byte budget is enforced by `evict`.
    entries: LruCache<ObjectId, Entry>,
    resident: u64,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
            resident: 0,
        }
    }
}

impl CacheState {
    fn touch(&mut self, id: &ObjectId) -> Option<Arc<StoredObject>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.value))
    }

    fn insert(&mut self, id: ObjectId, entry: Entry) {
        self.resident += entry.size;
        if let Some(old) = self.entries.put(id, entry) {
            self.resident -= old.size;
        }
    }

    fn remove(&mut self, id: &ObjectId) -> Option<Entry> {
        let entry = self.entries.pop(id)?;
        self.resident -= entry.size;
        Some(entry)
    }

    /// Evict least recently used entries until within `capacity`, never
    /// evicting `keep`. Returns (entries evicted, bytes freed).
    fn evict(&mut self, capacity: u64, keep: Option<&ObjectId>) -> (usize, u64) {
        let mut evicted = 0;
        let mut freed = 0;
        while self.resident > capacity {
            match self.entries.peek_lru() {
                Some((oldest, _)) if Some(oldest) != keep => {}
                _ => break,
            }
            if let Some((_, entry)) = self.entries.pop_lru() {
                self.resident -= entry.size;
                evicted += 1;
                freed += entry.size;
            }
        }
        (evicted, freed)
    }
}

/// Bounded, thread-safe LRU cache of decoded objects keyed by ID.
///
/// Capacity is a byte budget over object sizes, not an entry count. All
/// operations are serialized by one internal lock that is never held across
/// I/O.
///
/// An object larger than the whole budget is still admitted. It survives the
/// insert that brought it in and becomes the first eviction candidate after
/// that, so the budget is exceeded by at most that one entry.
pub struct ObjectCache {
    capacity: u64,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ObjectCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an object, marking it most recently used on a hit.
    pub fn get(&self, id: &ObjectId) -> Option<Arc<StoredObject>> {
        let found = self.lock().touch(id);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Whether `id` is resident. Does not affect recency.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.lock().entries.contains(id)
    }

    /// Insert or replace an entry, mark it most recently used, then evict
    /// older entries if over budget.
    pub fn put(&self, id: ObjectId, value: Arc<StoredObject>) {
        let size = value.size;
        let (evicted, freed) = {
            let mut state = self.lock();
            state.insert(id, Entry { value, size });
            state.evict(self.capacity, Some(&id))
        };
        if evicted > 0 {
            tracing::trace!(evicted, freed, "object cache eviction");
        }
    }

    /// Evict least recently used entries until resident bytes fit the budget.
    pub fn evict_if_needed(&self) {
        let (evicted, freed) = self.lock().evict(self.capacity, None);
        if evicted > 0 {
            tracing::trace!(evicted, freed, "object cache eviction");
        }
    }

    /// Drop one entry. Returns whether it was resident.
    pub fn remove(&self, id: &ObjectId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.resident = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of all resident entries.
    pub fn resident_bytes(&self) -> u64 {
        self.lock().resident
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ObjectCache")
            .field("capacity", &self.capacity)
            .field("entries", &state.entries.len())
            .field("resident", &state.resident)
            .finish()
    }
}
