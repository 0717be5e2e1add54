use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_refs::{Ref, RefTarget};
use quarry_types::{ObjectId, StoredObject};
use tracing::trace;

use crate::cache::ObjectCache;
use crate::config::StorageOptions;
use crate::error::StoreResult;
use crate::fs::FilesystemBackend;
use crate::traits::ObjectStore;

/// A repository's storage: a [`FilesystemBackend`] fronted by an
/// [`ObjectCache`].
///
/// Reads check the cache, fall through to the backend on a miss, and
/// populate the cache with what they found. Writes go straight to the
/// backend; the cache fills on the next read. The cache lock is never held
/// while the backend does I/O, so two threads missing on the same object may
/// both load it and the second insert simply replaces the first.
pub struct Storage {
    backend: FilesystemBackend,
    cache: ObjectCache,
    options: StorageOptions,
}

impl Storage {
    /// Open the repository at `root`, reading `config.toml` if present.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let options = StorageOptions::load_from(&root)?;
        Self::with_options(root, options)
    }

    /// Open the repository at `root` with explicit options; `config.toml`
    /// is not read.
    pub fn with_options(root: impl Into<PathBuf>, options: StorageOptions) -> StoreResult<Self> {
        let backend = FilesystemBackend::open_with_options(root, &options)?;
        let cache = ObjectCache::new(options.cache_capacity_bytes);
        Ok(Self::from_parts(backend, cache, options))
    }

    /// Create the repository layout at `root` and open it.
    pub fn init(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let backend = FilesystemBackend::init(root)?;
        let options = StorageOptions::load_from(backend.root())?;
        let cache = ObjectCache::new(options.cache_capacity_bytes);
        Ok(Self::from_parts(backend, cache, options))
    }

    pub fn from_parts(backend: FilesystemBackend, cache: ObjectCache, options: StorageOptions) -> Self {
        Self {
            backend,
            cache,
            options,
        }
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    pub fn backend(&self) -> &FilesystemBackend {
        &self.backend
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// The options this storage was opened with.
    pub fn config(&self) -> &StorageOptions {
        &self.options
    }

    // ----- objects -----

    /// Fetch an object, failing with `ObjectNotFound` if it is absent.
    pub fn get_object(&self, id: &ObjectId) -> StoreResult<Arc<StoredObject>> {
        self.get(id)
    }

    pub fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        self.exists(id)
    }

    /// Store an object and return its ID. Storing it again is a no-op.
    pub fn put_object(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        self.write(object)
    }

    pub fn reload_packs(&self) -> StoreResult<()> {
        self.backend.reload_packs()
    }

    // ----- refs -----

    pub fn get_ref(&self, name: &str) -> StoreResult<Option<RefTarget>> {
        self.backend.get_ref(name)
    }

    pub fn set_ref(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        self.backend.set_ref(name, id)
    }

    pub fn set_symbolic_ref(&self, name: &str, target: &str) -> StoreResult<()> {
        self.backend.set_symbolic_ref(name, target)
    }

    pub fn delete_ref(&self, name: &str) -> StoreResult<bool> {
        self.backend.delete_ref(name)
    }

    pub fn resolve_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        self.backend.resolve_ref(name)
    }

    pub fn iter_refs(&self) -> StoreResult<std::vec::IntoIter<Ref>> {
        self.backend.iter_refs()
    }

    pub fn head(&self) -> StoreResult<Option<RefTarget>> {
        self.backend.head()
    }

    pub fn set_head_symbolic(&self, target: &str) -> StoreResult<()> {
        self.backend.set_head_symbolic(target)
    }
}

impl ObjectStore for Storage {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<Arc<StoredObject>>> {
        if let Some(hit) = self.cache.get(id) {
            trace!(id = %id.short_hex(), "object cache hit");
            return Ok(Some(hit));
        }
        let found = self.backend.read(id)?;
        if let Some(obj) = &found {
            self.cache.put(*id, Arc::clone(obj));
        }
        Ok(found)
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        self.backend.write(object)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        if self.cache.contains(id) {
            return Ok(true);
        }
        self.backend.exists(id)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::error::StoreError;
    use quarry_types::ObjectKind;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::init(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn read_populates_cache() {
        let (_dir, storage) = storage();
        let obj = StoredObject::new(ObjectKind::Tree, b"entries".to_vec());
        let id = storage.put_object(&obj).unwrap();
        assert!(!storage.cache().contains(&id));

        let first = storage.get_object(&id).unwrap();
        assert!(storage.cache().contains(&id));
        let second = storage.get_object(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(storage.cache().stats().hits, 1);
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, storage) = storage();
        let obj = StoredObject::blob(b"twice".to_vec());
        assert_eq!(storage.put_object(&obj).unwrap(), storage.put_object(&obj).unwrap());
        assert_eq!(*storage.get_object(&obj.compute_id()).unwrap(), obj);
    }

    #[test]
    fn missing_object_is_not_found() {
        let (_dir, storage) = storage();
        let id = ObjectId::from_bytes(b"ghost");
        assert!(!storage.has_object(&id).unwrap());
        assert!(matches!(
            storage.get_object(&id),
            Err(StoreError::ObjectNotFound(_))
        ));
        assert!(storage.cache().is_empty());
    }

    #[test]
    fn cached_object_survives_backend_removal() {
        let (dir, storage) = storage();
        let id = storage.put_object(&StoredObject::blob(b"warm".to_vec())).unwrap();
        storage.get_object(&id).unwrap();

        let (a, b) = id.loose_path_components();
        std::fs::remove_file(dir.path().join("objects").join(a).join(b)).unwrap();
        assert!(storage.has_object(&id).unwrap());
        assert!(storage.get_object(&id).is_ok());
    }

    #[test]
    fn packed_batch_is_readable_after_reload() {
        let (dir, storage) = storage();
        let objects: Vec<_> = (0..5u8).map(|i| StoredObject::blob(vec![i; 64])).collect();
        let mut builder = quarry_pack::PackBuilder::new();
        objects.iter().for_each(|obj| builder.push(obj));
        builder.write(&dir.path().join("objects/pack"), "pack-batch").unwrap();
        assert!(!storage.has_object(&objects[0].compute_id()).unwrap());

        storage.reload_packs().unwrap();
        for obj in &objects {
            assert_eq!(*storage.get_object(&obj.compute_id()).unwrap(), *obj);
        }
    }

    #[test]
    fn config_sets_cache_budget() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "cache_capacity_bytes = 100\n").unwrap();
        let storage = Storage::init(dir.path()).unwrap();
        assert_eq!(storage.config().cache_capacity_bytes, 100);
        assert_eq!(storage.cache().capacity(), 100);

        let a = storage.put_object(&StoredObject::blob(vec![1; 60])).unwrap();
        let b = storage.put_object(&StoredObject::blob(vec![2; 60])).unwrap();
        storage.get_object(&a).unwrap();
        storage.get_object(&b).unwrap();
        assert!(!storage.cache().contains(&a));
        assert!(storage.cache().contains(&b));
    }

    #[test]
    fn explicit_options_skip_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "cache_capacity_bytes = 100\n").unwrap();
        let options = StorageOptions {
            cache_capacity_bytes: 4096,
            ..StorageOptions::default()
        };
        let storage = Storage::with_options(dir.path(), options).unwrap();
        assert_eq!(storage.cache().capacity(), 4096);
    }

    #[test]
    fn refs_pass_through() {
        let (_dir, storage) = storage();
        let id = storage.put_object(&StoredObject::blob(b"c".to_vec())).unwrap();
        storage.set_ref("refs/heads/main", id).unwrap();
        assert_eq!(storage.resolve_ref("HEAD").unwrap(), Some(id));
        storage.set_symbolic_ref("refs/heads/alias", "refs/heads/main").unwrap();
        assert_eq!(storage.resolve_ref("refs/heads/alias").unwrap(), Some(id));
        assert_eq!(storage.iter_refs().unwrap().count(), 2);
    }

    #[test]
    fn concurrent_readers_share_one_storage() {
        let (_dir, storage) = storage();
        let ids: Vec<_> = (0..16u8)
            .map(|i| storage.put_object(&StoredObject::blob(vec![i; 128])).unwrap())
            .collect();
        let storage = Arc::new(storage);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let ids = ids.clone();
                std::thread::spawn(move || {
                    for id in &ids {
                        assert_eq!(storage.get_object(id).unwrap().size, 128);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(storage.cache().len(), ids.len());
    }
}
