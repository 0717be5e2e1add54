//! Submodule storage.
//!
//! A submodule's repository lives at `modules/<name>` under its parent and
//! has the same layout. Each call to [`Storage::module`] opens an
//! independent [`Storage`] with its own default-sized cache; no state is
//! shared with the parent or with other handles to the same module beyond
//! what is on disk.
//!
//! Module names may be nested (`libs/core`) but never leave `modules/`.

use tracing::debug;

use crate::cache::{ObjectCache, DEFAULT_CACHE_CAPACITY};
use crate::config::StorageOptions;
use crate::error::StoreResult;
use crate::fs::FilesystemBackend;
use crate::storage::Storage;

impl Storage {
    /// Open storage for the named submodule.
    ///
    /// The module's own `config.toml` supplies backend options. Its
    /// `cache_capacity_bytes` is overridden: module caches always get
    /// [`DEFAULT_CACHE_CAPACITY`], and the returned `config()` says so.
    ///
    /// Fails with [`StoreError::ModuleNotFound`](crate::StoreError::ModuleNotFound)
    /// if `modules/<name>` does not exist.
    pub fn module(&self, name: &str) -> StoreResult<Storage> {
        let root = self.backend().module_root(name)?;
        let mut options = StorageOptions::load_from(&root)?;
        options.cache_capacity_bytes = DEFAULT_CACHE_CAPACITY;
        let backend = FilesystemBackend::open_with_options(&root, &options)?;
        debug!(module = name, root = %root.display(), "opened module storage");
        Ok(Storage::from_parts(backend, ObjectCache::default(), options))
    }

    /// Names of the submodules present on disk.
    pub fn modules(&self) -> StoreResult<Vec<String>> {
        self.backend().module_names()
    }
}
