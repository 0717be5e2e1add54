//! Filesystem storage backend.
//!
//! Layout under the repository root:
//!
//! ```text
//! objects/ab/cdef...     loose objects, zstd("<kind> <size>\0" + payload)
//! objects/pack/*.pack    packs, each with a sibling .idx
//! refs/, packed-refs     see quarry_refs::FsRefStore
//! HEAD
//! config.toml            StorageOptions
//! modules/<name>/        nested repositories with the same layout
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use quarry_pack::PackSet;
use quarry_refs::{FsRefStore, Ref, RefStore, RefTarget, HEAD};
use quarry_types::{ObjectId, StoredObject};
use tracing::{debug, info};

use crate::config::StorageOptions;
use crate::error::{StoreError, StoreResult};
use crate::loose;
use crate::traits::ObjectStore;

const OBJECTS_DIR: &str = "objects";
const PACK_DIR: &str = "pack";
const MODULES_DIR: &str = "modules";

/// Durable object and ref store rooted at a directory.
///
/// Loose objects are consulted before packs, so a loose copy of an object
/// wins over a packed one. Refs are delegated to an [`FsRefStore`] over the
/// same root.
pub struct FilesystemBackend {
    root: PathBuf,
    objects_dir: PathBuf,
    /// Swapped whole by `reload_packs`; readers clone the `Arc` and release
    /// the lock before touching pack data.
    packs: RwLock<Arc<PackSet>>,
    refs: FsRefStore,
    verify_on_read: bool,
    compression_level: i32,
}

impl FilesystemBackend {
    /// Open an existing repository directory.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let options = StorageOptions::load_from(&root)?;
        Self::open_with_options(root, &options)
    }

    /// Open with explicit options instead of reading `config.toml`.
    pub fn open_with_options(root: impl Into<PathBuf>, options: &StorageOptions) -> StoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("repository root {} is not a directory", root.display()),
            )));
        }
        let objects_dir = root.join(OBJECTS_DIR);
        let packs = PackSet::load(&objects_dir.join(PACK_DIR))?;
        debug!(
            root = %root.display(),
            packs = packs.pack_count(),
            "opened filesystem backend"
        );
        Ok(Self {
            refs: FsRefStore::new(root.clone()),
            root,
            objects_dir,
            packs: RwLock::new(Arc::new(packs)),
            verify_on_read: options.verify_on_read,
            compression_level: options.compression_level,
        })
    }

    /// Create the directory skeleton (if missing) and open it.
    ///
    /// A fresh repository gets `HEAD` pointing at `refs/heads/main`.
    pub fn init(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR).join(PACK_DIR))?;
        fs::create_dir_all(root.join("refs").join("heads"))?;
        fs::create_dir_all(root.join("refs").join("tags"))?;
        let backend = Self::open(root)?;
        if backend.refs.read_ref(HEAD)?.is_none() {
            backend.refs.set_head_symbolic("refs/heads/main")?;
        }
        info!(root = %backend.root.display(), "initialized repository");
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn loose_path(&self, id: &ObjectId) -> PathBuf {
        let (dir, file) = id.loose_path_components();
        self.objects_dir.join(dir).join(file)
    }

    fn pack_dir(&self) -> PathBuf {
        self.objects_dir.join(PACK_DIR)
    }

    fn current_packs(&self) -> Arc<PackSet> {
        Arc::clone(&self.packs.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn read_loose(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let bytes = match fs::read(self.loose_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let obj = loose::decode(id, &bytes)?;
        if self.verify_on_read && obj.compute_id() != *id {
            return Err(StoreError::CorruptObject {
                id: *id,
                reason: "content does not hash to its ID".into(),
            });
        }
        Ok(Some(obj))
    }

    /// Rescan `objects/pack`, picking up packs written since open.
    pub fn reload_packs(&self) -> StoreResult<()> {
        let packs = PackSet::load(&self.pack_dir())?;
        debug!(packs = packs.pack_count(), objects = packs.total_objects(), "reloaded packs");
        *self.packs.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(packs);
        Ok(())
    }

    /// Number of packs currently loaded.
    pub fn pack_count(&self) -> usize {
        self.current_packs().pack_count()
    }

    // ----- refs -----

    pub fn refs(&self) -> &FsRefStore {
        &self.refs
    }

    pub fn get_ref(&self, name: &str) -> StoreResult<Option<RefTarget>> {
        Ok(self.refs.read_ref(name)?)
    }

    /// Point a ref directly at an object.
    pub fn set_ref(&self, name: &str, id: ObjectId) -> StoreResult<()> {
        Ok(self.refs.write_ref(name, &RefTarget::Direct(id))?)
    }

    pub fn set_symbolic_ref(&self, name: &str, target: &str) -> StoreResult<()> {
        Ok(self.refs.write_ref(name, &RefTarget::Symbolic(target.to_string()))?)
    }

    pub fn delete_ref(&self, name: &str) -> StoreResult<bool> {
        Ok(self.refs.delete_ref(name)?)
    }

    /// Follow symbolic refs to an object ID.
    pub fn resolve_ref(&self, name: &str) -> StoreResult<Option<ObjectId>> {
        Ok(self.refs.resolve(name)?)
    }

    /// All refs under `refs/`, sorted by name. Each call rescans the store.
    pub fn iter_refs(&self) -> StoreResult<std::vec::IntoIter<Ref>> {
        Ok(self.refs.list_refs("refs/")?.into_iter())
    }

    pub fn head(&self) -> StoreResult<Option<RefTarget>> {
        Ok(self.refs.head()?)
    }

    pub fn set_head_symbolic(&self, target: &str) -> StoreResult<()> {
        Ok(self.refs.set_head_symbolic(target)?)
    }

    // ----- modules -----

    /// Root directory of the named submodule's repository.
    pub fn module_root(&self, name: &str) -> StoreResult<PathBuf> {
        validate_module_name(name)?;
        let path = name
            .split('/')
            .fold(self.root.join(MODULES_DIR), |path, part| path.join(part));
        if path.is_dir() {
            Ok(path)
        } else {
            Err(StoreError::ModuleNotFound(name.to_string()))
        }
    }

    /// Names of every directory directly under `modules/`, sorted.
    pub fn module_names(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(self.root.join(MODULES_DIR)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Module names are relative paths below `modules/` without `.` or `..`
/// components.
fn validate_module_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidModuleName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.contains('\0') || name.contains('\\') {
        return Err(invalid("contains a forbidden character"));
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(invalid("must be a plain relative path")),
        }
    }
    if name.split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

impl ObjectStore for FilesystemBackend {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<Arc<StoredObject>>> {
        if let Some(obj) = self.read_loose(id)? {
            return Ok(Some(Arc::new(obj)));
        }
        Ok(self.current_packs().read_object(id)?.map(Arc::new))
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if self.exists(&id)? {
            debug!(id = %id.short_hex(), "object already stored");
            return Ok(id);
        }

        let path = self.loose_path(&id);
        let dir = path.parent().unwrap_or(&self.objects_dir);
        fs::create_dir_all(dir)?;
        let encoded = loose::encode(object, self.compression_level)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        debug!(id = %id.short_hex(), kind = %object.kind, size = object.size, "wrote loose object");
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        if self.loose_path(id).is_file() {
            return Ok(true);
        }
        Ok(self.current_packs().contains(id))
    }
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("root", &self.root)
            .field("packs", &self.pack_count())
            .finish()
    }
}
