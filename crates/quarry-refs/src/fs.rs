//! Filesystem reference store.
//!
//! Layout under the repository root:
//!
//! ```text
//! HEAD                 "ref: refs/heads/main\n" or "<hex>\n"
//! refs/heads/main      "<hex>\n"
//! packed-refs          "<hex> <name>" lines, '#' comments, '^' peel lines
//! ```
//!
//! Loose ref files shadow `packed-refs` entries of the same name. Every
//! write goes to a temporary file in the destination directory and is
//! renamed into place, so readers never see a partial ref.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use quarry_types::ObjectId;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{RefError, Result};
use crate::names::validate_ref_name;
use crate::traits::RefStore;
use crate::types::{Ref, RefTarget};

const PACKED_REFS: &str = "packed-refs";

/// Ref store backed by loose ref files and an optional `packed-refs` file.
#[derive(Debug)]
pub struct FsRefStore {
    root: PathBuf,
    /// Per-name writer locks; readers never take these.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsRefStore {
    /// Create a ref store rooted at a repository directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The repository root this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        name.split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Hand back a lock from [`lock_for`](Self::lock_for), dropping its table
    /// entry when no other writer holds or waits on it.
    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the table, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    /// Run `f` while holding the writer lock for `name`.
    fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_for(name);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        self.release_lock(name, lock);
        result
    }

    #[cfg(test)]
    fn lock_table_len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn read_loose(&self, name: &str) -> Result<Option<RefTarget>> {
        match fs::read_to_string(self.ref_path(name)) {
            Ok(contents) => RefTarget::parse_file_contents(name, &contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // A directory at this path means `name` is a namespace, not a ref.
            Err(_) if self.ref_path(name).is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_packed(&self) -> Result<BTreeMap<String, ObjectId>> {
        let contents = match fs::read_to_string(self.root.join(PACKED_REFS)) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        parse_packed_refs(&contents)
    }

    fn write_packed(&self, refs: &BTreeMap<String, ObjectId>) -> Result<()> {
        let mut contents = String::from("# pack-refs with: sorted\n");
        for (name, id) in refs {
            contents.push_str(&format!("{} {name}\n", id.to_hex()));
        }
        write_atomic(&self.root.join(PACKED_REFS), contents.as_bytes())
    }
}

impl RefStore for FsRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<RefTarget>> {
        validate_ref_name(name)?;
        if let Some(target) = self.read_loose(name)? {
            return Ok(Some(target));
        }
        Ok(self.read_packed()?.remove(name).map(RefTarget::Direct))
    }

    fn write_ref(&self, name: &str, target: &RefTarget) -> Result<()> {
        validate_ref_name(name)?;
        if let RefTarget::Symbolic(to) = target {
            validate_ref_name(to)?;
        }

        self.with_lock(name, || {
            write_atomic(&self.ref_path(name), target.to_file_contents().as_bytes())
        })?;
        debug!(name, %target, "ref updated");
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        self.with_lock(name, || {
            let existed_loose = match fs::remove_file(self.ref_path(name)) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };

            let existed_packed = self.with_lock(PACKED_REFS, || {
                let mut packed = self.read_packed()?;
                let existed = packed.remove(name).is_some();
                if existed {
                    self.write_packed(&packed)?;
                }
                Ok(existed)
            })?;

            Ok(existed_loose || existed_packed)
        })
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<Ref>> {
        let mut refs: BTreeMap<String, RefTarget> = self
            .read_packed()?
            .into_iter()
            .map(|(name, id)| (name, RefTarget::Direct(id)))
            .collect();

        let refs_dir = self.root.join("refs");
        if refs_dir.is_dir() {
            for entry in WalkDir::new(&refs_dir).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    // Removed by a concurrent delete after the walk saw it.
                    Err(e) if is_not_found(e.io_error()) => continue,
                    Err(e) => return Err(RefError::Io(e.into())),
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                // Temporary files from in-flight atomic writes.
                if file_name.starts_with('.') || file_name.ends_with(".lock") {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let contents = match fs::read_to_string(entry.path()) {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let target = RefTarget::parse_file_contents(&name, &contents)?;
                refs.insert(name, target);
            }
        }

        Ok(refs
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| Ref::new(name, target))
            .collect())
    }
}

fn is_not_found(error: Option<&io::Error>) -> bool {
    error.is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// Parse `packed-refs` contents into a name -> id map.
pub fn parse_packed_refs(contents: &str) -> Result<BTreeMap<String, ObjectId>> {
    let mut refs = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
            continue;
        }
        let (hex, name) = line.split_once(' ').ok_or_else(|| RefError::Corrupt {
            name: PACKED_REFS.into(),
            reason: format!("malformed line: {line:?}"),
        })?;
        let id = ObjectId::from_hex(hex).map_err(|e| RefError::Corrupt {
            name: PACKED_REFS.into(),
            reason: e.to_string(),
        })?;
        refs.insert(name.trim().to_string(), id);
    }
    Ok(refs)
}

/// Write `contents` to `path` via a sibling temp file and an atomic rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RefError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HEAD;

    fn id(seed: &[u8]) -> ObjectId {
        ObjectId::from_bytes(seed)
    }

    #[test]
    fn write_and_read_direct_ref() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        let target = RefTarget::Direct(id(b"one"));

        store.write_ref("refs/heads/main", &target).unwrap();
        assert_eq!(store.read_ref("refs/heads/main").unwrap(), Some(target));
        assert!(dir.path().join("refs/heads/main").is_file());
    }

    #[test]
    fn missing_ref_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        assert_eq!(store.read_ref("refs/heads/nope").unwrap(), None);
        assert_eq!(store.resolve("refs/heads/nope").unwrap(), None);
    }

    #[test]
    fn namespace_directory_is_not_a_ref() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        store
            .write_ref("refs/heads/feature/a", &RefTarget::Direct(id(b"a")))
            .unwrap();
        assert_eq!(store.read_ref("refs/heads/feature").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"old")))
            .unwrap();
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"new")))
            .unwrap();
        assert_eq!(store.resolve("refs/heads/main").unwrap(), Some(id(b"new")));
    }

    #[test]
    fn symbolic_head_resolves_through_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"tip")))
            .unwrap();
        store.set_head_symbolic("refs/heads/main").unwrap();

        assert_eq!(
            store.head().unwrap(),
            Some(RefTarget::Symbolic("refs/heads/main".into()))
        );
        assert_eq!(store.resolve(HEAD).unwrap(), Some(id(b"tip")));
    }

    #[test]
    fn symbolic_loop_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        store
            .write_ref("refs/heads/a", &RefTarget::Symbolic("refs/heads/b".into()))
            .unwrap();
        store
            .write_ref("refs/heads/b", &RefTarget::Symbolic("refs/heads/a".into()))
            .unwrap();
        assert!(matches!(
            store.resolve("refs/heads/a"),
            Err(RefError::SymbolicLoop { .. })
        ));
    }

    #[test]
    fn invalid_names_are_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        let err = store
            .write_ref("refs/../escape", &RefTarget::Direct(id(b"x")))
            .unwrap_err();
        assert!(matches!(err, RefError::InvalidName { .. }));
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn packed_refs_are_read_and_shadowed_by_loose() {
        let dir = tempfile::tempdir().unwrap();
        let packed = format!(
            "# pack-refs with: peeled\n{} refs/heads/main\n{} refs/tags/v1\n^{}\n",
            id(b"packed-main").to_hex(),
            id(b"packed-tag").to_hex(),
            id(b"peeled").to_hex(),
        );
        fs::write(dir.path().join(PACKED_REFS), packed).unwrap();
        let store = FsRefStore::new(dir.path());

        assert_eq!(store.resolve("refs/tags/v1").unwrap(), Some(id(b"packed-tag")));
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"loose-main")))
            .unwrap();
        assert_eq!(store.resolve("refs/heads/main").unwrap(), Some(id(b"loose-main")));

        let all = store.list_refs("refs/").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "refs/heads/main");
        assert_eq!(all[0].target, RefTarget::Direct(id(b"loose-main")));
    }

    #[test]
    fn list_refs_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        for name in ["refs/tags/v1", "refs/heads/zeta", "refs/heads/alpha"] {
            store
                .write_ref(name, &RefTarget::Direct(id(name.as_bytes())))
                .unwrap();
        }
        let heads: Vec<String> = store
            .list_refs("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(heads, vec!["refs/heads/alpha", "refs/heads/zeta"]);
        assert_eq!(store.list_refs("refs/").unwrap().len(), 3);
    }

    #[test]
    fn delete_removes_loose_and_packed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PACKED_REFS),
            format!("{} refs/heads/old\n", id(b"old").to_hex()),
        )
        .unwrap();
        let store = FsRefStore::new(dir.path());
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"main")))
            .unwrap();

        assert!(store.delete_ref("refs/heads/main").unwrap());
        assert!(store.delete_ref("refs/heads/old").unwrap());
        assert!(!store.delete_ref("refs/heads/old").unwrap());
        assert!(store.list_refs("refs/").unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_leave_a_complete_value() {
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsRefStore::new(dir.path()));
        let candidates: Vec<ObjectId> = (0..8u8).map(|i| id(&[i])).collect();

        let handles: Vec<_> = candidates
            .iter()
            .copied()
            .map(|candidate| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..20 {
                        store
                            .write_ref("refs/heads/race", &RefTarget::Direct(candidate))
                            .unwrap();
                        let seen = store.resolve("refs/heads/race").unwrap().unwrap();
                        assert!((0..8u8).any(|i| id(&[i]) == seen));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer should not panic");
        }

        let last = store.resolve("refs/heads/race").unwrap().unwrap();
        assert!(candidates.contains(&last));
    }

    #[test]
    fn listing_tolerates_concurrent_deletes() {
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsRefStore::new(dir.path()));
        store
            .write_ref("refs/heads/main", &RefTarget::Direct(id(b"main")))
            .unwrap();

        let churn = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..200u32 {
                    let name = format!("refs/heads/topic-{}", round % 10);
                    store
                        .write_ref(&name, &RefTarget::Direct(id(&round.to_le_bytes())))
                        .unwrap();
                    store.delete_ref(&name).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let refs = store.list_refs("refs/").unwrap();
            assert!(refs.iter().any(|r| r.name == "refs/heads/main"));
        }
        churn.join().unwrap();
        assert_eq!(store.list_refs("refs/").unwrap().len(), 1);
    }

    #[test]
    fn writer_locks_are_released_after_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::new(dir.path());
        for i in 0..20u8 {
            let name = format!("refs/tags/v{i}");
            store.write_ref(&name, &RefTarget::Direct(id(&[i]))).unwrap();
        }
        store.delete_ref("refs/tags/v3").unwrap();
        assert_eq!(store.lock_table_len(), 0);
    }
}
