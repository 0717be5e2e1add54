use std::io;
use std::path::{Path, PathBuf};

use quarry_types::{ObjectId, StoredObject};

use crate::error::{PackError, PackResult};
use crate::reader::PackReader;

/// Every usable pack in a repository's `objects/pack` directory.
///
/// Packs are consulted in file-name order so lookups are deterministic even
/// when two packs carry the same object.
#[derive(Debug)]
pub struct PackSet {
    pack_dir: PathBuf,
    packs: Vec<PackReader>,
}

impl PackSet {
    /// Load all packs from `pack_dir`. A missing directory is an empty set.
    ///
    /// Packs without an index, and packs that fail to open, are skipped
    /// with a warning rather than failing the whole load.
    pub fn load(pack_dir: &Path) -> PackResult<Self> {
        let mut paths = Vec::new();
        match std::fs::read_dir(pack_dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if path.extension().is_some_and(|e| e == "pack") {
                        paths.push(path);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        paths.sort();

        let mut packs = Vec::with_capacity(paths.len());
        for path in paths {
            match PackReader::open(&path) {
                Ok(reader) => packs.push(reader),
                Err(PackError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "pack has no index, skipping");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pack");
                }
            }
        }

        Ok(Self {
            pack_dir: pack_dir.to_path_buf(),
            packs,
        })
    }

    /// An empty set rooted nowhere.
    pub fn empty() -> Self {
        Self {
            pack_dir: PathBuf::new(),
            packs: Vec::new(),
        }
    }

    /// Read an object from the first pack that holds it.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<StoredObject>> {
        for pack in &self.packs {
            if let Some(obj) = pack.read_object(id)? {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.packs.iter().any(|p| p.contains(id))
    }

    /// Total objects across all packs.
    pub fn total_objects(&self) -> usize {
        self.packs.iter().map(|p| p.object_count()).sum()
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    pub fn pack_dir(&self) -> &Path {
        &self.pack_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PackBuilder;

    fn write_pack(dir: &Path, name: &str, payloads: &[&[u8]]) -> Vec<ObjectId> {
        let mut builder = PackBuilder::new();
        let mut ids = Vec::new();
        for payload in payloads {
            let obj = StoredObject::blob(payload.to_vec());
            ids.push(obj.compute_id());
            builder.push(&obj);
        }
        builder.write(dir, name).unwrap();
        ids
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = PackSet::load(&dir.path().join("nope")).unwrap();
        assert_eq!(set.pack_count(), 0);
        assert!(!set.contains(&ObjectId::null()));
        assert!(set.read_object(&ObjectId::null()).unwrap().is_none());
        assert_eq!(PackSet::empty().total_objects(), 0);
    }

    #[test]
    fn loads_every_indexed_pack() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pack(dir.path(), "pack-a", &[b"one", b"two"]);
        let b = write_pack(dir.path(), "pack-b", &[b"three"]);

        let set = PackSet::load(dir.path()).unwrap();
        assert_eq!(set.pack_count(), 2);
        assert_eq!(set.total_objects(), 3);
        for id in a.iter().chain(&b) {
            assert!(set.read_object(id).unwrap().is_some());
        }
    }

    #[test]
    fn pack_without_index_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-a", &[b"indexed"]);
        let orphan = write_pack(dir.path(), "pack-b", &[b"orphan"]);
        std::fs::remove_file(dir.path().join("pack-b.idx")).unwrap();

        let set = PackSet::load(dir.path()).unwrap();
        assert_eq!(set.pack_count(), 1);
        assert!(!set.contains(&orphan[0]));
    }

    #[test]
    fn corrupt_index_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), "pack-a", &[b"fine"]);
        write_pack(dir.path(), "pack-b", &[b"broken"]);
        std::fs::write(dir.path().join("pack-b.idx"), b"garbage").unwrap();

        let set = PackSet::load(dir.path()).unwrap();
        assert_eq!(set.pack_count(), 1);
    }
}
