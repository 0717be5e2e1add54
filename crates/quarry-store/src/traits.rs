use std::sync::Arc;

use quarry_types::{ObjectId, StoredObject};

use crate::error::{StoreError, StoreResult};

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written; the same data always produces the
///   same ID, so writing an object twice is a no-op.
/// - Concurrent reads are always safe.
/// - The store never interprets object contents.
/// - A missing object is `Ok(None)` from [`read`](Self::read); I/O failures
///   and corruption are `Err`.
pub trait ObjectStore: Send + Sync {
    /// Read an object by its content-addressed ID.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<Arc<StoredObject>>>;

    /// Write an object and return its content-addressed ID.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Check whether an object exists in the store.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Read an object, mapping absence to [`StoreError::ObjectNotFound`].
    fn get(&self, id: &ObjectId) -> StoreResult<Arc<StoredObject>> {
        self.read(id)?.ok_or(StoreError::ObjectNotFound(*id))
    }

    /// Write multiple objects and return their IDs.
    ///
    /// Default implementation calls `write()` for each object.
    fn write_batch(&self, objects: &[StoredObject]) -> StoreResult<Vec<ObjectId>> {
        objects.iter().map(|obj| self.write(obj)).collect()
    }
}
