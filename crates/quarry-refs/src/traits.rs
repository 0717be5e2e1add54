//! The [`RefStore`] trait defining the reference storage interface.

use quarry_types::ObjectId;

use crate::error::{RefError, Result};
use crate::types::{Ref, RefTarget, HEAD};

/// Maximum number of symbolic hops followed by [`RefStore::resolve`].
pub const MAX_SYMBOLIC_DEPTH: usize = 5;

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`). A single ref update
/// is atomic: concurrent readers observe either the old or the new target,
/// never a partially written one. Writers to the same ref are serialized.
pub trait RefStore: Send + Sync {
    /// Read a ref by its canonical name (e.g. `refs/heads/main`).
    ///
    /// Returns `Ok(None)` if the ref does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<RefTarget>>;

    /// Create or update a ref.
    fn write_ref(&self, name: &str, target: &RefTarget) -> Result<()>;

    /// Delete a ref. Returns `Ok(true)` if it existed.
    fn delete_ref(&self, name: &str) -> Result<bool>;

    /// List all refs whose name starts with `prefix`, sorted by name.
    ///
    /// Pass `"refs/"` for everything under the refs namespace.
    fn list_refs(&self, prefix: &str) -> Result<Vec<Ref>>;

    /// Follow symbolic refs until an object ID is reached.
    ///
    /// Returns `Ok(None)` if any ref along the chain is missing.
    fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMBOLIC_DEPTH {
            match self.read_ref(&current)? {
                None => return Ok(None),
                Some(RefTarget::Direct(id)) => return Ok(Some(id)),
                Some(RefTarget::Symbolic(next)) => current = next,
            }
        }
        Err(RefError::SymbolicLoop {
            name: name.to_string(),
        })
    }

    /// Read HEAD.
    fn head(&self) -> Result<Option<RefTarget>> {
        self.read_ref(HEAD)
    }

    /// Point HEAD at a branch ref (symbolic).
    fn set_head_symbolic(&self, target: &str) -> Result<()> {
        self.write_ref(HEAD, &RefTarget::Symbolic(target.to_string()))
    }
}
