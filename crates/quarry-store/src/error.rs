use quarry_pack::PackError;
use quarry_refs::RefError;
use quarry_types::ObjectId;

/// Errors from object storage operations.
///
/// Each variant names the layer that failed so callers can decide on retry
/// policy; this crate never retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object is in neither the cache nor the backend.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// No `modules/<name>` subtree exists.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// A module name that would escape the modules directory.
    #[error("invalid module name {name:?}: {reason}")]
    InvalidModuleName { name: String, reason: String },

    /// The object data is malformed or does not hash to its ID.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ref error: {0}")]
    Ref(#[from] RefError),

    #[error("pack error: {0}")]
    Pack(#[from] PackError),

    /// `config.toml` exists but cannot be parsed.
    #[error("invalid storage config: {0}")]
    Config(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
