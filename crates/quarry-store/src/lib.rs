//! Object storage for Quarry.
//!
//! A repository on disk is a directory of loose objects, packs, refs and an
//! optional `config.toml`. This crate layers three pieces over it:
//!
//! - [`FilesystemBackend`] -- durable loose + pack object storage and ref
//!   access for one repository root
//! - [`ObjectCache`] -- a byte-budgeted LRU of decoded objects
//! - [`Storage`] -- the facade callers use: cache in front of the backend,
//!   plus [`Storage::module`] for submodule repositories under `modules/`
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written; writing the same object twice is a no-op.
//! 2. Loose objects shadow packed copies of the same ID.
//! 3. Reads may populate the cache; writes never do.
//! 4. The cache lock is never held across backend I/O.
//! 5. A missing object (`ObjectNotFound`) is distinct from a failed read (`Io`).

pub mod cache;
pub mod config;
pub mod error;
pub mod fs;
pub mod loose;
pub mod module;
pub mod storage;
pub mod traits;

pub use cache::{CacheStats, ObjectCache, DEFAULT_CACHE_CAPACITY};
pub use config::StorageOptions;
pub use error::{StoreError, StoreResult};
pub use fs::FilesystemBackend;
pub use storage::Storage;
pub use traits::ObjectStore;
