//! Foundation types for Quarry.
//!
//! Every other Quarry crate depends on `quarry-types` for the object
//! identifier and the domain-separated content hasher.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Content-addressed identifier (BLAKE3 hash)
//! - [`ContentHasher`]: Hasher that binds an object's kind into its identity
//! - [`StoredObject`]: Kind tag plus undecoded payload, the unit of storage

pub mod error;
pub mod hasher;
pub mod object;
pub mod stored;

pub use error::TypeError;
pub use hasher::ContentHasher;
pub use object::{ObjectId, OBJECT_ID_LEN};
pub use stored::{ObjectKind, StoredObject};
