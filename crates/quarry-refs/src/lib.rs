//! Reference management for Quarry.
//!
//! References are the mutable, human-readable entry points into the object
//! graph: branches (`refs/heads/*`), tags (`refs/tags/*`), remote-tracking
//! refs (`refs/remotes/*`) and the symbolic `HEAD`.
//!
//! # Modules
//!
//! - [`error`]: Error types for ref operations
//! - [`types`]: [`Ref`] and [`RefTarget`]
//! - [`traits`]: The [`RefStore`] trait defining the storage interface
//! - [`names`]: Ref name validation
//! - [`fs`]: [`FsRefStore`], loose ref files plus `packed-refs`

pub mod error;
pub mod fs;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use fs::FsRefStore;
pub use names::validate_ref_name;
pub use traits::RefStore;
pub use types::{Ref, RefTarget, HEAD};
