//! Pack files for Quarry.
//!
//! A pack bundles many objects into one file of zstd-compressed,
//! CRC-checked entries. A companion index maps IDs to entry offsets so
//! single objects can be read without scanning. This crate only reads
//! packs; the `format` module documents the layout.
//!
//! - [`PackIndex`]: parsed `.idx` with fan-out lookup
//! - [`PackReader`]: memory-mapped reads through the index
//! - [`PackSet`]: every indexed pack under `objects/pack`
//!
//! The `testing` feature adds `PackBuilder`, which writes packs for
//! fixtures and tests.

#[cfg(any(test, feature = "testing"))]
mod builder;
pub mod error;
mod format;
pub mod index;
pub mod reader;
pub mod set;

#[cfg(any(test, feature = "testing"))]
pub use builder::PackBuilder;
pub use error::{PackError, PackResult};
pub use index::{IndexEntry, PackIndex};
pub use reader::PackReader;
pub use set::PackSet;
