use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::{StoreError, StoreResult};

/// File name of the per-repository storage config.
pub const CONFIG_FILE: &str = "config.toml";

/// Tunables for a [`Storage`](crate::Storage) instance.
///
/// Read from `<root>/config.toml` when present; every field has a default so
/// a partial file only overrides what it names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Byte budget of the object cache.
    pub cache_capacity_bytes: u64,
    /// Recompute and check the hash of every loose object on read.
    pub verify_on_read: bool,
    /// zstd level for newly written loose objects.
    pub compression_level: i32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY,
            verify_on_read: true,
            compression_level: 3,
        }
    }
}

impl StorageOptions {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load `<root>/config.toml`, falling back to defaults when absent.
    pub fn load_from(root: &Path) -> StoreResult<Self> {
        match std::fs::read_to_string(root.join(CONFIG_FILE)) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}
