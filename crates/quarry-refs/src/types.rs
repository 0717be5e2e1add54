//! Core reference types.

use std::fmt;

use quarry_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{RefError, Result};

/// Name of the repository's current-branch pointer.
pub const HEAD: &str = "HEAD";

const SYMBOLIC_PREFIX: &str = "ref: ";

/// What a reference points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefTarget {
    /// Points directly at an object.
    Direct(ObjectId),
    /// Points at another ref by name (e.g. `HEAD` -> `refs/heads/main`).
    Symbolic(String),
}

impl RefTarget {
    /// The object this target names directly, if any.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// Encode as the single line stored in a loose ref file.
    pub fn to_file_contents(&self) -> String {
        match self {
            Self::Direct(id) => format!("{}\n", id.to_hex()),
            Self::Symbolic(target) => format!("{SYMBOLIC_PREFIX}{target}\n"),
        }
    }

    /// Parse the contents of a loose ref file.
    pub fn parse_file_contents(name: &str, contents: &str) -> Result<Self> {
        let line = contents.trim_end();
        if let Some(target) = line.strip_prefix(SYMBOLIC_PREFIX) {
            return Ok(Self::Symbolic(target.trim().to_string()));
        }
        ObjectId::from_hex(line)
            .map(Self::Direct)
            .map_err(|e| RefError::Corrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(id) => write!(f, "{id}"),
            Self::Symbolic(target) => write!(f, "{SYMBOLIC_PREFIX}{target}"),
        }
    }
}

/// A named reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Canonical name (e.g. `refs/heads/main`).
    pub name: String,
    pub target: RefTarget,
}

impl Ref {
    pub fn new(name: impl Into<String>, target: RefTarget) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Short name without the namespace prefix (`refs/heads/main` -> `main`).
    pub fn short_name(&self) -> &str {
        ["refs/heads/", "refs/tags/", "refs/remotes/", "refs/"]
            .iter()
            .find_map(|prefix| self.name.strip_prefix(prefix))
            .unwrap_or(&self.name)
    }

    pub fn is_branch(&self) -> bool {
        self.name.starts_with("refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.name.starts_with("refs/tags/")
    }
}
