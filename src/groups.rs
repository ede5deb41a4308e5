//! Group directory: maps participant tokens to group names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("Failed to read group directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed group directory {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Group name {0:?} cannot be used as a storage directory")]
    InvalidGroupName(String),
}

/// Read-only token -> group mapping.
#[derive(Debug, Clone, Default)]
pub struct GroupDirectory {
    groups: HashMap<String, String>,
}

impl GroupDirectory {
    /// Build a directory, rejecting group names that are not a single path
    /// component.
    pub fn new(groups: HashMap<String, String>) -> Result<Self, GroupError> {
        if let Some(bad) = groups.values().find(|g| !is_valid_group_name(g)) {
            return Err(GroupError::InvalidGroupName(bad.clone()));
        }
        Ok(Self { groups })
    }

    /// Load the directory from a JSON object of `{"token": "group"}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GroupError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| GroupError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let groups: HashMap<String, String> =
            serde_json::from_str(&contents).map_err(|source| GroupError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(groups)
    }

    /// Resolve the group a token belongs to. Unknown tokens have no group.
    pub fn group_for_token(&self, token: &str) -> Option<&str> {
        if token.is_empty() {
            return None;
        }
        self.groups.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group names become directories under the storage root.
fn is_valid_group_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
