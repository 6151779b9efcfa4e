//! Workspace identity: canonical root path and the hash used to namespace
//! physical collection names.

use crate::vector::CollectionKind;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hex characters of the root digest kept in physical names.
const HASH_LEN: usize = 16;

/// Stable identity of a workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey {
    root: PathBuf,
    id: String,
    hash: String,
}

impl WorkspaceKey {
    /// Resolve a root path. Existing paths are canonicalized (symlinks and
    /// `..` resolved); missing ones are made absolute so the same spelling
    /// always maps to the same key.
    pub fn resolve(root: &Path) -> std::io::Result<Self> {
        let root = match std::fs::canonicalize(root) {
            Ok(canonical) => canonical,
            Err(_) => std::path::absolute(root)?,
        };
        let id = root.to_string_lossy().into_owned();
        let digest = Sha256::digest(root.as_os_str().as_encoded_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(HASH_LEN);
        Ok(Self { root, id, hash })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Display form of the root, used in notifications. Not unique for
    /// roots that are not valid UTF-8; use [`hash`](Self::hash) as a key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Digest prefix of the raw root path bytes.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Physical table name for a collection of this workspace.
    pub fn physical_name(&self, kind: &CollectionKind) -> String {
        format!("ws_{}_{}", self.hash, kind)
    }

    /// Directory holding this workspace's private store.
    pub fn store_dir(&self, storage_dir: Option<&Path>) -> PathBuf {
        match storage_dir {
            Some(base) => base.join(&self.hash),
            None => self.root.join(".semantic-store").join("vectors"),
        }
    }
}
