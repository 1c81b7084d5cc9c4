//! Virtual filesystem view over fragments
//!
//! Each tracked host is a directory (`fragments://<host>/`) whose files are
//! its fragments (`frag<index>.<tag>`). Reading a file returns the fragment
//! content; writing one splices the new content back into the host. The
//! namespace is derived from the host, so it cannot be restructured.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::language_regions::{HostId, VirtualId};
use crate::lsp::sync::{ChangeBatch, HostEdit, SyncController, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    File,
    Directory,
}

/// Metadata of a virtual file; times are milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: FileKind,
    pub ctime: i64,
    pub mtime: i64,
    pub size: usize,
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("{0} is not supported on fragment files")]
    NotSupported(&'static str),
    #[error("content written to {0} is not valid UTF-8")]
    InvalidUtf8(String),
}

impl FsError {
    fn not_found(uri: &str, cause: impl std::fmt::Display) -> Self {
        debug!("Fragment lookup for {} failed: {}", uri, cause);
        FsError::FileNotFound(uri.to_string())
    }
}

/// Filesystem operations over the fragments of tracked host documents
#[derive(Debug, Clone)]
pub struct FragmentFileSystem {
    sync: Arc<SyncController>,
}

impl FragmentFileSystem {
    pub fn new(sync: Arc<SyncController>) -> Self {
        FragmentFileSystem { sync }
    }

    fn resolve(uri: &str) -> Result<VirtualId, FsError> {
        VirtualId::decode(uri).map_err(|e| FsError::not_found(uri, e))
    }

    pub fn stat(&self, uri: &str) -> Result<FileStat, FsError> {
        let id = Self::resolve(uri)?;
        let fragment = self.sync.fragment(&id).map_err(|e| FsError::not_found(uri, e))?;
        Ok(FileStat {
            kind: FileKind::File,
            ctime: fragment.created_at,
            mtime: fragment.modified_at,
            size: fragment.len(),
        })
    }

    pub fn read_file(&self, uri: &str) -> Result<Vec<u8>, FsError> {
        let id = Self::resolve(uri)?;
        let document = self
            .sync
            .fragment_document(&id)
            .map_err(|e| FsError::not_found(uri, e))?;
        Ok(document.content.into_bytes())
    }

    /// Replaces a fragment's content and returns the resulting host edit
    pub fn write_file(&self, uri: &str, content: &[u8]) -> Result<(HostEdit, ChangeBatch), FsError> {
        let id = Self::resolve(uri)?;
        let content = std::str::from_utf8(content).map_err(|_| FsError::InvalidUtf8(uri.to_string()))?;
        self.sync
            .write_fragment(&id, content)
            .map_err(|e: SyncError| FsError::not_found(uri, e))
    }

    /// Lists `frag<index>.<tag>` entries of a host directory, in index order
    pub fn read_directory(&self, uri: &str) -> Result<Vec<(String, FileKind)>, FsError> {
        let host = HostId::from_directory_uri(uri).map_err(|e| FsError::not_found(uri, e))?;
        let collection = self
            .sync
            .fragments(&host)
            .ok_or_else(|| FsError::not_found(uri, "host not tracked"))?;
        Ok(collection
            .virtual_ids()
            .into_iter()
            .map(|id| (id.file_name(), FileKind::File))
            .collect())
    }

    pub fn rename(&self, _from: &str, _to: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported("rename"))
    }

    pub fn delete(&self, _uri: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported("delete"))
    }

    pub fn create_directory(&self, _uri: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported("createDirectory"))
    }

    /// Only non-recursive watches are accepted; change batches drive them.
    pub fn watch(&self, _uri: &str, recursive: bool) -> Result<(), FsError> {
        if recursive {
            return Err(FsError::NotSupported("recursive watch"));
        }
        Ok(())
    }
}
