//! Custom LSP messages of the fragment filesystem
//!
//! The client mounts the `fragments` scheme as a read/write filesystem and
//! forwards its operations as `fragments/*` requests. Change batches flow
//! the other way as `fragments/didChangeFiles` notifications.

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::notification::Notification;

use super::fragment_fs::{FileKind, FileStat};
use super::sync::{ChangeBatch, ChangeKind};

pub const STAT: &str = "fragments/stat";
pub const READ_FILE: &str = "fragments/readFile";
pub const WRITE_FILE: &str = "fragments/writeFile";
pub const READ_DIRECTORY: &str = "fragments/readDirectory";
pub const RENAME: &str = "fragments/rename";
pub const DELETE: &str = "fragments/delete";
pub const CREATE_DIRECTORY: &str = "fragments/createDirectory";
pub const WATCH: &str = "fragments/watch";

/// Params of requests addressing a single virtual file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriParams {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchParams {
    pub uri: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    pub old_uri: String,
    pub new_uri: String,
}

/// File content travels as UTF-8 text; fragments are always text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileParams {
    pub uri: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileResult {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileResult {
    /// Whether the client accepted the host edit
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: FileKind,
}

pub type StatResult = FileStat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileChangeKind {
    Changed,
    Deleted,
}

impl From<ChangeKind> for FileChangeKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Changed => FileChangeKind::Changed,
            ChangeKind::Deleted => FileChangeKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub uri: String,
    pub kind: FileChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidChangeFilesParams {
    pub changes: Vec<FileChange>,
}

impl From<&ChangeBatch> for DidChangeFilesParams {
    fn from(batch: &ChangeBatch) -> Self {
        DidChangeFilesParams {
            changes: batch
                .changes
                .iter()
                .map(|change| FileChange {
                    uri: change.id.encode(),
                    kind: change.kind.into(),
                })
                .collect(),
        }
    }
}

/// `fragments/didChangeFiles`, one per synchronization pass
#[derive(Debug)]
pub enum DidChangeFiles {}

impl Notification for DidChangeFiles {
    type Params = DidChangeFilesParams;
    const METHOD: &'static str = "fragments/didChangeFiles";
}
