use ropey::Rope;
use thiserror::Error;

use tower_lsp::lsp_types::Url;

use crate::language_regions::HostId;

/// One replacement applied to a host document, in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub offset: usize,
    pub replaced_len: usize,
    pub text: String,
}

impl TextDelta {
    pub fn new(offset: usize, replaced_len: usize, text: impl Into<String>) -> Self {
        TextDelta {
            offset,
            replaced_len,
            text: text.into(),
        }
    }
}

/// State for an open host document tracked by the server.
#[derive(Debug)]
pub struct HostDocumentState {
    pub uri: Url,
    pub host_id: HostId,
    pub language_id: String,
    pub text: Rope,
    /// Last version reported by the client, if any.
    pub version: Option<i32>,
}

/// A change arrived for a version the document has already moved past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("version {version} not newer than {current}")]
pub struct StaleVersion {
    pub version: i32,
    pub current: i32,
}
