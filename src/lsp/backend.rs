use std::borrow::Cow;
use std::sync::Arc;

use tower_lsp::Client;
use tower_lsp::jsonrpc::{self, ErrorCode};
use tower_lsp::lsp_types::{CompletionParams, CompletionResponse};

use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::language_regions::{VirtualId, to_host_completion};
use crate::lsp::backend_service::BackendRegistry;
use crate::lsp::fragment_fs::{FragmentFileSystem, FsError};
use crate::lsp::protocol::{
    DidChangeFiles, DidChangeFilesParams, DirectoryEntry, ReadFileResult, RenameParams, StatResult, UriParams,
    WatchParams, WriteFileParams, WriteFileResult,
};
use crate::lsp::sync::{ChangeBatch, HostEdit, SyncController};

mod handlers;
mod state;

pub use state::{FragmentServices, FragmentsBackend};

const FILE_NOT_FOUND: i64 = -32001;
const NOT_SUPPORTED: i64 = -32002;

impl From<FsError> for jsonrpc::Error {
    fn from(e: FsError) -> Self {
        let code = match e {
            FsError::FileNotFound(_) => ErrorCode::ServerError(FILE_NOT_FOUND),
            FsError::NotSupported(_) => ErrorCode::ServerError(NOT_SUPPORTED),
            FsError::InvalidUtf8(_) => ErrorCode::InvalidParams,
        };
        jsonrpc::Error {
            code,
            message: Cow::Owned(e.to_string()),
            data: None,
        }
    }
}

/// The editor holding the host buffers a reverse sync edits
#[async_trait::async_trait]
pub trait HostEditor: Sync {
    /// Applies `edit` to the editor's copy of the host; true if it was applied
    async fn apply_host_edit(&self, edit: &HostEdit) -> bool;
}

#[async_trait::async_trait]
impl HostEditor for Client {
    async fn apply_host_edit(&self, edit: &HostEdit) -> bool {
        match self.apply_edit(edit.to_workspace_edit()).await {
            Ok(response) => {
                if !response.applied {
                    warn!(
                        "Client rejected edit for {}: {}",
                        edit.uri,
                        response.failure_reason.as_deref().unwrap_or("no reason given")
                    );
                }
                response.applied
            }
            Err(e) => {
                warn!("Failed to send edit for {}: {}", edit.uri, e);
                false
            }
        }
    }
}

impl FragmentServices {
    pub fn new(config: ServerConfig) -> Self {
        let sync = Arc::new(SyncController::new());
        FragmentServices {
            files: FragmentFileSystem::new(Arc::clone(&sync)),
            sync,
            backends: Arc::new(BackendRegistry::new(config)),
        }
    }

    /// Forwards a completion request inside a fragment to its language's backend
    ///
    /// Returns `Ok(None)` when the cursor is not inside a fragment, when no
    /// backend handles the fragment's language, or when the host changed
    /// under the fragment while the backend was answering.
    pub async fn completion(&self, params: CompletionParams) -> anyhow::Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some((id, fragment, local)) = self.sync.fragment_at_position(&uri, position) else {
            debug!("No fragment at {}:{:?}", uri, position);
            return Ok(None);
        };
        let Some(session) = self.backends.session(&id.language_tag).await else {
            return Ok(None);
        };

        let response = {
            let mut turn = session.turn().await;
            turn.sync_document(&id, &fragment.content).await?;
            turn.completion(&id, local, params.context).await?
        };
        let Some(response) = response else {
            return Ok(None);
        };

        Ok(self
            .sync
            .with_host(&uri, |state| {
                let current = self.sync.fragment(&id).ok()?;
                if current != fragment {
                    debug!("Fragment {} moved during completion, dropping result", id);
                    return None;
                }
                Some(to_host_completion(&fragment, response, state))
            })
            .flatten())
    }

    /// Reverse sync of a fragment file, holding its language backend's turn
    ///
    /// The write is spliced into the tracked host and offered to `editor`.
    /// If the editor applies it, the backend is brought up to date with the
    /// new content; if not, the host is reverted and the backend never sees
    /// it. Returns whether the editor applied the edit, and the batch to
    /// publish. Backend failures are logged.
    pub async fn write_file(
        &self,
        uri: &str,
        content: &str,
        editor: &dyn HostEditor,
    ) -> Result<(bool, ChangeBatch), FsError> {
        let id = VirtualId::decode(uri).map_err(|_| FsError::FileNotFound(uri.to_string()))?;
        let session = self.backends.session(&id.language_tag).await;
        let mut turn = match session.as_ref() {
            Some(session) => Some(session.turn().await),
            None => None,
        };

        let (edit, batch) = self.files.write_file(uri, content.as_bytes())?;
        if !editor.apply_host_edit(&edit).await {
            return match self.sync.revert_write(&edit) {
                Ok(reverted) => Ok((false, reverted)),
                Err(e) => {
                    warn!("Could not revert rejected edit of {}: {}", id, e);
                    Ok((false, batch))
                }
            };
        }

        if let Some(turn) = turn.as_mut() {
            let synced = match self.sync.fragment_document(&id) {
                Ok(document) => turn.sync_document(&id, &document.content).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = synced {
                warn!("Failed to sync {} to its backend: {}", id, e);
            }
        }
        Ok((true, batch))
    }

    /// Closes backend copies of fragments a batch reports as deleted
    pub async fn release_deleted(&self, batch: &ChangeBatch) {
        for id in batch.deleted() {
            let Some(session) = self.backends.running(&id.language_tag) else {
                continue;
            };
            if let Err(e) = session.turn().await.close_document(id).await {
                warn!("Failed to close {} in its backend: {}", id, e);
            }
        }
    }
}

impl FragmentsBackend {
    pub fn new(client: Client, config: ServerConfig) -> Self {
        FragmentsBackend {
            client,
            services: FragmentServices::new(config),
        }
    }

    pub fn services(&self) -> &FragmentServices {
        &self.services
    }

    /// Forwards a change batch to the client and releases deleted fragments
    pub(super) async fn publish(&self, batch: ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        self.client
            .send_notification::<DidChangeFiles>(DidChangeFilesParams::from(&batch))
            .await;
        self.services.release_deleted(&batch).await;
    }

    pub async fn stat(&self, params: UriParams) -> jsonrpc::Result<StatResult> {
        Ok(self.services.files.stat(&params.uri)?)
    }

    pub async fn read_file(&self, params: UriParams) -> jsonrpc::Result<ReadFileResult> {
        let bytes = self.services.files.read_file(&params.uri)?;
        let content = String::from_utf8(bytes).map_err(|_| FsError::InvalidUtf8(params.uri.clone()))?;
        Ok(ReadFileResult { content })
    }

    /// Reverse sync: splices the file into its host and asks the client to
    /// apply the same edit to its buffer
    pub async fn write_file(&self, params: WriteFileParams) -> jsonrpc::Result<WriteFileResult> {
        let (applied, batch) = self
            .services
            .write_file(&params.uri, &params.content, &self.client)
            .await?;
        self.publish(batch).await;
        Ok(WriteFileResult { applied })
    }

    pub async fn read_directory(&self, params: UriParams) -> jsonrpc::Result<Vec<DirectoryEntry>> {
        Ok(self
            .services
            .files
            .read_directory(&params.uri)?
            .into_iter()
            .map(|(name, kind)| DirectoryEntry { name, kind })
            .collect())
    }

    pub async fn rename(&self, params: RenameParams) -> jsonrpc::Result<()> {
        Ok(self.services.files.rename(&params.old_uri, &params.new_uri)?)
    }

    pub async fn delete(&self, params: UriParams) -> jsonrpc::Result<()> {
        Ok(self.services.files.delete(&params.uri)?)
    }

    pub async fn create_directory(&self, params: UriParams) -> jsonrpc::Result<()> {
        Ok(self.services.files.create_directory(&params.uri)?)
    }

    pub async fn watch(&self, params: WatchParams) -> jsonrpc::Result<()> {
        Ok(self.services.files.watch(&params.uri, params.recursive)?)
    }
}
