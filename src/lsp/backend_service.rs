//! Backend language servers for fragment content
//!
//! A backend analyses fragments of one language tag. Its connection is a
//! serialised resource: callers take a [`BackendTurn`] for the whole
//! request/response exchange, and later callers wait until it is dropped.
//! The turn also guards the per-document version counters, so what the
//! backend has been told about a fragment only changes inside a turn.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tower_lsp::lsp_types::{
    CompletionContext, CompletionParams, CompletionResponse, PartialResultParams, Position,
    TextDocumentIdentifier, TextDocumentPositionParams, Url, WorkDoneProgressParams,
};
use tracing::{debug, error, info, warn};

use crate::config::{BackendCommand, ServerConfig};
use crate::language_regions::{VirtualId, language_id_for_tag};
use crate::lsp::stdio_backend::StdioBackend;

/// Common interface for fragment analysis backends
///
/// Methods take `&mut self`: a backend is only ever driven from inside a
/// [`BackendTurn`], one exchange at a time.
#[async_trait::async_trait]
pub trait FragmentBackend: Send {
    async fn open_document(&mut self, uri: &Url, language_id: &str, version: i32, text: &str) -> anyhow::Result<()>;

    /// Replaces the full text of an open document
    async fn change_document(&mut self, uri: &Url, version: i32, text: &str) -> anyhow::Result<()>;

    async fn close_document(&mut self, uri: &Url) -> anyhow::Result<()>;

    async fn completion(&mut self, params: CompletionParams) -> anyhow::Result<Option<CompletionResponse>>;

    async fn shutdown(&mut self) -> anyhow::Result<()>;

    /// Get a human-readable name for this backend (for logging/debugging)
    fn backend_name(&self) -> String;
}

struct SessionState {
    backend: Box<dyn FragmentBackend>,
    /// Last version sent per fragment document
    versions: HashMap<VirtualId, i32>,
}

/// One backend connection, shared by everything that needs its language
pub struct BackendSession {
    language_tag: String,
    state: Arc<Mutex<SessionState>>,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("language_tag", &self.language_tag)
            .finish()
    }
}

impl BackendSession {
    pub fn new(language_tag: impl Into<String>, backend: Box<dyn FragmentBackend>) -> Self {
        BackendSession {
            language_tag: language_tag.into(),
            state: Arc::new(Mutex::new(SessionState {
                backend,
                versions: HashMap::new(),
            })),
        }
    }

    pub fn language_tag(&self) -> &str {
        &self.language_tag
    }

    /// Waits for exclusive use of the backend connection
    pub async fn turn(&self) -> BackendTurn {
        BackendTurn {
            language_tag: self.language_tag.clone(),
            state: Arc::clone(&self.state).lock_owned().await,
        }
    }
}

/// Exclusive request/response scope on a backend connection
///
/// Released when dropped, whether the exchange succeeded or not.
pub struct BackendTurn {
    language_tag: String,
    state: OwnedMutexGuard<SessionState>,
}

impl BackendTurn {
    /// Brings the backend's copy of a fragment document up to `content`
    ///
    /// The first sync opens the document at version 1; later ones send the
    /// full text with the next version.
    pub async fn sync_document(&mut self, id: &VirtualId, content: &str) -> anyhow::Result<()> {
        let uri = id.to_url()?;
        let state = &mut *self.state;
        match state.versions.get(id).copied() {
            Some(version) => {
                let version = version + 1;
                state.backend.change_document(&uri, version, content).await?;
                state.versions.insert(id.clone(), version);
            }
            None => {
                let language_id = language_id_for_tag(&id.language_tag);
                state.backend.open_document(&uri, language_id, 1, content).await?;
                state.versions.insert(id.clone(), 1);
            }
        }
        Ok(())
    }

    /// Tells the backend a fragment document is gone, if it ever saw it
    pub async fn close_document(&mut self, id: &VirtualId) -> anyhow::Result<()> {
        if self.state.versions.remove(id).is_some() {
            let uri = id.to_url()?;
            self.state.backend.close_document(&uri).await?;
        }
        Ok(())
    }

    pub async fn completion(
        &mut self,
        id: &VirtualId,
        position: Position,
        context: Option<CompletionContext>,
    ) -> anyhow::Result<Option<CompletionResponse>> {
        let params = CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: id.to_url()? },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context,
        };
        debug!("Requesting completion from {} backend for {}", self.language_tag, id);
        self.state.backend.completion(params).await
    }

    /// Version last sent for a fragment document
    pub fn version(&self, id: &VirtualId) -> Option<i32> {
        self.state.versions.get(id).copied()
    }
}

/// Startup state of one language's backend
///
/// Empty until the first caller starts the backend; `None` once starting it
/// failed, so a broken command is not retried on every request.
type SessionCell = Arc<OnceCell<Option<Arc<BackendSession>>>>;

/// Backend sessions by fragment language tag, started on first use
///
/// The map lock is only held to look up a tag's cell. Starting a backend
/// waits on that tag's cell alone, so a slow server never blocks other
/// languages.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    config: parking_lot::RwLock<ServerConfig>,
    sessions: parking_lot::Mutex<HashMap<String, SessionCell>>,
}

impl BackendRegistry {
    pub fn new(config: ServerConfig) -> Self {
        BackendRegistry {
            config: parking_lot::RwLock::new(config),
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Applies `f` to the configuration used for backends not yet started
    ///
    /// Languages whose backend failed to start get another attempt.
    pub fn configure(&self, f: impl FnOnce(&mut ServerConfig)) {
        f(&mut self.config.write());
        self.sessions
            .lock()
            .retain(|_, cell| !matches!(cell.get(), Some(None)));
    }

    /// Registers an already running backend for a tag
    pub fn insert(&self, language_tag: &str, backend: Box<dyn FragmentBackend>) -> Arc<BackendSession> {
        let session = Arc::new(BackendSession::new(language_tag, backend));
        let cell = Arc::new(OnceCell::new_with(Some(Some(Arc::clone(&session)))));
        self.sessions.lock().insert(language_tag.to_string(), cell);
        session
    }

    /// The session for a tag, spawning its backend if one is configured
    ///
    /// `None` means no backend handles this language, or its backend could
    /// not be started.
    pub async fn session(&self, language_tag: &str) -> Option<Arc<BackendSession>> {
        let cell = {
            let mut sessions = self.sessions.lock();
            match sessions.get(language_tag) {
                Some(cell) => Arc::clone(cell),
                None if self.config.read().backend(language_tag).is_none() => {
                    debug!("No backend configured for '{}'", language_tag);
                    return None;
                }
                None => Arc::clone(sessions.entry(language_tag.to_string()).or_default()),
            }
        };
        cell.get_or_init(|| async {
            let command = self.config.read().backend(language_tag).cloned()?;
            start_session(language_tag, command).await
        })
        .await
        .clone()
    }

    /// The session for a tag only if its backend is already running
    pub fn running(&self, language_tag: &str) -> Option<Arc<BackendSession>> {
        self.sessions
            .lock()
            .get(language_tag)
            .and_then(|cell| cell.get().cloned().flatten())
    }

    /// Shuts down every running backend
    pub async fn shutdown_all(&self) {
        let cells: Vec<_> = self.sessions.lock().drain().map(|(_, cell)| cell).collect();
        for session in cells.iter().filter_map(|cell| cell.get().cloned().flatten()) {
            let mut turn = session.turn().await;
            let name = turn.state.backend.backend_name();
            match turn.state.backend.shutdown().await {
                Ok(()) => info!("Shut down {} backend {}", session.language_tag(), name),
                Err(e) => warn!("Failed to shut down {} backend {}: {}", session.language_tag(), name, e),
            }
        }
    }
}

async fn start_session(language_tag: &str, command: BackendCommand) -> Option<Arc<BackendSession>> {
    info!("Starting {} backend: {}", language_tag, command.command);
    match StdioBackend::spawn(language_tag, &command).await {
        Ok(backend) => {
            info!("Backend {} ready", backend.backend_name());
            Some(Arc::new(BackendSession::new(language_tag, Box::new(backend))))
        }
        Err(e) => {
            error!("Failed to start {} backend: {:#}", language_tag, e);
            None
        }
    }
}
