//! LSP protocol handler implementations
//!
//! Lifecycle handlers, host document synchronization and completion
//! forwarding for the fragment server. The `fragments/*` filesystem
//! requests are registered as custom methods in `main`.

use tower_lsp::lsp_types::{
    CompletionOptions, CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, InitializeParams, InitializeResult,
    InitializedParams, ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
};
use tower_lsp::{LanguageServer, jsonrpc};

use tracing::{debug, error, info, warn};

use super::state::FragmentsBackend;

#[tower_lsp::async_trait]
impl LanguageServer for FragmentsBackend {
    /// Handles the LSP initialize request, merging backend configuration from the client.
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        info!("Received initialize from {:?}", params.client_info.as_ref().map(|c| &c.name));

        let options = params.initialization_options.as_ref();
        self.services.backends.configure(|config| {
            if let Err(e) = config.merge_initialization_options(options) {
                warn!("Ignoring invalid initializationOptions: {}", e);
            }
        });

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        info!("Initialized");
    }

    /// Handles the LSP shutdown request.
    async fn shutdown(&self) -> jsonrpc::Result<()> {
        info!("Received shutdown request");
        self.services.backends.shutdown_all().await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        info!("Opening document: URI={}, version={}", document.uri, document.version);
        let batch = self.services.sync.open(
            &document.uri,
            &document.text,
            &document.language_id,
            Some(document.version),
        );
        debug!("{} fragments in {}", batch.changes.len(), document.uri);
        self.publish(batch).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        debug!("textDocument/didChange: URI={}, version={}", uri, version);
        let batch = self
            .services
            .sync
            .apply_content_changes(&uri, Some(version), &params.content_changes);
        self.publish(batch).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        info!("textDocument/didClose: {}", uri);
        let batch = self.services.sync.close(&uri);
        self.publish(batch).await;
    }

    /// Forwards completion inside a fragment to the fragment language's backend.
    async fn completion(&self, params: CompletionParams) -> jsonrpc::Result<Option<CompletionResponse>> {
        match self.services.completion(params).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Completion failed: {:#}", e);
                Ok(None)
            }
        }
    }
}
