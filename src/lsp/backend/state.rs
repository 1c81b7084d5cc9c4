//! Backend state management
//!
//! This module defines the FragmentsBackend struct, which owns the
//! synchronization controller, the fragment filesystem and the registry of
//! per-language backend servers.

use std::sync::Arc;

use tower_lsp::Client;

use crate::lsp::backend_service::BackendRegistry;
use crate::lsp::fragment_fs::FragmentFileSystem;
use crate::lsp::sync::SyncController;

/// Everything the server does that does not need the client connection
#[derive(Debug, Clone)]
pub struct FragmentServices {
    pub sync: Arc<SyncController>,
    pub files: FragmentFileSystem,
    pub backends: Arc<BackendRegistry>,
}

/// The fragment language server, managing state and handling LSP requests.
#[derive(Debug, Clone)]
pub struct FragmentsBackend {
    pub(super) client: Client,
    pub(super) services: FragmentServices,
}
