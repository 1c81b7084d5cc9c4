pub mod config;
pub mod language_regions;
pub mod logging;
pub mod lsp;
