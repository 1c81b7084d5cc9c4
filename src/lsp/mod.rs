pub mod backend;
pub mod backend_service;
pub mod document;
pub mod fragment_fs;
pub mod models;
pub mod protocol;
pub mod stdio_backend;
pub mod sync;
