//! Fragment language server - main entry point

use anyhow::Result;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::info;

use fragment_language_server::config::ServerConfig;
use fragment_language_server::logging::init_logger;
use fragment_language_server::lsp::backend::FragmentsBackend;
use fragment_language_server::lsp::protocol;

#[derive(Parser, Debug)]
#[command(name = "fragment-language-server")]
#[command(version, about = "Language server for code fragments embedded in host documents", long_about = None)]
struct Args {
    /// Log level for stderr (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Disable ANSI colors in stderr output
    #[arg(long)]
    no_color: bool,

    /// Do not write a session log to the user cache directory
    #[arg(long)]
    no_file_logging: bool,

    /// Backend language server for a fragment language (TAG=COMMAND [ARGS...])
    #[arg(long = "backend", value_name = "TAG=COMMAND")]
    backends: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logger(args.no_color, args.log_level.as_deref(), !args.no_file_logging)?;

    let config = ServerConfig::from_env_and_args(&args.backends);
    info!(
        "Starting {} {} with backends for {:?}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.backends.keys().collect::<Vec<_>>()
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(|client| FragmentsBackend::new(client, config))
        .custom_method(protocol::STAT, FragmentsBackend::stat)
        .custom_method(protocol::READ_FILE, FragmentsBackend::read_file)
        .custom_method(protocol::WRITE_FILE, FragmentsBackend::write_file)
        .custom_method(protocol::READ_DIRECTORY, FragmentsBackend::read_directory)
        .custom_method(protocol::RENAME, FragmentsBackend::rename)
        .custom_method(protocol::DELETE, FragmentsBackend::delete)
        .custom_method(protocol::CREATE_DIRECTORY, FragmentsBackend::create_directory)
        .custom_method(protocol::WATCH, FragmentsBackend::watch)
        .finish();

    Server::new(stdin, stdout, socket).serve(service).await;
    info!("Server stopped");
    Ok(())
}
