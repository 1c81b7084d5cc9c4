//! Stdio-based backend for external language servers
//!
//! Spawns a language server process and speaks JSON-RPC to it over its
//! stdin/stdout using LSP's `Content-Length` framing. Requests are strictly
//! sequential: while waiting for a response, server notifications are
//! dropped and server requests are answered with a `null` result.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tower_lsp::lsp_types::{CompletionParams, CompletionResponse, Url};
use tracing::{debug, trace, warn};

use super::backend_service::FragmentBackend;
use crate::config::BackendCommand;

/// Largest message body accepted from a backend
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// How long a backend may take to answer `initialize`
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Writes one framed JSON-RPC message
pub async fn write_message<W>(writer: &mut W, message: &Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed JSON-RPC message
///
/// Header names are matched case-insensitively; headers other than
/// `Content-Length` are ignored.
pub async fn read_message<R>(reader: &mut R) -> anyhow::Result<Value>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            bail!("Input stream closed");
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed header line: {:?}", header))?;
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            let length = value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid Content-Length: {:?}", value))?;
            content_length = Some(length);
        }
    }

    let length = content_length.ok_or_else(|| anyhow!("Reached end of header section without defining the Content-Length"))?;
    if length > MAX_MESSAGE_LEN {
        bail!("Content-Length {} exceeds the {} byte limit", length, MAX_MESSAGE_LEN);
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// JSON-RPC client over a pair of byte streams
#[derive(Debug)]
pub struct JsonRpcConnection<R, W> {
    reader: R,
    writer: W,
    next_id: i64,
}

impl<R, W> JsonRpcConnection<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        JsonRpcConnection {
            reader,
            writer,
            next_id: 1,
        }
    }

    pub async fn notify(&mut self, method: &str, params: Value) -> anyhow::Result<()> {
        trace!("--> {}", method);
        write_message(
            &mut self.writer,
            &json!({ "jsonrpc": "2.0", "method": method, "params": params }),
        )
        .await
    }

    /// Sends a request and waits for its response
    pub async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        trace!("--> {} (id {})", method, id);
        write_message(
            &mut self.writer,
            &json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
        )
        .await?;

        loop {
            let message = read_message(&mut self.reader).await?;
            match (message.get("id"), message.get("method")) {
                (Some(request_id), Some(server_method)) => {
                    debug!("Answering server request {} with null", server_method);
                    let reply = json!({ "jsonrpc": "2.0", "id": request_id, "result": null });
                    write_message(&mut self.writer, &reply).await?;
                }
                (None, Some(server_method)) => {
                    trace!("Dropping server notification {}", server_method);
                }
                (Some(response_id), None) if response_id.as_i64() == Some(id) => {
                    if let Some(error) = message.get("error") {
                        bail!("{} failed: {}", method, error);
                    }
                    return Ok(message.get("result").cloned().unwrap_or(Value::Null));
                }
                _ => warn!("Ignoring unexpected message while waiting for {}: {}", method, message),
            }
        }
    }
}

/// A language server child process used as a fragment backend
#[derive(Debug)]
pub struct StdioBackend {
    name: String,
    child: Option<Child>,
    connection: JsonRpcConnection<BufReader<ChildStdout>, ChildStdin>,
}

impl StdioBackend {
    /// Starts the process and completes the `initialize` handshake
    pub async fn spawn(language_tag: &str, command: &BackendCommand) -> anyhow::Result<Self> {
        let mut child = Command::new(&command.command)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {} backend '{}'", language_tag, command.command))?;
        let stdin = child.stdin.take().context("backend stdin not captured")?;
        let stdout = child.stdout.take().context("backend stdout not captured")?;

        let mut backend = StdioBackend {
            name: format!("{} ({})", command.command, language_tag),
            child: Some(child),
            connection: JsonRpcConnection::new(BufReader::new(stdout), stdin),
        };
        tokio::time::timeout(INITIALIZE_TIMEOUT, backend.initialize())
            .await
            .with_context(|| format!("Backend {} did not answer initialize", backend.name))??;
        Ok(backend)
    }

    async fn initialize(&mut self) -> anyhow::Result<()> {
        let params = json!({
            "processId": std::process::id(),
            "rootUri": null,
            "capabilities": {},
        });
        self.connection.request("initialize", params).await?;
        self.connection.notify("initialized", json!({})).await?;
        debug!("Backend {} initialized", self.name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl FragmentBackend for StdioBackend {
    async fn open_document(&mut self, uri: &Url, language_id: &str, version: i32, text: &str) -> anyhow::Result<()> {
        self.connection
            .notify(
                "textDocument/didOpen",
                json!({
                    "textDocument": { "uri": uri, "languageId": language_id, "version": version, "text": text }
                }),
            )
            .await
    }

    async fn change_document(&mut self, uri: &Url, version: i32, text: &str) -> anyhow::Result<()> {
        self.connection
            .notify(
                "textDocument/didChange",
                json!({
                    "textDocument": { "uri": uri, "version": version },
                    "contentChanges": [{ "text": text }]
                }),
            )
            .await
    }

    async fn close_document(&mut self, uri: &Url) -> anyhow::Result<()> {
        self.connection
            .notify("textDocument/didClose", json!({ "textDocument": { "uri": uri } }))
            .await
    }

    async fn completion(&mut self, params: CompletionParams) -> anyhow::Result<Option<CompletionResponse>> {
        let result = self
            .connection
            .request("textDocument/completion", serde_json::to_value(params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.connection.request("shutdown", Value::Null).await?;
        self.connection.notify("exit", Value::Null).await?;
        if let Some(mut child) = self.child.take() {
            child.wait().await?;
        }
        Ok(())
    }

    fn backend_name(&self) -> String {
        self.name.clone()
    }
}
