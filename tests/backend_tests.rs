//! Completion forwarding and reverse sync through registered backends
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tower_lsp::lsp_types::{
    CompletionItem, CompletionParams, CompletionResponse, CompletionTextEdit, PartialResultParams, Position, Range,
    TextDocumentIdentifier, TextDocumentPositionParams, TextEdit, Url, WorkDoneProgressParams,
};

use fragment_language_server::config::ServerConfig;
use fragment_language_server::language_regions::{HostId, VirtualId};
use fragment_language_server::lsp::backend::{FragmentServices, HostEditor};
use fragment_language_server::lsp::backend_service::FragmentBackend;
use fragment_language_server::lsp::sync::HostEdit;

const HOST: &str = "// @LANGUAGE:sql@\nauto a = R\"\"\"(SELECT 1)\"\"\";\n";

type Log = Arc<Mutex<Vec<String>>>;

/// Records every call and offers a single keyword edit spanning `0..6` of line 0
#[derive(Default)]
struct MockBackend {
    log: Log,
    delay: Option<Duration>,
}

#[async_trait::async_trait]
impl FragmentBackend for MockBackend {
    async fn open_document(&mut self, uri: &Url, _language_id: &str, version: i32, text: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("open {} v{} {:?}", uri, version, text));
        Ok(())
    }

    async fn change_document(&mut self, uri: &Url, version: i32, text: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("change {} v{} {:?}", uri, version, text));
        Ok(())
    }

    async fn close_document(&mut self, uri: &Url) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("close {}", uri));
        Ok(())
    }

    async fn completion(&mut self, params: CompletionParams) -> anyhow::Result<Option<CompletionResponse>> {
        let position = params.text_document_position.position;
        self.log
            .lock()
            .unwrap()
            .push(format!("begin completion {}:{}", position.line, position.character));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.lock().unwrap().push("end completion".to_string());

        let item = CompletionItem {
            label: "SELECT".to_string(),
            text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                range: Range {
                    start: Position { line: 0, character: 0 },
                    end: Position { line: 0, character: 6 },
                },
                new_text: "SELECT".to_string(),
            })),
            ..Default::default()
        };
        Ok(Some(CompletionResponse::Array(vec![item])))
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> String {
        "mock".to_string()
    }
}

/// Editor that answers every edit the same way
struct Editor {
    accepts: bool,
}

#[async_trait::async_trait]
impl HostEditor for Editor {
    async fn apply_host_edit(&self, _edit: &HostEdit) -> bool {
        self.accepts
    }
}

const ACCEPTING: Editor = Editor { accepts: true };
const REJECTING: Editor = Editor { accepts: false };

fn host_uri() -> Url {
    Url::parse("file:///app/db.cpp").unwrap()
}

fn completion_at(line: u32, character: u32) -> CompletionParams {
    CompletionParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri: host_uri() },
            position: Position { line, character },
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    }
}

async fn services_with_mock(delay: Option<Duration>) -> (FragmentServices, Log) {
    let services = FragmentServices::new(ServerConfig::default());
    let log = Log::default();
    let backend = MockBackend {
        log: Arc::clone(&log),
        delay,
    };
    services.backends.insert("sql", Box::new(backend));
    services.sync.open(&host_uri(), HOST, "cpp", Some(1));
    (services, log)
}

#[tokio::test]
async fn test_completion_is_translated_to_host_coordinates() {
    let (services, log) = services_with_mock(None).await;

    let response = services.completion(completion_at(1, 16)).await.unwrap().unwrap();

    let CompletionResponse::Array(items) = response else {
        panic!("expected an item array");
    };
    let Some(CompletionTextEdit::Edit(edit)) = &items[0].text_edit else {
        panic!("expected a plain text edit");
    };
    assert_eq!(
        edit.range,
        Range {
            start: Position { line: 1, character: 14 },
            end: Position { line: 1, character: 20 },
        }
    );

    let log = log.lock().unwrap();
    assert!(log[0].starts_with("open fragments://") && log[0].ends_with("v1 \"SELECT 1\""));
    assert_eq!(log[1], "begin completion 0:2");
}

#[tokio::test]
async fn test_completion_outside_fragments_skips_backend() {
    let (services, log) = services_with_mock(None).await;

    assert!(services.completion(completion_at(0, 3)).await.unwrap().is_none());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_without_backend_is_empty() {
    let services = FragmentServices::new(ServerConfig::default());
    services.sync.open(&host_uri(), HOST, "cpp", Some(1));

    assert!(services.completion(completion_at(1, 16)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_backend_turns_do_not_interleave() {
    let (services, log) = services_with_mock(Some(Duration::from_millis(20))).await;

    let first = tokio::spawn({
        let services = services.clone();
        async move { services.completion(completion_at(1, 15)).await }
    });
    let second = tokio::spawn({
        let services = services.clone();
        async move { services.completion(completion_at(1, 17)).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let log = log.lock().unwrap();
    let exchanges: Vec<_> = log.iter().filter(|entry| entry.contains("completion")).collect();
    assert_eq!(exchanges.len(), 4);
    for pair in exchanges.chunks(2) {
        assert!(pair[0].starts_with("begin"));
        assert_eq!(pair[1], "end completion");
    }
}

#[tokio::test]
async fn test_write_file_syncs_backend_and_close_releases_it() {
    let (services, log) = services_with_mock(None).await;
    let id = VirtualId::new(HostId::from_url(&host_uri()), 0, "sql");

    services.completion(completion_at(1, 16)).await.unwrap();
    let (applied, batch) = services.write_file(&id.encode(), "SELECT 2", &ACCEPTING).await.unwrap();
    assert!(applied);
    assert_eq!(batch.changed().count(), 1);
    assert_eq!(
        services.sync.host_text(&host_uri()).unwrap(),
        "// @LANGUAGE:sql@\nauto a = R\"\"\"(SELECT 2)\"\"\";\n"
    );

    let closed = services.sync.close(&host_uri());
    services.release_deleted(&closed).await;

    let log = log.lock().unwrap();
    assert!(log.iter().any(|entry| entry.ends_with("v2 \"SELECT 2\"") && entry.starts_with("change ")));
    assert!(log.last().unwrap().starts_with("close fragments://"));
}

#[tokio::test]
async fn test_write_file_to_unknown_fragment_fails() {
    let (services, _log) = services_with_mock(None).await;
    let id = VirtualId::new(HostId::from_url(&host_uri()), 4, "sql");

    assert!(services.write_file(&id.encode(), "x", &ACCEPTING).await.is_err());
    assert!(services.write_file("file:///not/a/fragment", "x", &ACCEPTING).await.is_err());
}

#[tokio::test]
async fn test_rejected_write_restores_host_and_skips_backend() {
    let (services, log) = services_with_mock(None).await;
    let id = VirtualId::new(HostId::from_url(&host_uri()), 0, "sql");

    services.completion(completion_at(1, 16)).await.unwrap();
    let (applied, batch) = services.write_file(&id.encode(), "SELECT 2", &REJECTING).await.unwrap();

    assert!(!applied);
    assert_eq!(batch.changed().count(), 1);
    assert_eq!(services.sync.host_text(&host_uri()).unwrap(), HOST);
    assert_eq!(services.files.read_file(&id.encode()).unwrap(), b"SELECT 1");
    assert!(!log.lock().unwrap().iter().any(|entry| entry.contains("SELECT 2")));
}
