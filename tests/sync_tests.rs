//! Host document lifecycle through the synchronization controller
use indoc::indoc;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

use fragment_language_server::language_regions::{GrammarMode, HostId, VirtualId, scan};
use fragment_language_server::lsp::fragment_fs::{FileKind, FragmentFileSystem, FsError};
use fragment_language_server::lsp::models::TextDelta;
use fragment_language_server::lsp::sync::{ChangeKind, SyncController};

use std::sync::Arc;

fn cpp_uri() -> Url {
    Url::parse("file:///src/Queries.cpp").unwrap()
}

#[test]
fn test_write_replaces_fragment_body() {
    let controller = SyncController::new();
    let host = "// @LANGUAGE:sql@\nA R\"\"\"(old)\"\"\" B";
    controller.open(&cpp_uri(), host, "cpp", Some(1));
    let id = VirtualId::new(HostId::from_url(&cpp_uri()), 0, "sql");
    assert_eq!(controller.fragment(&id).unwrap().content, "old");

    let (edit, batch) = controller.write_fragment(&id, "new").unwrap();
    let text = controller.host_text(&cpp_uri()).unwrap();
    assert_eq!(text, "// @LANGUAGE:sql@\nA R\"\"\"(new)\"\"\" B");
    assert_eq!(edit.new_text, "new");
    assert_eq!(
        edit.range,
        Range {
            start: Position { line: 1, character: 7 },
            end: Position { line: 1, character: 10 },
        }
    );
    assert_eq!(batch.changed().collect::<Vec<_>>(), vec![&id]);

    let rescanned = scan(&text, GrammarMode::for_language("cpp"));
    assert_eq!(rescanned.len(), 1);
    assert_eq!(rescanned[0].content, "new");
}

#[test]
fn test_write_with_longer_and_multiline_content() {
    let controller = SyncController::new();
    let host = "// @LANGUAGE:sql@\nq = R\"\"\"(SELECT 1)\"\"\";\n// @LANGUAGE:sql@\nr = R\"\"\"(SELECT 2)\"\"\";\n";
    controller.open(&cpp_uri(), host, "cpp", Some(1));
    let first = VirtualId::new(HostId::from_url(&cpp_uri()), 0, "sql");
    let second = VirtualId::new(HostId::from_url(&cpp_uri()), 1, "sql");

    controller.write_fragment(&first, "SELECT a,\n       b\nFROM t").unwrap();

    assert_eq!(controller.fragment(&first).unwrap().content, "SELECT a,\n       b\nFROM t");
    assert_eq!(controller.fragment(&second).unwrap().content, "SELECT 2");
}

#[test]
fn test_fragment_lookup_is_boundary_inclusive() {
    let controller = SyncController::new();
    let host = "// @LANGUAGE:sql@\nR\"\"\"(0123456789)\"\"\"";
    controller.open(&cpp_uri(), host, "cpp", Some(1));
    let host_id = HostId::from_url(&cpp_uri());

    let fragment = controller.fragments(&host_id).unwrap().fragments[0].clone();
    assert_eq!(fragment.len(), 10);

    assert!(controller.fragment_at(&host_id, fragment.start).is_some());
    assert!(controller.fragment_at(&host_id, fragment.end).is_some());
    assert!(controller.fragment_at(&host_id, fragment.end + 1).is_none());
    assert!(controller.fragment_at(&host_id, fragment.start - 1).is_none());
}

#[test]
fn test_stale_version_is_ignored() {
    let controller = SyncController::new();
    let host = "// @LANGUAGE:sql@\nR\"\"\"(SELECT 1)\"\"\"";
    controller.open(&cpp_uri(), host, "cpp", Some(3));

    let batch = controller.change(&cpp_uri(), Some(3), &[TextDelta::new(0, 0, "x")]);
    assert!(batch.is_empty());
    assert_eq!(controller.host_text(&cpp_uri()).unwrap(), host);

    let batch = controller.change(&cpp_uri(), Some(4), &[TextDelta::new(0, 0, "x")]);
    assert_eq!(batch.changed().count(), 1);
}

#[test]
fn test_full_text_change_event() {
    let controller = SyncController::new();
    controller.open(&cpp_uri(), "int x;", "cpp", Some(1));
    assert!(controller.fragments(&HostId::from_url(&cpp_uri())).unwrap().is_empty());

    let change = TextDocumentContentChangeEvent {
        range: None,
        range_length: None,
        text: "// @LANGUAGE:py@\nR\"\"\"(print(1))\"\"\"".to_string(),
    };
    let batch = controller.apply_content_changes(&cpp_uri(), Some(2), &[change]);

    let changed: Vec<_> = batch.changed().map(|id| id.encode()).collect();
    assert_eq!(changed, vec!["fragments://%2Fsrc%2Fqueries.cpp/frag0.py".to_string()]);
}

#[test]
fn test_retagged_fragment_reports_old_identity_deleted() {
    let controller = SyncController::new();
    let host = "// @LANGUAGE:sql@\nR\"\"\"(x)\"\"\"";
    controller.open(&cpp_uri(), host, "cpp", Some(1));

    let tag = host.find("sql").unwrap();
    let batch = controller.change(&cpp_uri(), Some(2), &[TextDelta::new(tag, 3, "py")]);

    let kinds: Vec<_> = batch
        .changes
        .iter()
        .map(|change| (change.kind, change.id.language_tag.as_str()))
        .collect();
    assert!(kinds.contains(&(ChangeKind::Changed, "py")));
    assert!(kinds.contains(&(ChangeKind::Deleted, "sql")));
}

#[test]
fn test_markdown_host_through_filesystem() {
    let controller = Arc::new(SyncController::new());
    let files = FragmentFileSystem::new(Arc::clone(&controller));
    let uri = Url::parse("file:///notes/README.md").unwrap();
    let host = indoc! {"
        # Queries

        ```sql
        SELECT 1;
        ```
    "};
    controller.open(&uri, host, "markdown", Some(1));

    let directory = HostId::from_url(&uri).directory_uri();
    let entries = files.read_directory(&directory).unwrap();
    assert_eq!(entries, vec![("frag0.sql".to_string(), FileKind::File)]);

    let file = VirtualId::new(HostId::from_url(&uri), 0, "sql").encode();
    assert_eq!(files.read_file(&file).unwrap(), b"SELECT 1;\n");
    files.write_file(&file, b"SELECT 2;\n").unwrap();
    assert_eq!(
        controller.host_text(&uri).unwrap(),
        "# Queries\n\n```sql\nSELECT 2;\n```\n"
    );

    controller.close(&uri);
    assert!(matches!(files.read_file(&file), Err(FsError::FileNotFound(_))));
}

#[test]
fn test_concurrent_changes_to_different_hosts() {
    let controller = Arc::new(SyncController::new());
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                let uri = Url::parse(&format!("file:///host{}.cpp", n)).unwrap();
                controller.open(&uri, "// @LANGUAGE:sql@\nR\"\"\"(SELECT 0)\"\"\"", "cpp", Some(1));
                for version in 2..20 {
                    let text = controller.host_text(&uri).unwrap();
                    let at = text.find("SELECT").unwrap();
                    controller.change(&uri, Some(version), &[TextDelta::new(at, 0, " ")]);
                }
                controller.fragments(&HostId::from_url(&uri)).unwrap().fragments[0].content.clone()
            })
        })
        .collect();

    for handle in handles {
        let content = handle.join().unwrap();
        assert_eq!(content, format!("{}SELECT 0", " ".repeat(18)));
    }
}
