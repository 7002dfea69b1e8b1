//! Unit tests for the JSONL transcript writer.

use std::fs;

use serde_json::json;

use mcp_smoke::transcript::{Direction, JsonlTranscriptWriter, TranscriptEntry, TranscriptSink};

#[test]
fn writer_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested/runs/session.jsonl");

    let writer = JsonlTranscriptWriter::new(&path).expect("writer");

    assert!(path.exists());
    assert_eq!(writer.path(), path.as_path());
}

#[test]
fn entries_are_written_one_per_line() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.jsonl");
    let writer = JsonlTranscriptWriter::new(&path).expect("writer");

    writer
        .record(
            TranscriptEntry::new(Direction::Outbound)
                .with_message(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .expect("record outbound");
    writer
        .record(TranscriptEntry::new(Direction::Stderr).with_text("server ready"))
        .expect("record stderr");

    let content = fs::read_to_string(&path).expect("read transcript");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
    assert_eq!(first["direction"], "outbound");
    assert_eq!(first["message"]["method"], "tools/list");
    assert!(first.get("text").is_none());
    assert!(first["timestamp"].is_string());

    let second: TranscriptEntry = serde_json::from_str(lines[1]).expect("entry");
    assert_eq!(second.direction, Direction::Stderr);
    assert_eq!(second.text.as_deref(), Some("server ready"));
    assert!(second.message.is_none());
}

#[test]
fn reopening_appends_to_existing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.jsonl");

    for text in ["first run", "second run"] {
        let writer = JsonlTranscriptWriter::new(&path).expect("writer");
        writer
            .record(TranscriptEntry::new(Direction::Lifecycle).with_text(text))
            .expect("record");
    }

    let content = fs::read_to_string(&path).expect("read transcript");
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("second run"));
}

#[test]
fn unwritable_location_is_io_error() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    // A regular file cannot be used as a directory.
    let path = file.path().join("session.jsonl");

    assert!(JsonlTranscriptWriter::new(path).is_err());
}
