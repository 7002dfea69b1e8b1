//! Unit tests for the stderr reader task.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mcp_smoke::stdio::stderr::run_stderr;
use mcp_smoke::stdio::ServerEvent;

async fn collect_lines(input: &'static [u8]) -> Vec<String> {
    let (tx, mut rx) = mpsc::channel(16);
    run_stderr(input, tx, CancellationToken::new()).await;

    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            ServerEvent::Stderr(line) => lines.push(line),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    lines
}

#[tokio::test]
async fn lines_are_forwarded_without_terminators() {
    let lines = collect_lines(b"starting\r\nready\nlast without newline").await;

    assert_eq!(lines, vec!["starting", "ready", "last without newline"]);
}

#[tokio::test]
async fn invalid_utf8_is_replaced_and_draining_continues() {
    let lines = collect_lines(b"log \xff\xfe\nnext\n").await;

    assert_eq!(lines, vec!["log \u{FFFD}\u{FFFD}".to_owned(), "next".to_owned()]);
}

#[tokio::test]
async fn cancellation_stops_without_event() {
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (_keep_open, stderr) = tokio::io::duplex(64);
    run_stderr(tokio::io::BufReader::new(stderr), tx, cancel).await;

    assert!(rx.try_recv().is_err(), "cancellation must not emit events");
}
