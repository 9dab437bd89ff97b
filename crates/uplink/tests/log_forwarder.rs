use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc::unbounded_channel;

use uplink::logs::{
    logs_to_send_sorted, marker_path, read_marker, write_marker, LogForwarder, MARKER_ACKED,
};

fn now_u32() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as u32
}

fn touch(dir: &Path, name: &str) {
    fs::write(dir.join(name), format!("contents of {name}")).expect("write log file");
}

#[test]
fn marker_roundtrip_and_unparseable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("log_0001");
    fs::write(&path, "x").expect("write");

    assert_eq!(read_marker(&path), None);
    write_marker(&path, 1234).expect("write marker");
    assert_eq!(read_marker(&path), Some(1234));

    // wrong-size sidecar reads as never sent
    fs::write(marker_path(&path), b"zz").expect("write garbage");
    assert_eq!(read_marker(&path), None);
}

#[test]
fn scan_selects_only_due_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    touch(dir.path(), "log_0003");
    // recent attempt on log_0002, half the resend window ago
    write_marker(&dir.path().join("log_0002"), now_u32() - 1800).expect("marker");

    let candidates = logs_to_send_sorted(dir.path()).expect("scan");
    assert_eq!(candidates, vec!["log_0001".to_string()]);
}

#[test]
fn stale_marker_requalifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    write_marker(&dir.path().join("log_0001"), now_u32() - 4000).expect("marker");

    let candidates = logs_to_send_sorted(dir.path()).expect("scan");
    assert_eq!(candidates, vec!["log_0001".to_string()]);
}

#[test]
fn acked_sentinel_never_reselected() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    write_marker(&dir.path().join("log_0001"), MARKER_ACKED).expect("marker");

    assert!(logs_to_send_sorted(dir.path()).expect("scan").is_empty());
}

#[test]
fn newest_file_never_a_candidate() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    assert!(logs_to_send_sorted(dir.path()).expect("scan").is_empty());
}

#[test]
fn orphaned_marker_is_pruned() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    let orphan = dir.path().join("log_0000.sent");
    fs::write(&orphan, 1u32.to_le_bytes()).expect("write orphan");

    let candidates = logs_to_send_sorted(dir.path()).expect("scan");
    assert_eq!(candidates, vec!["log_0001".to_string()]);
    assert!(!orphan.exists(), "rotated-away marker should be removed");
}

#[test]
fn scan_survives_non_file_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    touch(dir.path(), "log_0003");
    fs::create_dir(dir.path().join("archive")).expect("mkdir");
    std::os::unix::fs::symlink("/no/such/target", dir.path().join("log_0000.broken"))
        .expect("symlink");

    let candidates = logs_to_send_sorted(dir.path()).expect("scan");
    assert_eq!(
        candidates,
        vec!["log_0001".to_string(), "log_0002".to_string()]
    );
}

fn frame_from(text: &str) -> JsonValue {
    serde_json::from_str(text).expect("frame is json")
}

#[tokio::test(start_paused = true)]
async fn cycle_forwards_one_file_and_records_ack() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");

    let (send_tx, mut send_rx) = unbounded_channel();
    let (ack_tx, ack_rx) = unbounded_channel();
    let mut forwarder = LogForwarder::new(dir.path(), send_tx, ack_rx);

    ack_tx
        .send(json!({ "id": "log_0001", "result": { "success": 1 } }))
        .expect("queue ack");
    assert!(forwarder.cycle().await);

    let frame = frame_from(&send_rx.try_recv().expect("one frame sent"));
    assert_eq!(frame["method"], "forwardLogs");
    assert_eq!(frame["id"], "log_0001");
    assert_eq!(frame["params"]["logs"], "contents of log_0001");
    assert!(send_rx.try_recv().is_err(), "only one send per cycle");

    assert_eq!(read_marker(&dir.path().join("log_0001")), Some(MARKER_ACKED));
}

#[tokio::test(start_paused = true)]
async fn cycle_stamps_marker_even_without_ack() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");

    let (send_tx, mut send_rx) = unbounded_channel();
    let (_ack_tx, ack_rx) = unbounded_channel();
    let mut forwarder = LogForwarder::new(dir.path(), send_tx, ack_rx);

    assert!(forwarder.cycle().await);
    assert!(send_rx.try_recv().is_ok());

    let marker = read_marker(&dir.path().join("log_0001")).expect("marker stamped");
    assert_ne!(marker, 0);
    assert_ne!(marker, MARKER_ACKED);

    // fresh marker keeps the file out of the next scan
    assert!(forwarder.cycle().await);
    assert!(send_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn non_matching_acks_are_drained_and_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");
    touch(dir.path(), "log_0003");

    let (send_tx, mut send_rx) = unbounded_channel();
    let (ack_tx, ack_rx) = unbounded_channel();
    let mut forwarder = LogForwarder::new(dir.path(), send_tx, ack_rx);

    // a stale ack from an earlier session arrives first
    ack_tx
        .send(json!({ "id": "log_0001", "result": { "success": 1 } }))
        .expect("queue ack");
    ack_tx
        .send(json!({ "id": "log_0002", "result": { "success": 1 } }))
        .expect("queue ack");

    // descending pop: log_0002 goes first
    assert!(forwarder.cycle().await);
    let frame = frame_from(&send_rx.try_recv().expect("frame sent"));
    assert_eq!(frame["id"], "log_0002");

    assert_eq!(read_marker(&dir.path().join("log_0001")), Some(MARKER_ACKED));
    assert_eq!(read_marker(&dir.path().join("log_0002")), Some(MARKER_ACKED));
}

#[tokio::test(start_paused = true)]
async fn failed_ack_leaves_attempt_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(dir.path(), "log_0001");
    touch(dir.path(), "log_0002");

    let (send_tx, _send_rx) = unbounded_channel();
    let (ack_tx, ack_rx) = unbounded_channel();
    let mut forwarder = LogForwarder::new(dir.path(), send_tx, ack_rx);

    ack_tx
        .send(json!({ "id": "log_0001", "error": { "code": -32000, "message": "nope" } }))
        .expect("queue ack");
    assert!(forwarder.cycle().await);

    let marker = read_marker(&dir.path().join("log_0001")).expect("marker stamped");
    assert_ne!(marker, MARKER_ACKED, "failed forward must stay resendable");
}

#[tokio::test(start_paused = true)]
async fn engine_stops_when_ack_queue_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (send_tx, _send_rx) = unbounded_channel();
    let (ack_tx, ack_rx) = unbounded_channel();
    drop(ack_tx);

    let mut forwarder = LogForwarder::new(dir.path(), send_tx, ack_rx);
    assert!(!forwarder.cycle().await);
}
