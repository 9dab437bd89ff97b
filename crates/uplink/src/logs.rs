use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

/// Durable send-state marker kept next to each log file. The value is
/// a 4-byte little-endian u32: 0/absent/unparseable means never sent,
/// a timestamp means last attempt, `MARKER_ACKED` means permanently
/// acknowledged.
pub const MARKER_SUFFIX: &str = ".sent";
pub const MARKER_ACKED: u32 = u32::MAX;

/// A marker older than this is assumed lost and the file resent.
pub const RESEND_WINDOW_SECS: u64 = 3600;

const SCAN_INTERVAL: Duration = Duration::from_secs(10);
const ACK_WAIT_TICKS: u32 = 100;
const ACK_TICK: Duration = Duration::from_secs(1);

pub fn marker_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.as_os_str().to_os_string();
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

pub fn read_marker(log_path: &Path) -> Option<u32> {
    let bytes = fs::read(marker_path(log_path)).ok()?;
    let bytes: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

pub fn write_marker(log_path: &Path, value: u32) -> io::Result<()> {
    fs::write(marker_path(log_path), value.to_le_bytes())
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn marker_is_stale(marker: Option<u32>, now: u64) -> bool {
    match marker {
        None | Some(0) => true,
        Some(MARKER_ACKED) => false,
        Some(sent) => now.saturating_sub(u64::from(sent)) > RESEND_WINDOW_SECS,
    }
}

/// Scan the log directory for files due a send attempt, ascending by
/// name. The newest (active) file is never a candidate. Sidecars left
/// behind by rotation are pruned here so no orphaned state survives.
pub fn logs_to_send_sorted(dir: &Path) -> io::Result<Vec<String>> {
    let now = unix_secs();
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(MARKER_SUFFIX) {
            let base = dir.join(&name[..name.len() - MARKER_SUFFIX.len()]);
            if !base.exists() {
                let _ = fs::remove_file(entry.path());
            }
            continue;
        }
        // the entry may vanish between readdir and stat
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() {
            names.push(name);
        }
    }
    names.sort_unstable();
    // drop the newest before filtering; it is still being written
    names.pop();
    names.retain(|name| marker_is_stale(read_marker(&dir.join(name)), now));
    Ok(names)
}

fn ack_success(resp: &JsonValue) -> bool {
    resp.get("result")
        .and_then(|result| result.get("success"))
        .map(|success| success.as_i64().unwrap_or(0) != 0 || success.as_bool().unwrap_or(false))
        .unwrap_or(false)
}

/// Forwards local log files to the control plane, one at a time, and
/// records acknowledgments in per-file markers. Exactly one instance
/// runs, so marker writes are always observed in order.
pub struct LogForwarder {
    dir: PathBuf,
    send_queue: UnboundedSender<String>,
    acks: UnboundedReceiver<JsonValue>,
    pending: Vec<String>,
    last_scan: Option<Instant>,
}

impl LogForwarder {
    pub fn new(
        dir: impl Into<PathBuf>,
        send_queue: UnboundedSender<String>,
        acks: UnboundedReceiver<JsonValue>,
    ) -> Self {
        Self {
            dir: dir.into(),
            send_queue,
            acks,
            pending: Vec::new(),
            last_scan: None,
        }
    }

    /// Stamp the marker, read the file, enqueue the forward frame.
    /// The stamp happens first so the file is not reselected within
    /// the resend window even if no response ever arrives.
    fn forward(&self, name: &str) -> io::Result<()> {
        let path = self.dir.join(name);
        write_marker(&path, unix_secs() as u32)?;
        let contents = fs::read_to_string(&path)?;
        let frame = json!({
            "method": "forwardLogs",
            "params": { "logs": contents },
            "jsonrpc": "2.0",
            "id": name,
        });
        let _ = self.send_queue.send(frame.to_string());
        Ok(())
    }

    fn record_ack(&self, resp: &JsonValue) -> Option<String> {
        let name = resp.get("id").and_then(JsonValue::as_str)?;
        let success = ack_success(resp);
        log::debug!("logs: forward response {name} success={success}");
        if success {
            // permanently done, regardless of the resend window
            if let Err(err) = write_marker(&self.dir.join(name), MARKER_ACKED) {
                log::debug!("logs: marker write for {name} failed: {err}");
            }
        }
        Some(name.to_string())
    }

    /// One forwarding cycle: rescan if due, send at most one file,
    /// then wait for its acknowledgment. Returns false once the ack
    /// queue is gone and the engine should stop.
    pub async fn cycle(&mut self) -> bool {
        if self
            .last_scan
            .map_or(true, |at| at.elapsed() > SCAN_INTERVAL)
        {
            match logs_to_send_sorted(&self.dir) {
                Ok(names) => self.pending = names,
                Err(err) => log::warn!("logs: scan of {} failed: {err}", self.dir.display()),
            }
            self.last_scan = Some(Instant::now());
        }

        let mut current = None;
        if let Some(name) = self.pending.pop() {
            log::debug!("logs: forward request {name}");
            match self.forward(&name) {
                Ok(()) => current = Some(name),
                // file may be deleted by rotation between scan and read
                Err(err) => log::debug!("logs: skipping {name}: {err}"),
            }
        }

        // Wait for the response, draining at most one ack per tick so
        // stale responses from earlier sends cannot pile up unread.
        for _ in 0..ACK_WAIT_TICKS {
            match timeout(ACK_TICK, self.acks.recv()).await {
                Ok(Some(resp)) => {
                    let acked = self.record_ack(&resp);
                    if acked.is_some() && acked == current {
                        break;
                    }
                }
                Ok(None) => return false,
                Err(_elapsed) => {
                    if current.is_none() {
                        break;
                    }
                }
            }
        }
        true
    }

    pub async fn run(&mut self) {
        log::info!("logs: forwarding from {}", self.dir.display());
        while self.cycle().await {}
        log::info!("logs: ack queue closed, stopping");
    }
}
