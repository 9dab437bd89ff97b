use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;

const CHUNK_SIZE: usize = 128 * 1024;

/// One control-plane-requested bulk upload. Never auto-retried; retry
/// is the control plane's job via resubmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadItem {
    pub id: String,
    pub path: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub created_at: u64,
}

/// FIFO upload queue with advisory id-based cancellation, drained by a
/// single worker so uploads never compete with RPC dispatch.
pub struct UploadQueue {
    items: Mutex<VecDeque<UploadItem>>,
    cancelled: Mutex<HashSet<String>>,
    current: Mutex<Option<UploadItem>>,
    notify: Notify,
}

impl UploadQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            cancelled: Mutex::new(HashSet::new()),
            current: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    pub fn enqueue(&self, item: UploadItem) {
        self.items
            .lock()
            .expect("upload items mutex poisoned")
            .push_back(item);
        self.notify.notify_one();
    }

    /// Mark an upload cancelled. Advisory: the worker checks the set
    /// before starting and at chunk boundaries mid-transfer. Returns
    /// whether the id was queued or in flight.
    pub fn cancel(&self, id: &str) -> bool {
        let queued = self
            .items
            .lock()
            .expect("upload items mutex poisoned")
            .iter()
            .any(|item| item.id == id);
        let in_flight = self
            .current
            .lock()
            .expect("upload current mutex poisoned")
            .as_ref()
            .is_some_and(|item| item.id == id);
        if queued || in_flight {
            self.cancelled
                .lock()
                .expect("upload cancel mutex poisoned")
                .insert(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn is_cancelled(&self, id: &str) -> bool {
        self.cancelled
            .lock()
            .expect("upload cancel mutex poisoned")
            .contains(id)
    }

    fn take_cancelled(&self, id: &str) -> bool {
        self.cancelled
            .lock()
            .expect("upload cancel mutex poisoned")
            .remove(id)
    }

    /// In-flight item first, then queued items in order.
    pub fn list(&self) -> Vec<UploadItem> {
        let mut out = Vec::new();
        if let Some(item) = self
            .current
            .lock()
            .expect("upload current mutex poisoned")
            .clone()
        {
            out.push(item);
        }
        out.extend(
            self.items
                .lock()
                .expect("upload items mutex poisoned")
                .iter()
                .cloned(),
        );
        out
    }

    async fn next(&self) -> UploadItem {
        loop {
            if let Some(item) = self
                .items
                .lock()
                .expect("upload items mutex poisoned")
                .pop_front()
            {
                return item;
            }
            self.notify.notified().await;
        }
    }

    fn set_current(&self, item: Option<UploadItem>) {
        *self
            .current
            .lock()
            .expect("upload current mutex poisoned") = item;
    }

    /// Worker loop: serial FIFO drain. A failed or cancelled transfer
    /// is discarded, never retried here.
    pub async fn drain(self: Arc<Self>, client: reqwest::Client) {
        loop {
            let item = self.next().await;
            if self.take_cancelled(&item.id) {
                log::info!("uploads: {} cancelled before start", item.id);
                continue;
            }
            self.set_current(Some(item.clone()));
            match upload_file(&client, &self, &item).await {
                Ok(status) => log::info!("uploads: {} -> {} ({status})", item.id, item.url),
                Err(err) => log::warn!("uploads: {} failed: {err}", item.id),
            }
            self.set_current(None);
            self.take_cancelled(&item.id);
        }
    }
}

/// Stream the file as the request body, checking for cancellation at
/// every chunk boundary; a cancelled transfer aborts the body and
/// surfaces as an error, never as success.
pub async fn upload_file(
    client: &reqwest::Client,
    queue: &Arc<UploadQueue>,
    item: &UploadItem,
) -> io::Result<u16> {
    let file = tokio::fs::File::open(&item.path).await?;
    let stream = futures_util::stream::unfold(
        (file, queue.clone(), item.id.clone()),
        |(mut file, queue, id)| async move {
            if queue.is_cancelled(&id) {
                let err = io::Error::new(io::ErrorKind::Interrupted, "upload cancelled");
                return Some((Err(err), (file, queue, id)));
            }
            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), (file, queue, id)))
                }
                Err(err) => Some((Err(err), (file, queue, id))),
            }
        },
    );

    let mut headers = HeaderMap::new();
    for (key, value) in &item.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            log::debug!("uploads: {} skipping invalid header {key}", item.id);
            continue;
        };
        headers.insert(name, value);
    }

    let response = client
        .put(&item.url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .map_err(io::Error::other)?;
    Ok(response.status().as_u16())
}
