use std::io;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use uplink::telemetry::MessageBus;

/// Request/response client for the external telemetry bus: one JSON
/// line out naming the service, one JSON line back with the message.
/// A fresh connection per read keeps the primitive stateless.
pub struct SocketBus {
    socket: PathBuf,
}

impl SocketBus {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn request(&self, service: &str) -> io::Result<Option<JsonValue>> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        let request = serde_json::json!({ "service": service }).to_string() + "\n";
        stream.write_all(request.as_bytes()).await?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some).map_err(io::Error::other)
    }
}

impl MessageBus for SocketBus {
    fn recv_one<'a>(
        &'a self,
        service: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, io::Result<Option<JsonValue>>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.request(service)).await {
                Ok(result) => result,
                Err(_elapsed) => Ok(None),
            }
        })
    }
}
