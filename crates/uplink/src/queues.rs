use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::rpc::RpcRequest;

/// The four FIFO queues shared by the workers, constructed once at
/// startup and moved into their owners. Unbounded so producers keep
/// running while the channel is disconnected; nothing drains to the
/// wire until a session holds the receive halves.
pub struct Queues {
    /// Decoded inbound calls for the dispatch pool.
    pub calls_tx: UnboundedSender<RpcRequest>,
    pub calls_rx: UnboundedReceiver<RpcRequest>,
    /// Serialized responses from handlers back to the wire.
    pub results_tx: UnboundedSender<String>,
    pub results_rx: UnboundedReceiver<String>,
    /// Serialized forwardLogs frames from the log engine.
    pub log_send_tx: UnboundedSender<String>,
    pub log_send_rx: UnboundedReceiver<String>,
    /// Raw response frames routed back to the log engine.
    pub log_ack_tx: UnboundedSender<JsonValue>,
    pub log_ack_rx: UnboundedReceiver<JsonValue>,
}

impl Queues {
    pub fn new() -> Self {
        let (calls_tx, calls_rx) = unbounded_channel();
        let (results_tx, results_rx) = unbounded_channel();
        let (log_send_tx, log_send_rx) = unbounded_channel();
        let (log_ack_tx, log_ack_rx) = unbounded_channel();
        Self {
            calls_tx,
            calls_rx,
            results_tx,
            results_rx,
            log_send_tx,
            log_send_rx,
            log_ack_tx,
            log_ack_rx,
        }
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}
