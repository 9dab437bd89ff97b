use std::io;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;

use uplink::registration::{backoff_delay_secs, RegisterError, Registrar, CONNECT_RETRY_BASELINE};
use uplink::rpc::{RpcError, RpcRequest, RpcResponse};

/// Channel lifecycle, owned solely by the connection loop. Queues
/// drain to the wire only in `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Registering,
    Connected,
    Backoff,
}

/// Where an inbound text frame belongs.
pub enum InboundFrame {
    /// A call for the dispatch pool.
    Call(RpcRequest),
    /// A response frame, i.e. an ack for the log engine.
    Ack(JsonValue),
    /// Looked like a call but failed to decode; answer with a fault.
    Malformed(JsonValue),
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    if *state != next {
        log::debug!("ws: {state:?} -> {next:?}");
        *state = next;
    }
}

pub fn route_frame(text: &str) -> Option<InboundFrame> {
    let value: JsonValue = serde_json::from_str(text).ok()?;
    if value.get("method").is_none() {
        return Some(InboundFrame::Ack(value));
    }
    match serde_json::from_value::<RpcRequest>(value.clone()) {
        Ok(request) => Some(InboundFrame::Call(request)),
        Err(_) => value.get("id").cloned().map(InboundFrame::Malformed),
    }
}

/// Registration plus reconnect-with-backoff loop. Never returns; a
/// failed attempt of any class is retried with full-jitter delay.
#[allow(clippy::too_many_arguments)]
pub async fn run_conn_loop(
    registrar: Registrar,
    ws_host: String,
    calls_tx: UnboundedSender<RpcRequest>,
    log_ack_tx: UnboundedSender<JsonValue>,
    results_tx: UnboundedSender<String>,
    mut results_rx: UnboundedReceiver<String>,
    mut log_send_rx: UnboundedReceiver<String>,
) {
    let mut state = ConnectionState::Disconnected;
    let mut retries: u32 = 0;
    loop {
        advance(&mut state, ConnectionState::Registering);
        match registrar.register_once().await {
            Ok(dongle_id) => {
                retries = CONNECT_RETRY_BASELINE;
                advance(&mut state, ConnectionState::Connected);
                let url = format!("{}/ws/v2/{}", ws_host.trim_end_matches('/'), dongle_id);
                match run_session(
                    &url,
                    &calls_tx,
                    &log_ack_tx,
                    &results_tx,
                    &mut results_rx,
                    &mut log_send_rx,
                )
                .await
                {
                    Ok(()) => log::info!("ws: session closed"),
                    Err(err) => log::warn!("ws: session error: {err}"),
                }
            }
            Err(err @ RegisterError::Rejected(_)) => {
                // not entitled yet; keep retrying, no local lockout
                log::info!("register: {err}");
                retries += 1;
            }
            Err(err) => {
                log::warn!("register: {err}");
                retries += 1;
            }
        }
        advance(&mut state, ConnectionState::Backoff);
        let delay = backoff_delay_secs(retries);
        log::debug!("ws: reconnecting in {delay}s (retries={retries})");
        tokio::time::sleep(Duration::from_secs(delay)).await;
        advance(&mut state, ConnectionState::Disconnected);
    }
}

/// One connected session: route inbound frames, drain the two
/// outbound queues. Ends on close, EOF, or a socket error.
async fn run_session(
    url: &str,
    calls_tx: &UnboundedSender<RpcRequest>,
    log_ack_tx: &UnboundedSender<JsonValue>,
    results_tx: &UnboundedSender<String>,
    results_rx: &mut UnboundedReceiver<String>,
    log_send_rx: &mut UnboundedReceiver<String>,
) -> io::Result<()> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(io::Error::other)?;
    log::info!("ws: connected to {url}");
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match route_frame(&text) {
                        Some(InboundFrame::Call(request)) => {
                            let _ = calls_tx.send(request);
                        }
                        Some(InboundFrame::Ack(value)) => {
                            let _ = log_ack_tx.send(value);
                        }
                        Some(InboundFrame::Malformed(id)) => {
                            let response = RpcResponse::error(
                                id,
                                RpcError::invalid_params("malformed request"),
                            );
                            if let Ok(text) = serde_json::to_string(&response) {
                                let _ = results_tx.send(text);
                            }
                        }
                        None => log::debug!("ws: dropping undecodable frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(io::Error::other(err)),
                }
            }
            Some(text) = results_rx.recv() => {
                sink.send(Message::Text(text.into()))
                    .await
                    .map_err(io::Error::other)?;
            }
            Some(text) = log_send_rx.recv() => {
                sink.send(Message::Text(text.into()))
                    .await
                    .map_err(io::Error::other)?;
            }
        }
    }
}
