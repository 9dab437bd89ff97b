mod handlers;

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use handlers::{build_dispatcher, BuildInfo, HandlerContext};

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// One inbound remote call. The id is echoed verbatim into the
/// response; log-forward frames use filename strings, so it stays a
/// JSON value rather than a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: JsonValue,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            code: SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

impl RpcResponse {
    pub fn result(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: JsonValue, error: RpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

pub type HandlerResult = Result<JsonValue, RpcError>;
pub type Handler = Box<dyn Fn(Option<JsonValue>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Immutable method-name → handler table, built once at startup and
/// injected into the dispatch workers. A failed call produces an error
/// response; it never affects the connection.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let Some(handler) = self.handlers.get(request.method.as_str()) else {
            log::debug!("rpc: unknown method {}", request.method);
            return RpcResponse::error(
                request.id,
                RpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("method not found: {}", request.method),
                },
            );
        };
        match handler(request.params).await {
            Ok(result) => RpcResponse::result(request.id, result),
            Err(error) => {
                log::debug!("rpc: {} failed: {}", request.method, error.message);
                RpcResponse::error(request.id, error)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
