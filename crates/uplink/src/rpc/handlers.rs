use std::fs;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};

use super::{Dispatcher, Handler, HandlerResult, RpcError};
use crate::hardware::Hardware;
use crate::params::Params;
use crate::registration::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
use crate::telemetry::{is_known_service, MessageBus};
use crate::uploads::{UploadItem, UploadQueue};

const REBOOT_DELAY: Duration = Duration::from_secs(2);

/// Param key the ssh provisioning flow writes authorized keys under.
pub const SSH_KEYS_PARAM: &str = "GithubSshKeys";

/// Static identity returned by `getVersion`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub remote: String,
    pub branch: String,
    pub commit: String,
}

impl BuildInfo {
    pub fn from_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            remote: option_env!("UPLINK_GIT_REMOTE").unwrap_or("unknown").to_string(),
            branch: option_env!("UPLINK_GIT_BRANCH").unwrap_or("unknown").to_string(),
            commit: option_env!("UPLINK_GIT_COMMIT").unwrap_or("unknown").to_string(),
        }
    }
}

/// Everything the handlers reach for, injected once at startup.
pub struct HandlerContext {
    pub bus: Arc<dyn MessageBus>,
    pub hardware: Arc<dyn Hardware>,
    pub uploads: Arc<UploadQueue>,
    pub params: Params,
    pub persist_dir: PathBuf,
    pub build_info: BuildInfo,
}

#[derive(Debug, Deserialize)]
struct GetMessageParams {
    #[serde(default)]
    service: Option<String>,
    #[serde(default = "default_get_message_timeout")]
    timeout: u64,
}

impl Default for GetMessageParams {
    fn default() -> Self {
        Self {
            service: None,
            timeout: default_get_message_timeout(),
        }
    }
}

fn default_get_message_timeout() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
struct UploadFileParams {
    #[serde(alias = "fn")]
    path: String,
    url: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CancelUploadParams {
    #[serde(alias = "id")]
    upload_id: String,
}

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Option<JsonValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Box::new(move |params| {
        let fut: BoxFuture<'static, HandlerResult> = Box::pin(f(params));
        fut
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<JsonValue>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|err| RpcError::invalid_params(err.to_string()))
}

fn read_key_file(persist_dir: &std::path::Path, name: &str) -> HandlerResult {
    match fs::read_to_string(persist_dir.join(name)) {
        Ok(contents) => Ok(JsonValue::String(contents)),
        // absent key is not an error, just nothing to return
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(JsonValue::Null),
        Err(err) => Err(RpcError::server(err.to_string())),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn upload_id(url: &str, created_at: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(created_at.to_le_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Build the full dispatch table over the injected context.
pub fn build_dispatcher(ctx: Arc<HandlerContext>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    dispatcher.register(
        "echo",
        handler(|params| async move { Ok(params.unwrap_or(JsonValue::Null)) }),
    );

    let bus = ctx.bus.clone();
    dispatcher.register(
        "getMessage",
        handler(move |params| {
            let bus = bus.clone();
            async move {
                let parsed = params
                    .map(serde_json::from_value::<GetMessageParams>)
                    .transpose()
                    .map_err(|err| RpcError::invalid_params(err.to_string()))?
                    .unwrap_or_default();
                let service = parsed
                    .service
                    .filter(|name| is_known_service(name))
                    .ok_or_else(|| RpcError::server("invalid service"))?;
                let timeout = Duration::from_millis(parsed.timeout);
                match bus.recv_one(&service, timeout).await {
                    Ok(Some(message)) => Ok(message),
                    Ok(None) => Err(RpcError::server("request timeout")),
                    Err(err) => Err(RpcError::server(err.to_string())),
                }
            }
        }),
    );

    let build_info = ctx.build_info.clone();
    dispatcher.register(
        "getVersion",
        handler(move |_params| {
            let build_info = build_info.clone();
            async move {
                serde_json::to_value(&build_info).map_err(|err| RpcError::server(err.to_string()))
            }
        }),
    );

    let bus = ctx.bus.clone();
    let hardware = ctx.hardware.clone();
    dispatcher.register(
        "reboot",
        handler(move |_params| {
            let bus = bus.clone();
            let hardware = hardware.clone();
            async move {
                // never reboot mid-drive, and never on an unreadable state
                let state = bus
                    .recv_one("deviceState", Duration::from_millis(1000))
                    .await;
                let parked = matches!(
                    &state,
                    Ok(Some(value)) if !value.get("started").and_then(JsonValue::as_bool).unwrap_or(true)
                );
                if !parked {
                    return Err(RpcError::server("Reboot unavailable"));
                }
                // respond first, reboot after a short grace period
                tokio::spawn(async move {
                    tokio::time::sleep(REBOOT_DELAY).await;
                    if let Err(err) = hardware.reboot() {
                        log::error!("reboot failed: {err}");
                    }
                });
                Ok(json!({ "success": 1 }))
            }
        }),
    );

    let persist_dir = ctx.persist_dir.clone();
    dispatcher.register(
        "getPublicKey",
        handler(move |_params| {
            let persist_dir = persist_dir.clone();
            async move { read_key_file(&persist_dir, PUBLIC_KEY_FILE) }
        }),
    );

    let persist_dir = ctx.persist_dir.clone();
    dispatcher.register(
        "getPrivateKey",
        handler(move |_params| {
            let persist_dir = persist_dir.clone();
            async move { read_key_file(&persist_dir, PRIVATE_KEY_FILE) }
        }),
    );

    let params_store = ctx.params.clone();
    dispatcher.register(
        "getSshAuthorizedKeys",
        handler(move |_params| {
            let params_store = params_store.clone();
            async move {
                // never provisioned reads back as empty, not as an error
                match params_store.get(SSH_KEYS_PARAM) {
                    Ok(keys) => Ok(JsonValue::String(keys.unwrap_or_default())),
                    Err(err) => Err(RpcError::server(err.to_string())),
                }
            }
        }),
    );

    let hardware = ctx.hardware.clone();
    dispatcher.register(
        "getSimInfo",
        handler(move |_params| {
            let hardware = hardware.clone();
            async move {
                hardware
                    .sim_info()
                    .map_err(|err| RpcError::server(err.to_string()))
            }
        }),
    );

    let hardware = ctx.hardware.clone();
    dispatcher.register(
        "getNetworkType",
        handler(move |_params| {
            let hardware = hardware.clone();
            async move {
                hardware
                    .network_type()
                    .map(|code| json!(code))
                    .map_err(|err| RpcError::server(err.to_string()))
            }
        }),
    );

    let uploads = ctx.uploads.clone();
    dispatcher.register(
        "uploadFileToUrl",
        handler(move |params| {
            let uploads = uploads.clone();
            async move {
                let parsed: UploadFileParams = parse_params(params)?;
                if fs::metadata(&parsed.path).is_err() {
                    return Err(RpcError::server("file not found"));
                }
                let created_at = unix_millis();
                let item = UploadItem {
                    id: upload_id(&parsed.url, created_at),
                    path: parsed.path,
                    url: parsed.url,
                    headers: parsed.headers,
                    created_at,
                };
                uploads.enqueue(item.clone());
                Ok(json!({ "enqueued": 1, "item": item }))
            }
        }),
    );

    let uploads = ctx.uploads.clone();
    dispatcher.register(
        "listUploadQueue",
        handler(move |_params| {
            let uploads = uploads.clone();
            async move {
                serde_json::to_value(uploads.list())
                    .map_err(|err| RpcError::server(err.to_string()))
            }
        }),
    );

    let uploads = ctx.uploads.clone();
    dispatcher.register(
        "cancelUpload",
        handler(move |params| {
            let uploads = uploads.clone();
            async move {
                let parsed: CancelUploadParams = parse_params(params)?;
                if uploads.cancel(&parsed.upload_id) {
                    Ok(json!({ "success": 1 }))
                } else {
                    Err(RpcError::server("upload not found"))
                }
            }
        }),
    );

    dispatcher
}
