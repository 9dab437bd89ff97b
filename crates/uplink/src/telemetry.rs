use std::io;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;

/// Telemetry channels a remote caller may read through `getMessage`.
/// Names outside this registry are rejected before any bus access.
pub const SERVICE_REGISTRY: &[&str] = &[
    "deviceState",
    "pandaStates",
    "carState",
    "carControl",
    "controlsState",
    "gpsLocationExternal",
    "liveLocationKalman",
    "managerState",
    "clocks",
    "ubloxGnss",
];

pub fn is_known_service(name: &str) -> bool {
    SERVICE_REGISTRY.contains(&name)
}

/// One-shot read side of the external publish/subscribe bus.
///
/// `Ok(None)` means no message arrived within `timeout`; errors are
/// transport faults talking to the bus itself.
pub trait MessageBus: Send + Sync {
    fn recv_one<'a>(
        &'a self,
        service: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, io::Result<Option<JsonValue>>>;
}
